// The broadcast bus: snoop arbitration, data sourcing, and the coherence
// checker. This is the only place that may touch another core's cache
// lines or write memory.

use std::collections::HashMap;

use crate::cache::Cache;
use crate::commons::{Addr, BusOp, CoreId, DataSource, State, SystemSpec};
use crate::error::CoherenceError;
use crate::memory::Memory;
use crate::trace::{TraceEvent, Tracer};

/// Data and next-state answer to a BusRd or BusRdX.
#[derive(Clone, Copy, Debug)]
pub struct BusFill {
    pub value: u32,
    pub source: DataSource,
    /// The requester's next state.
    pub state: State,
}

pub struct Bus {
    spec: SystemSpec,
    pub(crate) caches: Vec<Cache>,
    pub(crate) memory: Memory,
    pub(crate) trace: Tracer,
    pub(crate) num_transactions: u64,
    pub(crate) num_invalidations: u64,
    pub(crate) num_write_backs: u64,
}

impl Bus {
    pub fn new(spec: SystemSpec) -> Self {
        Bus {
            spec,
            caches: (0..spec.num_procs).map(|_| Cache::new(spec)).collect(),
            memory: Memory::new(spec),
            trace: Tracer::default(),
            num_transactions: 0,
            num_invalidations: 0,
            num_write_backs: 0,
        }
    }

    /// Broadcast one transaction to every non-initiator cache and collect
    /// the snoop outcomes. Returns `Some` for the data-carrying reads
    /// (BusRd, BusRdX) and `None` for BusUpgr and BusWB.
    ///
    /// The caller must already hold the global serialization right; the
    /// whole broadcast is one indivisible bus occupancy.
    pub fn broadcast(&mut self, op: BusOp, addr: Addr, initiator: CoreId) -> Option<BusFill> {
        self.num_transactions += 1;

        if op == BusOp::BusWB {
            // one-way announcement: the initiator's dirty victim goes to
            // memory, nobody else reacts
            let line = *self.caches[initiator].line(addr);
            debug_assert!(line.tag == addr && line.state.is_dirty());
            self.memory.write(addr, line.value);
            self.num_write_backs += 1;
            self.trace.emit(TraceEvent::WriteBack {
                core: initiator,
                addr,
                value: line.value,
            });
            return None;
        }

        let mut any_copy = false;
        let mut supplier: Option<(CoreId, u32)> = None;
        let mut supplier_is_modified = false;

        for id in 0..self.spec.num_procs {
            if id == initiator {
                continue;
            }
            let line = self.caches[id].line_mut(addr);
            if !line.holds(addr) {
                continue;
            }
            any_copy = true;
            let present = line.state;
            self.trace.emit(TraceEvent::SnoopHit {
                core: id,
                addr,
                state: present,
            });

            match op {
                BusOp::BusRd => match present {
                    State::Modified => {
                        supplier = Some((id, line.value));
                        supplier_is_modified = true;
                        line.state = State::Owned;
                        self.trace.emit(TraceEvent::SnoopTransition {
                            core: id,
                            from: present,
                            to: State::Owned,
                        });
                    }
                    State::Owned => {
                        if !supplier_is_modified {
                            supplier = Some((id, line.value));
                        }
                        // the owner keeps supplying and stays Owned
                    }
                    State::Exclusive => {
                        line.state = State::Shared;
                        self.trace.emit(TraceEvent::SnoopTransition {
                            core: id,
                            from: present,
                            to: State::Shared,
                        });
                    }
                    State::Shared => {}
                    State::Invalid => unreachable!(),
                },
                BusOp::BusRdX => {
                    match present {
                        State::Modified => {
                            supplier = Some((id, line.value));
                            supplier_is_modified = true;
                        }
                        State::Owned => {
                            if !supplier_is_modified {
                                supplier = Some((id, line.value));
                            }
                        }
                        // clean copies match memory, so memory supplies
                        State::Exclusive | State::Shared => {}
                        State::Invalid => unreachable!(),
                    }
                    line.state = State::Invalid;
                    self.num_invalidations += 1;
                    self.trace.emit(TraceEvent::SnoopTransition {
                        core: id,
                        from: present,
                        to: State::Invalid,
                    });
                }
                BusOp::BusUpgr => {
                    // the initiator already holds a copy, so no peer can be
                    // Modified here
                    debug_assert!(
                        present != State::Modified,
                        "BusUpgr snooped a Modified copy of {addr}"
                    );
                    line.state = State::Invalid;
                    self.num_invalidations += 1;
                    self.trace.emit(TraceEvent::SnoopTransition {
                        core: id,
                        from: present,
                        to: State::Invalid,
                    });
                }
                BusOp::BusWB => unreachable!(),
            }
        }

        match op {
            BusOp::BusRd | BusOp::BusRdX => {
                let (value, source) = match supplier {
                    Some((id, value)) => (value, DataSource::Cache(id)),
                    None => (self.memory.read(addr), DataSource::Memory),
                };
                let state = if op == BusOp::BusRdX {
                    State::Modified
                } else if any_copy {
                    State::Shared
                } else {
                    State::Exclusive
                };
                self.trace.emit(TraceEvent::DataSupplied { source, value });
                Some(BusFill { value, source, state })
            }
            BusOp::BusUpgr => None,
            BusOp::BusWB => unreachable!(),
        }
    }

    /// Verify the global coherence invariants over all caches and memory.
    pub fn check_coherence(&self) -> Result<(), CoherenceError> {
        for (core, cache) in self.caches.iter().enumerate() {
            for (index, line) in cache.lines().iter().enumerate() {
                if line.state == State::Invalid {
                    continue;
                }
                let expected = line.tag.index(&self.spec);
                if expected != index {
                    return Err(CoherenceError::TagIndexMismatch {
                        core,
                        index,
                        tag: line.tag,
                        expected,
                    });
                }
            }
        }

        let mut copies: HashMap<u32, Vec<(CoreId, State, u32)>> = HashMap::new();
        for (core, cache) in self.caches.iter().enumerate() {
            for line in cache.lines() {
                if line.state != State::Invalid {
                    copies
                        .entry(line.tag.0)
                        .or_default()
                        .push((core, line.state, line.value));
                }
            }
        }

        for (raw, set) in &copies {
            let addr = Addr(*raw);
            let holders = |wanted: State| {
                set.iter()
                    .filter(move |(_, state, _)| *state == wanted)
                    .map(|(core, _, _)| *core)
            };

            if holders(State::Modified).count() > 1 {
                return Err(CoherenceError::MultipleModified { addr });
            }
            if let Some(owner) = holders(State::Modified).next() {
                if set.len() > 1 {
                    return Err(CoherenceError::ModifiedNotAlone { addr, owner });
                }
            }
            if holders(State::Exclusive).count() > 1 {
                return Err(CoherenceError::MultipleExclusive { addr });
            }
            if let Some(owner) = holders(State::Exclusive).next() {
                if set.len() > 1 {
                    return Err(CoherenceError::ExclusiveNotAlone { addr, owner });
                }
            }
            if holders(State::Owned).count() > 1 {
                return Err(CoherenceError::MultipleOwners { addr });
            }

            let first = set[0].2;
            if set.iter().any(|(_, _, value)| *value != first) {
                return Err(CoherenceError::ValueMismatch {
                    addr,
                    values: set.iter().map(|(_, _, value)| *value).collect(),
                });
            }

            let dirty = set.iter().any(|(_, state, _)| state.is_dirty());
            if !dirty {
                let mem = self.memory.read(addr);
                if mem != first {
                    return Err(CoherenceError::StaleMemory {
                        addr,
                        mem,
                        cached: first,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fatal variant of the invariant check, run after every CPU operation
    /// in debug builds.
    pub(crate) fn assert_coherence(&self) {
        if let Err(violation) = self.check_coherence() {
            panic!("coherence violation: {violation}");
        }
    }
}
