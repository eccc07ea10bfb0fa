// A logical core: translates CPU operations into cache accesses and bus
// transactions.

use std::sync::Arc;

use crate::bus::Bus;
use crate::commons::{Addr, AtomicOp, BusOp, CoreId, CpuOp, State};
use crate::error::SimError;
use crate::sim::System;
use crate::trace::TraceEvent;

#[derive(Clone)]
pub struct Processor {
    id: CoreId,
    system: Arc<System>,
}

impl Processor {
    /// Handle for core `id` on the given system.
    pub fn attach(system: &Arc<System>, id: CoreId) -> Processor {
        assert!(id < system.spec().num_procs, "no such core: {id}");
        Processor {
            id,
            system: Arc::clone(system),
        }
    }

    /// One handle per configured core, in id order.
    pub fn attach_all(system: &Arc<System>) -> Vec<Processor> {
        (0..system.spec().num_procs)
            .map(|id| Processor::attach(system, id))
            .collect()
    }

    pub fn id(&self) -> CoreId {
        self.id
    }

    /// Execute one CPU operation and return the value it observed or
    /// produced.
    ///
    /// The global bus lock is held for the whole hit-test / write-back /
    /// bus-transaction / update sequence, so the operation is indivisible
    /// with respect to every other core. Invalid addresses are rejected
    /// before anything is touched.
    pub fn execute(&self, op: CpuOp, addr: Addr) -> Result<u32, SimError> {
        self.system.spec().check_addr(addr)?;

        let mut bus = self.system.bus.lock().unwrap();
        let bus = &mut *bus;

        bus.trace.emit(TraceEvent::OpStart {
            core: self.id,
            op: op.name(),
            addr,
        });

        let hit = bus.caches[self.id].lookup(addr);
        bus.trace.emit(TraceEvent::Access {
            core: self.id,
            addr,
            index: addr.index(self.system.spec()),
            hit,
            state: bus.caches[self.id].line(addr).state,
        });

        let value = match op {
            CpuOp::Read => self.read(bus, addr, hit),
            CpuOp::Write(value) => self.write(bus, addr, value, hit),
            CpuOp::Atomic(atomic) => self.atomic(bus, addr, atomic, hit),
        };

        bus.trace.emit(TraceEvent::OpDone {
            core: self.id,
            value,
            state: bus.caches[self.id].state_of(addr),
        });

        if cfg!(debug_assertions) {
            bus.assert_coherence();
        }
        Ok(value)
    }

    fn read(&self, bus: &mut Bus, addr: Addr, hit: bool) -> u32 {
        if hit {
            // read hits complete locally in every valid state
            return bus.caches[self.id].line(addr).value;
        }

        self.write_back_victim(bus, addr);
        let present = bus.caches[self.id].line(addr).state;

        bus.trace.emit(TraceEvent::BusRequest {
            core: self.id,
            op: BusOp::BusRd,
            addr,
        });
        let fill = bus
            .broadcast(BusOp::BusRd, addr, self.id)
            .expect("BusRd always carries data");
        bus.caches[self.id].install(addr, fill.value, fill.state);
        bus.trace.emit(TraceEvent::RequesterTransition {
            core: self.id,
            from: present,
            to: fill.state,
        });
        fill.value
    }

    fn write(&self, bus: &mut Bus, addr: Addr, value: u32, hit: bool) -> u32 {
        if !hit {
            self.write_back_victim(bus, addr);
            let present = bus.caches[self.id].line(addr).state;

            bus.trace.emit(TraceEvent::BusRequest {
                core: self.id,
                op: BusOp::BusRdX,
                addr,
            });
            let fill = bus
                .broadcast(BusOp::BusRdX, addr, self.id)
                .expect("BusRdX always carries data");
            bus.caches[self.id].install(addr, fill.value, fill.state);
            bus.trace.emit(TraceEvent::RequesterTransition {
                core: self.id,
                from: present,
                to: fill.state,
            });
            bus.caches[self.id].line_mut(addr).value = value;
            return value;
        }

        let present = bus.caches[self.id].line(addr).state;
        match present {
            // a shared or owned copy must invalidate the other holders first
            State::Shared | State::Owned => {
                bus.trace.emit(TraceEvent::BusRequest {
                    core: self.id,
                    op: BusOp::BusUpgr,
                    addr,
                });
                bus.broadcast(BusOp::BusUpgr, addr, self.id);
            }
            // exclusive ownership already held, no bus traffic
            State::Exclusive | State::Modified => {}
            State::Invalid => unreachable!("write hit on an Invalid line"),
        }
        let line = bus.caches[self.id].line_mut(addr);
        line.value = value;
        line.state = State::Modified;
        bus.trace.emit(TraceEvent::RequesterTransition {
            core: self.id,
            from: present,
            to: State::Modified,
        });
        value
    }

    fn atomic(&self, bus: &mut Bus, addr: Addr, atomic: AtomicOp, hit: bool) -> u32 {
        // acquire exclusivity exactly like a store...
        if !hit {
            self.write_back_victim(bus, addr);
            let present = bus.caches[self.id].line(addr).state;

            bus.trace.emit(TraceEvent::BusRequest {
                core: self.id,
                op: BusOp::BusRdX,
                addr,
            });
            let fill = bus
                .broadcast(BusOp::BusRdX, addr, self.id)
                .expect("BusRdX always carries data");
            bus.caches[self.id].install(addr, fill.value, fill.state);
            bus.trace.emit(TraceEvent::RequesterTransition {
                core: self.id,
                from: present,
                to: fill.state,
            });
        } else {
            let present = bus.caches[self.id].line(addr).state;
            match present {
                State::Shared | State::Owned => {
                    bus.trace.emit(TraceEvent::BusRequest {
                        core: self.id,
                        op: BusOp::BusUpgr,
                        addr,
                    });
                    bus.broadcast(BusOp::BusUpgr, addr, self.id);
                }
                State::Exclusive | State::Modified => {}
                State::Invalid => unreachable!("atomic hit on an Invalid line"),
            }
            bus.caches[self.id].set_state(addr, State::Modified);
            bus.trace.emit(TraceEvent::RequesterTransition {
                core: self.id,
                from: present,
                to: State::Modified,
            });
        }

        // ...then apply the read-modify-write while all other copies are
        // Invalid and this line is Modified
        let old = bus.caches[self.id].line(addr).value;
        let new = atomic.apply(old);
        bus.caches[self.id].line_mut(addr).value = new;
        bus.trace.emit(TraceEvent::AtomicApplied {
            core: self.id,
            old,
            new,
        });
        new
    }

    /// Direct-map conflict handling: a dirty occupant is announced on the
    /// bus and written back before the slot is refilled.
    fn write_back_victim(&self, bus: &mut Bus, addr: Addr) {
        let victim = *bus.caches[self.id].line(addr);
        if victim.state.is_dirty() {
            bus.trace.emit(TraceEvent::BusRequest {
                core: self.id,
                op: BusOp::BusWB,
                addr: victim.tag,
            });
            bus.broadcast(BusOp::BusWB, victim.tag, self.id);
            bus.caches[self.id].line_mut(addr).state = State::Invalid;
        }
    }
}
