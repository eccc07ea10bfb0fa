// System assembly: the global serialization point and the harness-facing
// setup/inspection API.

use std::sync::Mutex;

use crate::bus::Bus;
use crate::commons::{Addr, CoreId, State, SystemSpec};
use crate::error::{CoherenceError, SimError};
use crate::trace::TraceEvent;

/// The whole machine: N processors around one bus, one memory, one trace.
///
/// The mutex is the concurrency model: a processor holds it for an entire
/// CPU operation, so at most one operation is in flight system-wide and
/// every bus transaction lands in one total order.
pub struct System {
    spec: SystemSpec,
    pub(crate) bus: Mutex<Bus>,
}

impl System {
    pub fn new(spec: SystemSpec) -> Result<Self, SimError> {
        spec.validate()?;
        Ok(System {
            spec,
            bus: Mutex::new(Bus::new(spec)),
        })
    }

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }

    // Setup and inspection. These take the same lock as `Processor::execute`,
    // but the harness must still not interleave them with in-flight
    // operations it cares about observing.

    pub fn read_word(&self, index: usize) -> u32 {
        self.bus.lock().unwrap().memory.read_word(index)
    }

    pub fn write_word(&self, index: usize, value: u32) {
        self.bus.lock().unwrap().memory.write_word(index, value);
    }

    /// State of `addr` in the given core's cache, Invalid when absent.
    pub fn line_state(&self, core: CoreId, addr: Addr) -> State {
        self.bus.lock().unwrap().caches[core].state_of(addr)
    }

    pub fn line_value(&self, core: CoreId, addr: Addr) -> Option<u32> {
        self.bus.lock().unwrap().caches[core].value_of(addr)
    }

    pub fn check_coherence(&self) -> Result<(), CoherenceError> {
        self.bus.lock().unwrap().check_coherence()
    }

    pub fn trace(&self) -> Vec<TraceEvent> {
        self.bus.lock().unwrap().trace.events().to_vec()
    }

    pub fn stats(&self) -> SystemStats {
        let bus = self.bus.lock().unwrap();
        SystemStats {
            hits: bus.caches.iter().map(|c| c.num_hits).collect(),
            misses: bus.caches.iter().map(|c| c.num_misses).collect(),
            transactions: bus.num_transactions,
            invalidations: bus.num_invalidations,
            write_backs: bus.num_write_backs,
        }
    }
}

/// Counters accumulated over a run, one hit/miss entry per core.
pub struct SystemStats {
    pub hits: Vec<u64>,
    pub misses: Vec<u64>,
    pub transactions: u64,
    pub invalidations: u64,
    pub write_backs: u64,
}
