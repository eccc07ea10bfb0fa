// Per-core private data cache, direct-mapped at word granularity.

use crate::commons::{Addr, State, SystemSpec};

/// One direct-mapped slot: full-address tag, word value, MOESI state.
/// Tag and value carry no meaning while the state is Invalid.
#[derive(Clone, Copy, Debug)]
pub struct CacheLine {
    pub tag: Addr,
    pub value: u32,
    pub state: State,
}

impl CacheLine {
    fn empty() -> Self {
        CacheLine {
            tag: Addr(0),
            value: 0,
            state: State::Invalid,
        }
    }

    pub fn holds(&self, addr: Addr) -> bool {
        self.state != State::Invalid && self.tag == addr
    }
}

pub struct Cache {
    spec: SystemSpec,
    lines: Vec<CacheLine>,
    pub num_hits: u64,
    pub num_misses: u64,
}

impl Cache {
    pub fn new(spec: SystemSpec) -> Self {
        Cache {
            spec,
            lines: vec![CacheLine::empty(); spec.cache_size],
            num_hits: 0,
            num_misses: 0,
        }
    }

    pub fn line(&self, addr: Addr) -> &CacheLine {
        &self.lines[addr.index(&self.spec)]
    }

    pub fn line_mut(&mut self, addr: Addr) -> &mut CacheLine {
        let index = addr.index(&self.spec);
        &mut self.lines[index]
    }

    /// Hit test for a CPU operation; bumps the hit/miss counters.
    pub fn lookup(&mut self, addr: Addr) -> bool {
        let hit = self.line(addr).holds(addr);
        if hit {
            self.num_hits += 1;
        } else {
            self.num_misses += 1;
        }
        hit
    }

    /// Overwrite the slot the address maps to.
    pub fn install(&mut self, addr: Addr, value: u32, state: State) {
        *self.line_mut(addr) = CacheLine { tag: addr, value, state };
    }

    /// Change the state of a line already holding `addr`.
    pub fn set_state(&mut self, addr: Addr, state: State) {
        let line = self.line_mut(addr);
        debug_assert!(line.tag == addr, "set_state on a line holding another tag");
        line.state = state;
    }

    /// State of this address, Invalid when the slot holds another tag.
    pub fn state_of(&self, addr: Addr) -> State {
        let line = self.line(addr);
        if line.holds(addr) {
            line.state
        } else {
            State::Invalid
        }
    }

    pub fn value_of(&self, addr: Addr) -> Option<u32> {
        let line = self.line(addr);
        line.holds(addr).then(|| line.value)
    }

    pub(crate) fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
}
