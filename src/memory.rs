// Flat word-addressable memory. Authoritative only while no cache holds
// the word in a dirty state; written only on BusWB.

use crate::commons::{Addr, SystemSpec};

pub struct Memory {
    spec: SystemSpec,
    words: Vec<u32>,
}

impl Memory {
    pub fn new(spec: SystemSpec) -> Self {
        Memory {
            spec,
            words: vec![0; spec.mem_size],
        }
    }

    pub fn read(&self, addr: Addr) -> u32 {
        self.words[addr.word(&self.spec)]
    }

    pub fn write(&mut self, addr: Addr, value: u32) {
        let word = addr.word(&self.spec);
        self.words[word] = value;
    }

    /// Word-indexed access for harness setup and final inspection.
    pub fn read_word(&self, index: usize) -> u32 {
        self.words[index]
    }

    pub fn write_word(&mut self, index: usize, value: u32) {
        self.words[index] = value;
    }
}
