use thiserror::Error;

use crate::commons::{Addr, CoreId};

/// Errors surfaced to the caller of the simulator API.
#[derive(Error, Debug)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("address {addr:#x} out of range: memory spans {limit:#x} bytes")]
    AddrOutOfRange { addr: u32, limit: u64 },

    #[error("address {addr:#x} is not aligned to {word_size}-byte words")]
    Misaligned { addr: u32, word_size: u32 },
}

/// A broken protocol invariant. These are fatal: the simulator must not
/// keep running with inconsistent caches.
#[derive(Error, Debug)]
pub enum CoherenceError {
    #[error("address {addr} is Modified in more than one cache")]
    MultipleModified { addr: Addr },

    #[error("address {addr} is Modified in CPU {owner} but cached elsewhere")]
    ModifiedNotAlone { addr: Addr, owner: CoreId },

    #[error("address {addr} is Exclusive in more than one cache")]
    MultipleExclusive { addr: Addr },

    #[error("address {addr} is Exclusive in CPU {owner} but cached elsewhere")]
    ExclusiveNotAlone { addr: Addr, owner: CoreId },

    #[error("address {addr} is Owned in more than one cache")]
    MultipleOwners { addr: Addr },

    #[error("cached copies of address {addr} disagree on the value: {values:?}")]
    ValueMismatch { addr: Addr, values: Vec<u32> },

    #[error("memory is stale for address {addr} with no dirty copy: memory {mem:#x}, cache {cached:#x}")]
    StaleMemory { addr: Addr, mem: u32, cached: u32 },

    #[error("CPU {core} line {index} holds tag {tag}, which maps to index {expected}")]
    TagIndexMismatch {
        core: CoreId,
        index: usize,
        tag: Addr,
        expected: usize,
    },
}
