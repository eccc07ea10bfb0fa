// Ordered trace of the simulation. Because the bus serializes every CPU
// operation, the event order is a total order.

use std::fmt;

use log::info;

use crate::commons::{Addr, BusOp, CoreId, DataSource, State};

/// One witnessed step of the simulation.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceEvent {
    /// A CPU operation entered the bus-serialized region.
    OpStart {
        core: CoreId,
        op: &'static str,
        addr: Addr,
    },
    /// Hit/miss classification, with the state of the occupying line.
    Access {
        core: CoreId,
        addr: Addr,
        index: usize,
        hit: bool,
        state: State,
    },
    /// The initiator put a transaction on the bus.
    BusRequest {
        core: CoreId,
        op: BusOp,
        addr: Addr,
    },
    /// A snooping cache found a matching valid line.
    SnoopHit {
        core: CoreId,
        addr: Addr,
        state: State,
    },
    /// A snooping cache changed state in response to the transaction.
    SnoopTransition {
        core: CoreId,
        from: State,
        to: State,
    },
    /// Which party answered a bus read, and with what value.
    DataSupplied { source: DataSource, value: u32 },
    /// A dirty victim line was written back to memory.
    WriteBack {
        core: CoreId,
        addr: Addr,
        value: u32,
    },
    /// The initiator's own line changed state.
    RequesterTransition {
        core: CoreId,
        from: State,
        to: State,
    },
    /// A read-modify-write was applied to the now-exclusive line.
    AtomicApplied { core: CoreId, old: u32, new: u32 },
    /// The CPU operation completed.
    OpDone {
        core: CoreId,
        value: u32,
        state: State,
    },
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            TraceEvent::OpStart { core, op, addr } => {
                write!(f, "CPU {core}: exec {op} @ {addr}")
            }
            TraceEvent::Access { core, addr, index, hit, state } => {
                let kind = if hit { "hit" } else { "miss" };
                write!(f, "CPU {core}: {kind} @ {addr} (index {index}) | state {state}")
            }
            TraceEvent::BusRequest { core, op, addr } => {
                write!(f, "CPU {core}: bus request {op} @ {addr}")
            }
            TraceEvent::SnoopHit { core, addr, state } => {
                write!(f, "CPU {core}: snoop hit @ {addr} | state {state}")
            }
            TraceEvent::SnoopTransition { core, from, to } => {
                write!(f, "CPU {core}: snoop transition [{from} -> {to}]")
            }
            TraceEvent::DataSupplied { source, value } => {
                write!(f, "data supplied by {source} | value {value:#x}")
            }
            TraceEvent::WriteBack { core, addr, value } => {
                write!(f, "CPU {core}: wrote back {value:#x} to {addr}")
            }
            TraceEvent::RequesterTransition { core, from, to } => {
                write!(f, "CPU {core}: transition [{from} -> {to}]")
            }
            TraceEvent::AtomicApplied { core, old, new } => {
                write!(f, "CPU {core}: atomic update {old:#x} -> {new:#x}")
            }
            TraceEvent::OpDone { core, value, state } => {
                write!(f, "CPU {core}: done | value {value:#x} | state {state}")
            }
        }
    }
}

/// Append-only event sink. Every event is also rendered as one log line
/// the moment it is emitted.
#[derive(Default)]
pub struct Tracer {
    events: Vec<TraceEvent>,
}

impl Tracer {
    pub fn emit(&mut self, event: TraceEvent) {
        info!("{event}");
        self.events.push(event);
    }

    pub fn events(&self) -> &[TraceEvent] {
        &self.events
    }
}
