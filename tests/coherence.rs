// End-to-end protocol scenarios: every assertion here follows the MOESI
// transition tables, with the invariant checker run after each step.

use std::sync::Arc;
use std::thread;

use cachesim_moesi::commons::{Addr, AtomicOp, BusOp, CpuOp, DataSource, State, SystemSpec};
use cachesim_moesi::error::SimError;
use cachesim_moesi::processor::Processor;
use cachesim_moesi::sim::System;
use cachesim_moesi::trace::TraceEvent;

fn system() -> Arc<System> {
    Arc::new(System::new(SystemSpec::default()).unwrap())
}

#[test]
fn first_reader_fills_exclusive() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(1, 0x1111);

    let value = procs[2].execute(CpuOp::Read, Addr(4)).unwrap();
    assert_eq!(value, 0x1111);
    assert_eq!(sys.line_state(2, Addr(4)), State::Exclusive);
    sys.check_coherence().unwrap();
}

#[test]
fn second_reader_demotes_exclusive_to_shared() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(1, 0x1111);

    procs[2].execute(CpuOp::Read, Addr(4)).unwrap();
    procs[3].execute(CpuOp::Read, Addr(4)).unwrap();

    assert_eq!(sys.line_state(2, Addr(4)), State::Shared);
    assert_eq!(sys.line_state(3, Addr(4)), State::Shared);
    assert_eq!(sys.line_value(2, Addr(4)), Some(0x1111));
    assert_eq!(sys.line_value(3, Addr(4)), Some(0x1111));
    assert_eq!(sys.read_word(1), 0x1111);
    sys.check_coherence().unwrap();
}

#[test]
fn store_to_shared_upgrades_and_invalidates_sharers() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(1, 0x1111);

    procs[2].execute(CpuOp::Read, Addr(4)).unwrap();
    procs[3].execute(CpuOp::Read, Addr(4)).unwrap();
    procs[0].execute(CpuOp::Read, Addr(4)).unwrap();
    procs[0].execute(CpuOp::Write(0x9999), Addr(4)).unwrap();

    assert_eq!(sys.line_state(0, Addr(4)), State::Modified);
    assert_eq!(sys.line_value(0, Addr(4)), Some(0x9999));
    assert_eq!(sys.line_state(2, Addr(4)), State::Invalid);
    assert_eq!(sys.line_state(3, Addr(4)), State::Invalid);
    // no write-back happened, memory still has the old value
    assert_eq!(sys.read_word(1), 0x1111);
    sys.check_coherence().unwrap();

    // the upgrade went out as BusUpgr, not BusRdX
    assert!(sys.trace().contains(&TraceEvent::BusRequest {
        core: 0,
        op: BusOp::BusUpgr,
        addr: Addr(4),
    }));
}

#[test]
fn snoop_read_demotes_modified_to_owned() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(1, 0x1111);

    procs[0].execute(CpuOp::Write(0x9999), Addr(4)).unwrap();
    let value = procs[1].execute(CpuOp::Read, Addr(4)).unwrap();

    assert_eq!(value, 0x9999);
    assert_eq!(sys.line_state(0, Addr(4)), State::Owned);
    assert_eq!(sys.line_value(0, Addr(4)), Some(0x9999));
    assert_eq!(sys.line_state(1, Addr(4)), State::Shared);
    assert_eq!(sys.line_value(1, Addr(4)), Some(0x9999));
    assert_eq!(sys.read_word(1), 0x1111);
    sys.check_coherence().unwrap();

    // the Owned cache supplied the data, not memory
    assert!(sys.trace().contains(&TraceEvent::DataSupplied {
        source: DataSource::Cache(0),
        value: 0x9999,
    }));
}

#[test]
fn conflict_miss_writes_the_dirty_line_back() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(1, 0x1111);
    sys.write_word(65, 0xAAAA); // addr 0x104, same index as addr 4

    procs[0].execute(CpuOp::Write(0x9999), Addr(4)).unwrap();
    procs[1].execute(CpuOp::Read, Addr(4)).unwrap(); // core 0 now Owned

    let value = procs[0].execute(CpuOp::Read, Addr(0x104)).unwrap();
    assert_eq!(value, 0xAAAA);

    // the Owned victim went to memory before the refill
    assert_eq!(sys.read_word(1), 0x9999);
    assert!(sys.trace().contains(&TraceEvent::WriteBack {
        core: 0,
        addr: Addr(4),
        value: 0x9999,
    }));

    // nobody else held 0x104, so the refill is Exclusive
    assert_eq!(sys.line_state(0, Addr(0x104)), State::Exclusive);
    // the sharer of addr 4 is untouched by the write-back
    assert_eq!(sys.line_state(1, Addr(4)), State::Shared);
    assert_eq!(sys.line_value(1, Addr(4)), Some(0x9999));
    sys.check_coherence().unwrap();
}

#[test]
fn write_back_is_idempotent() {
    let sys = system();
    let procs = Processor::attach_all(&sys);

    // two evictions of the same (addr, value) pair leave memory exactly
    // as one does
    procs[0].execute(CpuOp::Write(0xCAFE), Addr(4)).unwrap();
    procs[0].execute(CpuOp::Read, Addr(0x104)).unwrap();
    assert_eq!(sys.read_word(1), 0xCAFE);

    procs[0].execute(CpuOp::Write(0xCAFE), Addr(4)).unwrap();
    procs[0].execute(CpuOp::Read, Addr(0x104)).unwrap();
    assert_eq!(sys.read_word(1), 0xCAFE);

    let write_backs = sys
        .trace()
        .iter()
        .filter(|ev| matches!(ev, TraceEvent::WriteBack { addr: Addr(4), .. }))
        .count();
    assert_eq!(write_backs, 2);
    sys.check_coherence().unwrap();
}

#[test]
fn store_invalidates_exclusive_and_owned_peers() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(5, 0x5555);

    // E -> I on a peer store
    procs[1].execute(CpuOp::Read, Addr(20)).unwrap();
    assert_eq!(sys.line_state(1, Addr(20)), State::Exclusive);
    procs[2].execute(CpuOp::Write(0x8888), Addr(20)).unwrap();
    assert_eq!(sys.line_state(1, Addr(20)), State::Invalid);
    assert_eq!(sys.line_state(2, Addr(20)), State::Modified);
    sys.check_coherence().unwrap();

    // O -> I on a peer store
    procs[0].execute(CpuOp::Write(0x6001), Addr(8)).unwrap();
    procs[1].execute(CpuOp::Read, Addr(8)).unwrap();
    assert_eq!(sys.line_state(0, Addr(8)), State::Owned);
    procs[2].execute(CpuOp::Write(0x6666), Addr(8)).unwrap();
    assert_eq!(sys.line_state(0, Addr(8)), State::Invalid);
    assert_eq!(sys.line_state(1, Addr(8)), State::Invalid);
    assert_eq!(sys.line_state(2, Addr(8)), State::Modified);
    assert_eq!(sys.line_value(2, Addr(8)), Some(0x6666));
    sys.check_coherence().unwrap();
}

#[test]
fn store_miss_fetches_the_dirty_value_before_overwriting() {
    let sys = system();
    let procs = Processor::attach_all(&sys);

    procs[0].execute(CpuOp::Write(0x9999), Addr(4)).unwrap();
    procs[1].execute(CpuOp::Write(0x7777), Addr(4)).unwrap();

    assert_eq!(sys.line_state(0, Addr(4)), State::Invalid);
    assert_eq!(sys.line_state(1, Addr(4)), State::Modified);
    assert_eq!(sys.line_value(1, Addr(4)), Some(0x7777));
    // the Modified peer supplied its value on the BusRdX
    assert!(sys.trace().contains(&TraceEvent::DataSupplied {
        source: DataSource::Cache(0),
        value: 0x9999,
    }));
    sys.check_coherence().unwrap();
}

#[test]
fn store_then_load_on_one_core_returns_the_stored_value() {
    let sys = system();
    let procs = Processor::attach_all(&sys);

    procs[0].execute(CpuOp::Write(0xBEEF), Addr(100)).unwrap();

    // unrelated accesses by the same core, one of them evicting the line
    procs[0].execute(CpuOp::Read, Addr(8)).unwrap();
    procs[0].execute(CpuOp::Read, Addr(100 + 64 * 4)).unwrap();

    let value = procs[0].execute(CpuOp::Read, Addr(100)).unwrap();
    assert_eq!(value, 0xBEEF);
    sys.check_coherence().unwrap();
}

#[test]
fn cas_succeeds_then_fails_on_stale_expected() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(250, 7);

    let value = procs[0]
        .execute(CpuOp::Atomic(AtomicOp::Cas { expected: 7, new: 42 }), Addr(1000))
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(sys.line_state(0, Addr(1000)), State::Modified);

    // the compare fails, but ownership is still acquired
    let value = procs[1]
        .execute(CpuOp::Atomic(AtomicOp::Cas { expected: 7, new: 99 }), Addr(1000))
        .unwrap();
    assert_eq!(value, 42);
    assert_eq!(sys.line_state(1, Addr(1000)), State::Modified);
    assert_eq!(sys.line_value(1, Addr(1000)), Some(42));
    assert_eq!(sys.line_state(0, Addr(1000)), State::Invalid);
    sys.check_coherence().unwrap();
}

#[test]
fn atomic_hit_paths_all_end_modified() {
    let sys = system();
    let procs = Processor::attach_all(&sys);
    sys.write_word(2, 0b1010);

    // E hit
    procs[0].execute(CpuOp::Read, Addr(8)).unwrap();
    let value = procs[0]
        .execute(CpuOp::Atomic(AtomicOp::And(0b1100)), Addr(8))
        .unwrap();
    assert_eq!(value, 0b1000);
    assert_eq!(sys.line_state(0, Addr(8)), State::Modified);

    // S/O hit: a reader demotes the owner, then both atomics upgrade
    procs[1].execute(CpuOp::Read, Addr(8)).unwrap();
    assert_eq!(sys.line_state(0, Addr(8)), State::Owned);
    let value = procs[0]
        .execute(CpuOp::Atomic(AtomicOp::Or(0b0001)), Addr(8))
        .unwrap();
    assert_eq!(value, 0b1001);
    assert_eq!(sys.line_state(0, Addr(8)), State::Modified);
    assert_eq!(sys.line_state(1, Addr(8)), State::Invalid);

    // M hit
    let value = procs[0]
        .execute(CpuOp::Atomic(AtomicOp::Xor(0b1111)), Addr(8))
        .unwrap();
    assert_eq!(value, 0b0110);
    assert_eq!(sys.line_state(0, Addr(8)), State::Modified);
    sys.check_coherence().unwrap();
}

#[test]
fn concurrent_atomic_adds_serialize_to_the_full_count() {
    let sys = system();
    let num_procs = sys.spec().num_procs;

    let handles: Vec<_> = Processor::attach_all(&sys)
        .into_iter()
        .map(|proc| {
            thread::spawn(move || proc.execute(CpuOp::Atomic(AtomicOp::Add(1)), Addr(1000)))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let owners: Vec<_> = (0..num_procs)
        .filter(|&id| sys.line_state(id, Addr(1000)) == State::Modified)
        .collect();
    assert_eq!(owners.len(), 1, "exactly one core must end Modified");
    assert_eq!(sys.line_value(owners[0], Addr(1000)), Some(num_procs as u32));
    for id in 0..num_procs {
        if id != owners[0] {
            assert_eq!(sys.line_state(id, Addr(1000)), State::Invalid);
        }
    }
    sys.check_coherence().unwrap();
}

#[test]
fn trace_is_ordered_and_complete_for_a_remote_read() {
    let sys = system();
    let procs = Processor::attach_all(&sys);

    procs[0].execute(CpuOp::Write(0x9999), Addr(4)).unwrap();
    procs[1].execute(CpuOp::Read, Addr(4)).unwrap();

    let trace = sys.trace();
    let start = trace
        .iter()
        .position(|ev| matches!(ev, TraceEvent::OpStart { core: 1, .. }))
        .unwrap();
    let tail = &trace[start..];

    // the second operation's events appear in simulation order
    let expected = [
        TraceEvent::OpStart { core: 1, op: "Read", addr: Addr(4) },
        TraceEvent::Access { core: 1, addr: Addr(4), index: 1, hit: false, state: State::Invalid },
        TraceEvent::BusRequest { core: 1, op: BusOp::BusRd, addr: Addr(4) },
        TraceEvent::SnoopHit { core: 0, addr: Addr(4), state: State::Modified },
        TraceEvent::SnoopTransition { core: 0, from: State::Modified, to: State::Owned },
        TraceEvent::DataSupplied { source: DataSource::Cache(0), value: 0x9999 },
        TraceEvent::RequesterTransition { core: 1, from: State::Invalid, to: State::Shared },
        TraceEvent::OpDone { core: 1, value: 0x9999, state: State::Shared },
    ];
    assert_eq!(&tail[..expected.len()], &expected);
}

#[test]
fn invalid_addresses_are_rejected_without_side_effects() {
    let sys = system();
    let procs = Processor::attach_all(&sys);

    assert!(matches!(
        procs[0].execute(CpuOp::Read, Addr(3)),
        Err(SimError::Misaligned { .. })
    ));
    assert!(matches!(
        procs[0].execute(CpuOp::Write(1), Addr(2048 * 4)),
        Err(SimError::AddrOutOfRange { .. })
    ));
    assert!(sys.trace().is_empty());
    sys.check_coherence().unwrap();
}

#[test]
fn invalid_configurations_are_rejected() {
    for spec in [
        SystemSpec { num_procs: 0, ..Default::default() },
        SystemSpec { cache_size: 0, ..Default::default() },
        SystemSpec { mem_size: 0, ..Default::default() },
        SystemSpec { word_size: 0, ..Default::default() },
    ] {
        assert!(matches!(System::new(spec), Err(SimError::Config(_))));
    }
}

#[test]
fn non_default_geometry_still_coheres() {
    let spec = SystemSpec {
        num_procs: 2,
        cache_size: 8,
        mem_size: 64,
        word_size: 4,
    };
    let sys = Arc::new(System::new(spec).unwrap());
    let procs = Processor::attach_all(&sys);

    // walk every word, forcing wraparound evictions in the 8-line cache
    for word in 0..spec.mem_size {
        sys.write_word(word, word as u32);
    }
    for word in 0..spec.mem_size {
        let addr = Addr((word as u32) * spec.word_size);
        let value = procs[word % 2].execute(CpuOp::Read, addr).unwrap();
        assert_eq!(value, word as u32);
        sys.check_coherence().unwrap();
    }
}
