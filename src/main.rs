// Scripted scenarios exercising every MOESI transition, followed by the
// concurrent atomic-counter run.

use std::sync::Arc;
use std::thread;

use env_logger::Env;
use log::info;

use cachesim_moesi::commons::{Addr, AtomicOp, CpuOp, State, SystemSpec};
use cachesim_moesi::error::SimError;
use cachesim_moesi::processor::Processor;
use cachesim_moesi::sim::System;

fn run_read_write_suite() -> Result<(), SimError> {
    let sys = Arc::new(System::new(SystemSpec::default())?);
    let procs = Processor::attach_all(&sys);

    for (word, value) in [
        (1, 0x1111),
        (2, 0x2222),
        (3, 0x3333),
        (4, 0x4444),
        (5, 0x5555),
        (25, 0xABCD),
        (65, 0xAAAA),
        (75, 0xBBBB),
    ] {
        sys.write_word(word, value);
    }

    info!("=== shared creation: two cores read the same word ===");
    procs[2].execute(CpuOp::Read, Addr(4))?;
    procs[3].execute(CpuOp::Read, Addr(4))?;

    info!("=== a third reader joins, then upgrades to Modified ===");
    procs[0].execute(CpuOp::Read, Addr(4))?;
    procs[0].execute(CpuOp::Write(0x9999), Addr(4))?;

    info!("=== snoop read demotes Modified to Owned ===");
    procs[1].execute(CpuOp::Read, Addr(4))?;

    info!("=== exclusive fill and silent E -> M upgrade ===");
    procs[2].execute(CpuOp::Read, Addr(16))?;
    procs[2].execute(CpuOp::Write(0xDDDD), Addr(16))?;

    info!("=== conflict miss writes the dirty line back ===");
    // addr 0x104 shares index 1 with addr 4, evicting the Owned line
    procs[0].execute(CpuOp::Read, Addr(0x104))?;

    info!("=== store invalidates an Exclusive peer ===");
    procs[1].execute(CpuOp::Read, Addr(20))?;
    procs[2].execute(CpuOp::Write(0x8888), Addr(20))?;

    info!("=== store invalidates an Owned peer and its sharers ===");
    procs[0].execute(CpuOp::Write(0x6001), Addr(8))?;
    procs[1].execute(CpuOp::Read, Addr(8))?;
    procs[2].execute(CpuOp::Write(0x6666), Addr(8))?;

    info!("=== store then read back on one core ===");
    procs[0].execute(CpuOp::Write(0xC0DE), Addr(100))?;
    procs[0].execute(CpuOp::Read, Addr(100))?;

    info!("=== compare-and-swap: success, then failed compare ===");
    sys.write_word(250, 7);
    procs[0].execute(CpuOp::Atomic(AtomicOp::Cas { expected: 7, new: 42 }), Addr(1000))?;
    procs[1].execute(CpuOp::Atomic(AtomicOp::Cas { expected: 7, new: 99 }), Addr(1000))?;

    if let Err(violation) = sys.check_coherence() {
        panic!("coherence violation after scripted suite: {violation}");
    }
    print_stats(&sys);
    Ok(())
}

fn run_atomic_counter() -> Result<(), SimError> {
    const COUNTER: Addr = Addr(1000);

    let sys = Arc::new(System::new(SystemSpec::default())?);
    let num_procs = sys.spec().num_procs;

    info!("=== atomic counter: {num_procs} cores increment one word ===");
    let handles: Vec<_> = Processor::attach_all(&sys)
        .into_iter()
        .map(|proc| thread::spawn(move || proc.execute(CpuOp::Atomic(AtomicOp::Add(1)), COUNTER)))
        .collect();
    for handle in handles {
        handle.join().expect("core thread panicked")?;
    }

    for id in 0..num_procs {
        info!(
            "CPU {id}: line for {COUNTER} | state {} | value {:?}",
            sys.line_state(id, COUNTER),
            sys.line_value(id, COUNTER),
        );
    }

    let owner = (0..num_procs).find(|&id| sys.line_state(id, COUNTER) == State::Modified);
    match owner {
        Some(id) => {
            let value = sys.line_value(id, COUNTER).unwrap_or(0);
            let verdict = if value == num_procs as u32 { "ok" } else { "WRONG" };
            info!("final owner CPU {id} holds {value} (expected {num_procs}): {verdict}");
        }
        None => info!("no core ended with the counter in Modified state"),
    }

    if let Err(violation) = sys.check_coherence() {
        panic!("coherence violation after atomic counter: {violation}");
    }
    print_stats(&sys);
    Ok(())
}

fn print_stats(sys: &System) {
    let stats = sys.stats();
    let row = |v: &[u64]| {
        v.iter()
            .map(|x| format!("{x:<6}"))
            .collect::<Vec<_>>()
            .join(" | ")
    };
    info!("hits per core:   {}", row(&stats.hits));
    info!("misses per core: {}", row(&stats.misses));
    info!(
        "bus: {} transactions, {} invalidations, {} write-backs",
        stats.transactions, stats.invalidations, stats.write_backs
    );
}

fn main() -> Result<(), SimError> {
    let env = Env::default().filter_or("CACHESIM_LOG", "info");
    env_logger::init_from_env(env);

    run_read_write_suite()?;
    run_atomic_counter()?;
    Ok(())
}
