use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use dma_engine::{Counter, Descriptor, Direction, DmaCounter, DmaEngine, EngineConfig, EngineHandle};
use parking_lot::Mutex;
use pcie_transport::Transport;

use crate::harness::{link, pattern};

const THREADS: u16 = 4;
const PER_THREAD: u16 = 24;
const BLOCK: u32 = 96;

#[test]
fn submitters_race_a_ticking_engine() {
    let engine = DmaEngine::new(EngineConfig {
        op_table_size: 16,
        ..EngineConfig::default()
    })
    .unwrap();
    let handle = EngineHandle::new(engine);
    let source = pattern((THREADS * PER_THREAD) as usize * BLOCK as usize, 0x6B);
    handle.with_engine(|e| e.ram_mut().write(0, &source)).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let ticker = {
        let handle = handle.clone();
        let done = Arc::clone(&done);
        let statuses = Arc::clone(&statuses);
        thread::spawn(move || {
            let mut link = link();
            loop {
                link.tick();
                handle.tick(&mut link);
                while let Some(status) = handle.pop_status() {
                    statuses.lock().push(status);
                }
                if done.load(Ordering::Acquire) && handle.is_idle() {
                    break link;
                }
                thread::yield_now();
            }
        })
    };

    let submitters: Vec<_> = (0..THREADS)
        .map(|t| {
            let handle = handle.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let n = t * PER_THREAD + i;
                    let offset = u64::from(n) * u64::from(BLOCK);
                    let desc = Descriptor::write(0x8000 + offset, offset, BLOCK, n);
                    // Back off while the table is full.
                    loop {
                        match handle.submit(desc) {
                            Err(err) if err.is_retryable() => thread::yield_now(),
                            other => {
                                other.unwrap();
                                break;
                            }
                        }
                    }
                }
            })
        })
        .collect();
    for submitter in submitters {
        submitter.join().unwrap();
    }
    done.store(true, Ordering::Release);
    let link = ticker.join().unwrap();

    let statuses = statuses.lock();
    assert_eq!(statuses.len(), usize::from(THREADS * PER_THREAD));
    assert!(statuses.iter().all(|s| s.is_ok()));
    let tags: HashSet<u16> = statuses.iter().map(|s| s.tag).collect();
    assert_eq!(tags.len(), statuses.len(), "every tag retired once");

    assert_eq!(link.host().read_vec(0x8000, source.len()).unwrap(), source);
    let ops = handle.stats().get(Counter::Dma(Direction::Write, DmaCounter::OpCount));
    assert_eq!(ops, u64::from(THREADS * PER_THREAD));
}

#[test]
fn counters_are_readable_without_the_engine_lock() {
    let handle = EngineHandle::new(DmaEngine::new(EngineConfig::default()).unwrap());
    let stats = Arc::clone(handle.stats());
    handle.with_engine(|engine| {
        // The bank stays reachable while the engine is locked.
        engine.submit(Descriptor::write(0, 0, 0, 1)).unwrap();
        assert_eq!(stats.get(Counter::Dma(Direction::Write, DmaCounter::OpCount)), 1);
    });
}
