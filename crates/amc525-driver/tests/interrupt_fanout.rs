//! Interrupt fan-out to multiple readers

use amc525_chip::N_EVENT_READERS;
use amc525_driver::{EventReader, InterruptPool, ResourceError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

#[test]
fn test_every_reader_sees_one_delivery() {
    let pool = Arc::new(InterruptPool::new());
    let readers: Vec<_> = (0..5).map(|_| EventReader::open(&pool).unwrap()).collect();

    pool.deliver(0x8);
    for reader in &readers {
        assert!(reader.ready());
    }

    // Consuming on one slot leaves the others untouched
    assert_eq!(readers[2].read(false), Ok(0x8));
    assert!(!readers[2].ready());
    for (i, reader) in readers.iter().enumerate() {
        if i != 2 {
            assert!(reader.ready());
            assert_eq!(reader.read(true), Ok(0x8));
        }
    }
}

#[test]
fn test_slow_reader_accumulates() {
    let pool = Arc::new(InterruptPool::new());
    let fast = EventReader::open(&pool).unwrap();
    let slow = EventReader::open(&pool).unwrap();

    pool.deliver(0x1);
    assert_eq!(fast.read(false), Ok(0x1));
    pool.deliver(0x2);
    assert_eq!(fast.read(false), Ok(0x2));
    pool.deliver(0x1);

    assert_eq!(slow.read(false), Ok(0x3));
    assert_eq!(fast.read(false), Ok(0x1));
}

#[test]
fn test_slots_exhaust_and_recover() {
    let pool = Arc::new(InterruptPool::new());
    let mut readers: Vec<_> = (0..N_EVENT_READERS)
        .map(|_| EventReader::open(&pool).unwrap())
        .collect();
    assert_eq!(
        EventReader::open(&pool).unwrap_err(),
        ResourceError::Exhausted
    );

    readers.pop();
    let reader = EventReader::open(&pool).unwrap();
    assert_eq!(reader.slot().index(), N_EVENT_READERS - 1);
}

#[test]
fn test_concurrent_claims_never_share_a_slot() {
    let pool = Arc::new(InterruptPool::new());
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                pool.assign_slot().ok()
            })
        })
        .collect();

    let mut slots: Vec<_> = handles
        .into_iter()
        .filter_map(|h| h.join().unwrap())
        .map(|slot| slot.index())
        .collect();
    slots.sort_unstable();
    assert_eq!(slots, (0..N_EVENT_READERS).collect::<Vec<_>>());
}

#[test]
fn test_blocked_readers_all_wake() {
    let pool = Arc::new(InterruptPool::new());
    let started = Arc::new(Barrier::new(4));

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let reader = EventReader::open(&pool).unwrap();
            let started = Arc::clone(&started);
            thread::spawn(move || {
                started.wait();
                reader.read(true)
            })
        })
        .collect();

    started.wait();
    thread::sleep(Duration::from_millis(20));
    pool.deliver(0x10);

    for consumer in consumers {
        assert_eq!(consumer.join().unwrap(), Ok(0x10));
    }
}

#[test]
fn test_no_events_lost_under_stress() {
    const ROUNDS: u32 = 2000;

    let pool = Arc::new(InterruptPool::new());
    let received = Arc::new(AtomicU32::new(0));
    let consumers: Vec<_> = (0..4)
        .map(|_| {
            let reader = EventReader::open(&pool).unwrap();
            let received = Arc::clone(&received);
            thread::spawn(move || {
                let mut seen = 0u32;
                while seen != u32::MAX {
                    seen |= reader.read(true).unwrap();
                }
                received.fetch_add(1, Ordering::Relaxed);
            })
        })
        .collect();

    // Each bit is delivered many times; every reader must end up with all 32
    for round in 0..ROUNDS {
        pool.deliver(1 << (round % 32));
    }

    for consumer in consumers {
        consumer.join().unwrap();
    }
    assert_eq!(received.load(Ordering::Relaxed), 4);
}

#[test]
fn test_churning_readers_keep_their_deliveries() {
    const THREADS: usize = 16;
    const ROUNDS: usize = 100_000;

    // Twice as many threads as slots, so claims and releases constantly race
    // with deliveries from other threads
    let pool = Arc::new(InterruptPool::new());
    let lost = Arc::new(AtomicU32::new(0));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let pool = Arc::clone(&pool);
            let lost = Arc::clone(&lost);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let Ok(reader) = EventReader::open(&pool) else {
                        continue;
                    };
                    pool.deliver(1);
                    if !reader.ready() {
                        lost.fetch_add(1, Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(lost.load(Ordering::Relaxed), 0);
}
