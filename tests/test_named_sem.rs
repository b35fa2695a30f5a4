// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Full behavioral contract for NamedSem.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use openisl_core::NamedSem;

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_name(prefix: &str) -> String {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_sem_{n}")
}

#[test]
fn named_constructor_with_count() {
    let name = unique_name("named_count");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 5).expect("open");
    drop(sem);
}

#[test]
fn named_constructor_zero_count() {
    let name = unique_name("zero_count");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");
    drop(sem);
}

#[test]
fn open() {
    let name = unique_name("open");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 3);
    assert!(sem.is_ok());
}

#[test]
fn clear_storage() {
    let name = unique_name("clear_storage");
    NamedSem::clear_storage(&name);

    {
        let _sem = NamedSem::open(&name, 1).expect("open");
    }

    NamedSem::clear_storage(&name);
}

#[test]
fn wait_post() {
    let name = unique_name("wait_post");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 1).expect("open");

    let acquired = sem.acquire(None).expect("acquire");
    assert!(acquired);

    sem.release(1).expect("release");
}

#[test]
fn post_with_count() {
    let name = unique_name("post_count");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");
    sem.release(5).expect("release 5");

    for _ in 0..5 {
        assert!(sem.acquire(Some(Duration::from_millis(10))).expect("acquire"));
    }
}

#[test]
fn timed_wait() {
    let name = unique_name("timed_wait");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 1).expect("open");
    let acquired = sem.acquire(Some(Duration::from_millis(100))).expect("acquire");
    assert!(acquired);
}

#[test]
fn wait_timeout() {
    let name = unique_name("wait_timeout");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");

    let start = Instant::now();
    let acquired = sem.acquire(Some(Duration::from_millis(50))).expect("acquire");
    let elapsed = start.elapsed();

    assert!(!acquired, "should timeout");
    assert!(elapsed.as_millis() >= 40, "should have waited ~50ms, got {}ms", elapsed.as_millis());
}

#[test]
fn infinite_wait() {
    let name = unique_name("infinite_wait");
    NamedSem::clear_storage(&name);

    let sem = Arc::new(NamedSem::open(&name, 0).expect("open"));
    let wait_started = Arc::new(AtomicBool::new(false));
    let wait_succeeded = Arc::new(AtomicBool::new(false));

    let sem2 = Arc::clone(&sem);
    let ws = Arc::clone(&wait_started);
    let wsucc = Arc::clone(&wait_succeeded);
    let waiter = thread::spawn(move || {
        ws.store(true, Ordering::SeqCst);
        let result = sem2.acquire(None).expect("acquire");
        wsucc.store(result, Ordering::SeqCst);
    });

    while !wait_started.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(1));
    }
    thread::sleep(Duration::from_millis(50));

    sem.release(1).expect("release");

    waiter.join().unwrap();
    assert!(wait_succeeded.load(Ordering::SeqCst));
}

#[test]
fn producer_consumer() {
    let name = unique_name("prod_cons");
    NamedSem::clear_storage(&name);

    let sem = Arc::new(NamedSem::open(&name, 0).expect("open"));
    let produced = Arc::new(AtomicI32::new(0));
    let consumed = Arc::new(AtomicI32::new(0));
    let count = 10;

    let sem_p = Arc::clone(&sem);
    let prod = Arc::clone(&produced);
    let producer = thread::spawn(move || {
        for _ in 0..count {
            prod.fetch_add(1, Ordering::Relaxed);
            sem_p.release(1).expect("release");
            thread::sleep(Duration::from_millis(1));
        }
    });

    let sem_c = Arc::clone(&sem);
    let cons = Arc::clone(&consumed);
    let consumer = thread::spawn(move || {
        for _ in 0..count {
            sem_c.acquire(None).expect("acquire");
            cons.fetch_add(1, Ordering::Relaxed);
        }
    });

    producer.join().unwrap();
    consumer.join().unwrap();

    assert_eq!(produced.load(Ordering::Relaxed), count);
    assert_eq!(consumed.load(Ordering::Relaxed), count);
}

#[test]
fn multiple_producers_consumers() {
    let name = unique_name("multi_prod_cons");
    NamedSem::clear_storage(&name);

    let sem = Arc::new(NamedSem::open(&name, 0).expect("open"));
    let total_produced = Arc::new(AtomicI32::new(0));
    let total_consumed = Arc::new(AtomicI32::new(0));
    let items_per = 5;
    let num_producers = 3;
    let num_consumers = 3;

    let mut handles = Vec::new();

    for _ in 0..num_producers {
        let sem = Arc::clone(&sem);
        let tp = Arc::clone(&total_produced);
        handles.push(thread::spawn(move || {
            for _ in 0..items_per {
                tp.fetch_add(1, Ordering::Relaxed);
                sem.release(1).expect("release");
                thread::yield_now();
            }
        }));
    }

    for _ in 0..num_consumers {
        let sem = Arc::clone(&sem);
        let tc = Arc::clone(&total_consumed);
        handles.push(thread::spawn(move || {
            for _ in 0..items_per {
                if sem.acquire(Some(Duration::from_millis(1000))).expect("acquire") {
                    tc.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(total_produced.load(Ordering::Relaxed), items_per * num_producers);
    assert_eq!(total_consumed.load(Ordering::Relaxed), items_per * num_producers);
}

#[test]
fn initial_count() {
    let name = unique_name("initial_count");
    NamedSem::clear_storage(&name);

    let initial = 3u32;
    let sem = NamedSem::open(&name, initial).expect("open");

    for _ in 0..initial {
        assert!(sem.acquire(Some(Duration::from_millis(10))).expect("acquire"));
    }

    // Next wait should timeout
    assert!(!sem.acquire(Some(Duration::from_millis(10))).expect("acquire timeout"));
}

#[test]
fn rapid_post() {
    let name = unique_name("rapid_post");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");
    let post_count = 100;

    for _ in 0..post_count {
        sem.release(1).expect("release");
    }

    let mut wait_count = 0;
    for _ in 0..post_count {
        if sem.acquire(Some(Duration::from_millis(10))).expect("acquire") {
            wait_count += 1;
        }
    }

    assert_eq!(wait_count, post_count);
}

#[test]
fn concurrent_post() {
    let name = unique_name("concurrent_post");
    NamedSem::clear_storage(&name);

    let sem = Arc::new(NamedSem::open(&name, 0).expect("open"));
    let post_count = Arc::new(AtomicI32::new(0));
    let threads = 5;
    let posts_per_thread = 10;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let sem = Arc::clone(&sem);
            let pc = Arc::clone(&post_count);
            thread::spawn(move || {
                for _ in 0..posts_per_thread {
                    sem.release(1).expect("release");
                    pc.fetch_add(1, Ordering::Relaxed);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(post_count.load(Ordering::Relaxed), threads * posts_per_thread);

    // Verify by consuming
    let mut consumed = 0;
    for _ in 0..(threads * posts_per_thread) {
        if sem.acquire(Some(Duration::from_millis(10))).expect("acquire") {
            consumed += 1;
        }
    }
    assert_eq!(consumed, threads * posts_per_thread);
}

#[test]
fn named_semaphore_sharing() {
    let name = unique_name("sharing");
    NamedSem::clear_storage(&name);

    let value = Arc::new(AtomicI32::new(0));

    let name1 = name.clone();
    let val1 = Arc::clone(&value);
    let t1 = thread::spawn(move || {
        let sem = NamedSem::open(&name1, 0).expect("open t1");
        sem.acquire(None).expect("acquire");
        val1.store(100, Ordering::SeqCst);
    });

    let name2 = name.clone();
    let t2 = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        let sem = NamedSem::open(&name2, 0).expect("open t2");
        sem.release(1).expect("release");
    });

    t1.join().unwrap();
    t2.join().unwrap();

    assert_eq!(value.load(Ordering::SeqCst), 100);
}

#[test]
fn post_multiple() {
    let name = unique_name("post_multiple");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");
    let count = 10u32;

    sem.release(count).expect("release multiple");

    for _ in 0..count {
        assert!(sem.acquire(Some(Duration::from_millis(10))).expect("acquire"));
    }

    // Should be empty
    assert!(!sem.acquire(Some(Duration::from_millis(10))).expect("acquire empty"));
}

#[test]
fn zero_timeout() {
    let name = unique_name("zero_timeout");
    NamedSem::clear_storage(&name);

    let sem = NamedSem::open(&name, 0).expect("open");
    let _ = sem.acquire(Some(Duration::from_millis(0))).expect("acquire zero timeout");
    // Just ensure it doesn't hang
}

#[test]
fn high_frequency() {
    let name = unique_name("high_freq");
    NamedSem::clear_storage(&name);

    let sem = Arc::new(NamedSem::open(&name, 0).expect("open"));

    let sem_p = Arc::clone(&sem);
    let poster = thread::spawn(move || {
        for _ in 0..1000 {
            sem_p.release(1).expect("release");
        }
    });

    let sem_w = Arc::clone(&sem);
    let waiter = thread::spawn(move || {
        for _ in 0..1000 {
            sem_w.acquire(Some(Duration::from_millis(100))).expect("acquire");
        }
    });

    poster.join().unwrap();
    waiter.join().unwrap();
}
