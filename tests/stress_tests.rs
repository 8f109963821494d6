use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use rand::{random, thread_rng, Rng};
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use seabed::allocators::{Allocator, PoolAllocator, SystemAllocator, NO_LIMIT};
use seabed::thread::{Lifetime, ReadWriteLock, Task, TaskQueue, ThreadPool};
use seabed::ALLOC_ALIGNMENT;

const THREAD_COUNT: usize = 16;

/// Turns on diagnostics for `RUST_LOG=seabed=debug cargo test`.
fn init_tracing() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(Layer::new().with_test_writer())
        .try_init();
}

#[test]
fn stress_test_1() {
    init_tracing();
    let allocator = SystemAllocator::new(NO_LIMIT).unwrap();

    thread::scope(|s| {
        for _ in 0..THREAD_COUNT {
            s.spawn(|| {
                let mut rng = thread_rng();
                let mut live: Vec<(NonNull<u8>, usize, u8)> = vec![];
                for _ in 0..2_000 {
                    if live.is_empty() || rng.gen_bool(0.6) {
                        let size = rng.gen_range(1..=512);
                        let ptr = allocator.alloc(size).unwrap();
                        assert_eq!(ptr.as_ptr() as usize % ALLOC_ALIGNMENT, 0);
                        let mark = random::<u8>();
                        unsafe { ptr.as_ptr().write_bytes(mark, size) };
                        live.push((ptr, size, mark));
                    } else {
                        let (ptr, size, mark) = live.swap_remove(rng.gen_range(0..live.len()));
                        let bytes = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), size) };
                        assert!(bytes.iter().all(|&b| b == mark), "Allocation was overwritten.");
                        unsafe { allocator.free(ptr).unwrap() };
                    }
                }
                for (ptr, _, _) in live {
                    unsafe { allocator.free(ptr).unwrap() };
                }
            });
        }
    });

    assert_eq!(allocator.size(), 0);
    assert_eq!(allocator.current_allocations(), 0);
    assert!(allocator.total_allocations() >= THREAD_COUNT * 2_000 / 2);
}

#[test]
fn stress_test_2() {
    init_tracing();
    const CHUNK_SIZE: usize = 48;
    const CHUNK_COUNT: usize = 256;

    #[repr(C, align(16))]
    struct Storage([u8; CHUNK_SIZE * CHUNK_COUNT]);
    let mut storage = Box::new(Storage([0; CHUNK_SIZE * CHUNK_COUNT]));
    let pool = PoolAllocator::new(CHUNK_SIZE, CHUNK_COUNT, &mut storage.0).unwrap();
    let exhausted = AtomicUsize::new(0);

    thread::scope(|s| {
        for t in 0..THREAD_COUNT {
            let pool = &pool;
            let exhausted = &exhausted;
            s.spawn(move || {
                let mut rng = thread_rng();
                let mut live: Vec<NonNull<u8>> = vec![];
                let mark = t as u8;
                for _ in 0..5_000 {
                    if live.is_empty() || rng.gen_bool(0.5) {
                        match pool.alloc(rng.gen_range(1..=CHUNK_SIZE)) {
                            Ok(ptr) => {
                                unsafe { ptr.as_ptr().write_bytes(mark, CHUNK_SIZE) };
                                live.push(ptr);
                            }
                            Err(_) => {
                                exhausted.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                    } else {
                        let ptr = live.swap_remove(rng.gen_range(0..live.len()));
                        let chunk = unsafe { std::slice::from_raw_parts(ptr.as_ptr(), CHUNK_SIZE) };
                        assert!(chunk.iter().all(|&b| b == mark), "Chunk handed out twice.");
                        unsafe { pool.free(ptr).unwrap() };
                    }
                }
                for ptr in live {
                    unsafe { pool.free(ptr).unwrap() };
                }
            });
        }
    });

    assert_eq!(pool.free_count(), CHUNK_COUNT);
    assert_eq!(pool.size(), 0);
    assert!(pool.validate());
}

#[test]
fn stress_test_3() {
    init_tracing();
    let allocator = SystemAllocator::new(NO_LIMIT).unwrap();
    let value = vec![1_u64, 2, 3];
    let in_use = AtomicUsize::new(0);
    let destroyed = AtomicBool::new(false);

    let lifetime = unsafe { Lifetime::new(Some(&allocator), NonNull::from(&value)) }.unwrap();
    thread::scope(|s| {
        for _ in 0..THREAD_COUNT {
            let lifetime = lifetime.clone();
            let in_use = &in_use;
            let destroyed = &destroyed;
            s.spawn(move || loop {
                match lifetime.acquire() {
                    Some(guard) => {
                        assert!(!destroyed.load(Ordering::SeqCst), "Acquired after destroy.");
                        in_use.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(guard.iter().sum::<u64>(), 6);
                        thread::yield_now();
                        in_use.fetch_sub(1, Ordering::SeqCst);
                    }
                    None => break,
                }
            });
        }

        thread::sleep(std::time::Duration::from_millis(20));
        lifetime.destroy().unwrap();
        // No acquire is outstanding once destroy returns.
        assert_eq!(in_use.load(Ordering::SeqCst), 0);
        destroyed.store(true, Ordering::SeqCst);
    });

    assert_eq!(lifetime.ref_count(), 1);
    drop(lifetime);
    assert_eq!(allocator.current_allocations(), 0);
}

#[test]
fn stress_test_4() {
    init_tracing();
    let pool = ThreadPool::new(4).unwrap();
    let queue = TaskQueue::new(&pool, 32, 3).unwrap();
    let expected = AtomicUsize::new(0);
    let executed = Arc::new(AtomicUsize::new(0));

    thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let mut rng = thread_rng();
                for _ in 0..200 {
                    let count = rng.gen_range(1..=40);
                    expected.fetch_add(count, Ordering::SeqCst);
                    queue.add_tasks((0..count).map(|_| {
                        let executed = Arc::clone(&executed);
                        Box::new(move || {
                            executed.fetch_add(1, Ordering::SeqCst);
                        }) as Task
                    }));
                }
            });
        }
    });

    queue.wait_for_tasks();
    assert_eq!(executed.load(Ordering::SeqCst), expected.load(Ordering::SeqCst));
    assert_eq!(queue.executing_tasks(), 0);
    drop(queue);
    pool.shutdown().unwrap();
}

#[test]
fn stress_test_5() {
    init_tracing();
    let lock = ReadWriteLock::new(vec![0_u32; 64]);

    thread::scope(|s| {
        for _ in 0..THREAD_COUNT {
            s.spawn(|| {
                let mut rng = thread_rng();
                for _ in 0..2_000 {
                    if rng.gen_ratio(1, 8) {
                        let mut values = lock.write();
                        for v in values.iter_mut() {
                            *v += 1;
                        }
                    } else {
                        let values = lock.read();
                        let first = values[0];
                        assert!(values.iter().all(|&v| v == first), "Read a partial write.");
                    }
                }
            });
        }
    });

    let values = lock.into_inner();
    assert!(values.iter().all(|&v| v == values[0]));
}
