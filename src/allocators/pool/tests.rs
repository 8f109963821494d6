use std::sync::Arc;
use std::thread;

use super::*;

#[repr(C, align(16))]
struct Aligned<const N: usize>([u8; N]);

fn pool_buffer(chunk_size: usize, chunk_count: usize) -> Vec<u128> {
    let size = PoolAllocator::buffer_size(chunk_size, chunk_count).unwrap();
    vec![0_u128; size / size_of::<u128>()]
}

fn as_bytes(buf: &mut [u128]) -> &mut [u8] {
    let len = core::mem::size_of_val(buf);
    unsafe { core::slice::from_raw_parts_mut(buf.as_mut_ptr().cast(), len) }
}

#[test]
fn test_buffer_size_1() {
    assert_eq!(PoolAllocator::buffer_size(16, 4), Some(64));
    assert_eq!(PoolAllocator::buffer_size(24, 4), Some(128));
    assert_eq!(PoolAllocator::buffer_size(1, 1), Some(16));
    assert_eq!(PoolAllocator::buffer_size(usize::MAX, 1), None);
    assert_eq!(PoolAllocator::buffer_size(32, usize::MAX), None);
}

#[test]
fn test_new_1() {
    let mut buf = Aligned([0_u8; 128]);
    assert!(matches!(
        PoolAllocator::new(0, 4, &mut buf.0),
        Err(AllocError::InvalidArgument(_))
    ));
    assert!(matches!(
        PoolAllocator::new(16, 0, &mut buf.0),
        Err(AllocError::InvalidArgument(_))
    ));
    assert!(matches!(
        PoolAllocator::new(16, 9, &mut buf.0),
        Err(AllocError::InvalidArgument(_))
    ));
    assert!(matches!(
        PoolAllocator::new(16, 4, &mut buf.0[8..]),
        Err(AllocError::InvalidArgument(_))
    ));

    let pool = PoolAllocator::new(24, 4, &mut buf.0).unwrap();
    assert_eq!(pool.chunk_size(), 32);
    assert_eq!(pool.chunk_count(), 4);
    assert_eq!(pool.head(), 0);
    assert_eq!(pool.free_count(), 4);
    assert_eq!(pool.initialized_count(), 0);
    assert_eq!(pool.size(), 0);
    assert!(pool.can_free());
    assert!(pool.validate());
}

#[test]
fn test_1() {
    let mut buf = Aligned([0_u8; 64]);
    let pool = PoolAllocator::new(16, 4, &mut buf.0).unwrap();

    let chunks: Vec<_> = (0..3).map(|_| pool.alloc_chunk().unwrap()).collect();
    assert_eq!(chunks.iter().map(|c| c.get()).collect::<Vec<_>>(), [0, 1, 2]);
    assert_eq!(pool.initialized_count(), 3);
    assert_eq!(pool.head(), 3);
    assert_eq!(pool.size(), 48);
    assert!(pool.validate());

    unsafe {
        pool.free_chunk(chunks[0]);
        pool.free_chunk(chunks[2]);
    }
    assert_eq!(pool.head(), 2);
    assert_eq!(pool.free_count(), 3);
    assert_eq!(pool.size(), 16);
    assert!(pool.validate());

    assert_eq!(pool.alloc_chunk().unwrap().get(), 2);
    assert_eq!(pool.alloc_chunk().unwrap().get(), 0);
    assert_eq!(pool.alloc_chunk().unwrap().get(), 3);
    assert_eq!(pool.head(), NO_CHUNK);
    assert_eq!(pool.initialized_count(), 4);
    assert_eq!(pool.free_count(), 0);
    assert_eq!(pool.size(), 64);
    assert!(pool.validate());

    assert_eq!(pool.alloc_chunk().unwrap_err(), AllocError::OutOfMemory);
    assert_eq!(pool.size(), 64);
}

#[test]
fn test_2() {
    let mut buf = pool_buffer(24, 10);
    let pool = PoolAllocator::new(24, 10, as_bytes(&mut buf)).unwrap();
    let start = pool.buffer().as_ptr();

    assert!(matches!(pool.alloc(0), Err(AllocError::InvalidArgument(_))));
    assert!(matches!(pool.alloc(33), Err(AllocError::InvalidArgument(_))));

    let mut ptrs = vec![];
    for i in 0..10 {
        let p = pool.alloc(if i % 2 == 0 { 24 } else { 32 }).unwrap();
        assert_eq!(p.as_ptr(), unsafe { start.add(i * 32) });
        assert_eq!(pool.chunk_index(p).get(), i);
        assert_eq!(pool.free_count(), 9 - i);
        ptrs.push(p);
    }
    assert_eq!(pool.alloc(1).unwrap_err(), AllocError::OutOfMemory);

    for (i, &p) in ptrs.iter().enumerate().rev() {
        unsafe { pool.free(p).unwrap() };
        assert_eq!(pool.head(), i);
        assert_eq!(pool.size(), i * 32);
        assert!(pool.validate());
    }

    // Chunks come back in the order they were returned.
    for &p in ptrs.iter() {
        assert_eq!(pool.alloc(8).unwrap(), p);
    }
}

#[test]
fn test_3() {
    let mut buf = Aligned([0_u8; 16]);
    let pool = PoolAllocator::new(8, 1, &mut buf.0).unwrap();

    for _ in 0..3 {
        let p = pool.alloc(8).unwrap();
        assert_eq!(pool.head(), NO_CHUNK);
        assert_eq!(pool.alloc(8).unwrap_err(), AllocError::OutOfMemory);
        unsafe { pool.free(p).unwrap() };
        assert_eq!(pool.head(), 0);
        assert!(pool.validate());
    }
}

#[test]
fn test_reset_1() {
    let mut buf = Aligned([0_u8; 64]);
    let mut pool = PoolAllocator::new(16, 4, &mut buf.0).unwrap();

    while pool.alloc_chunk().is_ok() {}
    assert_eq!(pool.free_count(), 0);

    pool.reset();
    assert_eq!(pool.head(), 0);
    assert_eq!(pool.free_count(), 4);
    assert_eq!(pool.initialized_count(), 0);
    assert_eq!(pool.size(), 0);
    assert!(pool.validate());
    assert_eq!(pool.alloc_chunk().unwrap().get(), 0);
}

#[test]
fn test_random_1() {
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const COUNT: usize = 64;
    let mut buf = pool_buffer(40, COUNT);
    let pool = PoolAllocator::new(40, COUNT, as_bytes(&mut buf)).unwrap();
    let mut rng = StdRng::seed_from_u64(7);
    let mut live: Vec<ChunkIndex> = vec![];

    for _ in 0..10_000 {
        if live.is_empty() || (live.len() < COUNT && rng.gen_bool(0.55)) {
            let chunk = pool.alloc_chunk().unwrap();
            assert!(!live.contains(&chunk));
            live.push(chunk);
        } else {
            let chunk = live.swap_remove(rng.gen_range(0..live.len()));
            unsafe { pool.free_chunk(chunk) };
        }
        assert_eq!(pool.free_count(), COUNT - live.len());
        assert_eq!(pool.size(), live.len() * pool.chunk_size());
    }
    assert!(pool.validate());
}

#[test]
fn test_threads_1() {
    const THREADS: usize = 100;
    const PER_THREAD: usize = 4;

    let mut buf = pool_buffer(16, THREADS * PER_THREAD);
    let pool = Arc::new(PoolAllocator::new(16, THREADS * PER_THREAD, as_bytes(&mut buf)).unwrap());

    thread::scope(|s| {
        for t in 0..THREADS {
            let pool = Arc::clone(&pool);
            s.spawn(move || {
                for round in 0..50 {
                    let chunks: Vec<_> = (0..PER_THREAD)
                        .map(|_| pool.alloc(16).unwrap())
                        .collect();
                    for (i, &p) in chunks.iter().enumerate() {
                        unsafe { p.as_ptr().cast::<usize>().write(t * 1000 + round * 10 + i) };
                    }
                    for (i, &p) in chunks.iter().enumerate() {
                        assert_eq!(unsafe { p.as_ptr().cast::<usize>().read() }, t * 1000 + round * 10 + i);
                        unsafe { pool.free(p).unwrap() };
                    }
                }
            });
        }
    });

    assert_eq!(pool.free_count(), THREADS * PER_THREAD);
    assert_eq!(pool.size(), 0);
    assert!(pool.validate());
}
