//! Reusable byte buffers for the copy → transmit hand-off.
//!
//! The copy stage acquires a buffer for every frame and the transmit
//! stage releases it after the write. With a fixed frame size the pool
//! settles at a handful of buffers and the hot path stops allocating.

use std::sync::Mutex;

/// Counters describing pool behaviour since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out that had to be freshly allocated.
    pub allocations: u64,
    /// Buffers handed out from the free list.
    pub reuses: u64,
    /// Buffers currently sitting in the free list.
    pub free: usize,
}

#[derive(Debug, Default)]
struct PoolInner {
    free: Vec<Vec<u8>>,
    allocations: u64,
    reuses: u64,
}

/// Thread-safe free list of byte buffers.
///
/// Growth is bounded by the number of frames in flight, which the
/// pipe's transmit queue cap keeps small.
#[derive(Debug, Default)]
pub struct BufferPool {
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a buffer of exactly `size_hint` bytes.
    ///
    /// A pooled buffer with the same length is preferred so its contents
    /// can be overwritten in place; otherwise a zeroed one is allocated.
    pub fn acquire(&self, size_hint: usize) -> Vec<u8> {
        self.take_exact(size_hint)
            .unwrap_or_else(|| vec![0u8; size_hint])
    }

    /// Take a buffer holding a copy of `bytes`.
    ///
    /// A pooled buffer of the same length is overwritten; otherwise the
    /// copy is allocated directly, without zero-filling first.
    pub fn acquire_copy(&self, bytes: &[u8]) -> Vec<u8> {
        match self.take_exact(bytes.len()) {
            Some(mut buf) => {
                buf.copy_from_slice(bytes);
                buf
            }
            None => bytes.to_vec(),
        }
    }

    fn take_exact(&self, len: usize) -> Option<Vec<u8>> {
        let mut inner = self.lock();
        match inner.free.iter().position(|b| b.len() == len) {
            Some(pos) => {
                inner.reuses += 1;
                Some(inner.free.swap_remove(pos))
            }
            None => {
                inner.allocations += 1;
                None
            }
        }
    }

    /// Return a buffer for later reuse.
    pub fn release(&self, buf: Vec<u8>) {
        self.lock().free.push(buf);
    }

    /// Drop every pooled buffer.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.free.clear();
        inner.free.shrink_to_fit();
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.lock();
        PoolStats {
            allocations: inner.allocations,
            reuses: inner.reuses,
            free: inner.free.len(),
        }
    }

    // A panic while holding the lock cannot leave the free list in a torn
    // state, so poisoning is ignored.
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_pool_allocates() {
        let pool = BufferPool::new();
        let buf = pool.acquire(16);
        assert_eq!(buf.len(), 16);
        assert_eq!(pool.stats().allocations, 1);
        assert_eq!(pool.stats().reuses, 0);
    }

    #[test]
    fn released_buffer_is_reused_for_same_len() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire(8);
        buf[0] = 0xAB;
        let ptr = buf.as_ptr();
        pool.release(buf);

        let again = pool.acquire(8);
        assert_eq!(again.as_ptr(), ptr);
        assert_eq!(pool.stats(), PoolStats { allocations: 1, reuses: 1, free: 0 });
    }

    #[test]
    fn mismatched_len_allocates_fresh() {
        let pool = BufferPool::new();
        pool.release(vec![0u8; 8]);
        let buf = pool.acquire(12);
        assert_eq!(buf.len(), 12);
        let stats = pool.stats();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.free, 1);
    }

    #[test]
    fn acquire_copy_fills_fresh_and_reused_buffers() {
        let pool = BufferPool::new();
        let first = pool.acquire_copy(&[1, 2, 3, 4]);
        assert_eq!(first, [1, 2, 3, 4]);
        let ptr = first.as_ptr();
        pool.release(first);

        let second = pool.acquire_copy(&[5, 6, 7, 8]);
        assert_eq!(second, [5, 6, 7, 8]);
        assert_eq!(second.as_ptr(), ptr);
        assert_eq!(pool.stats(), PoolStats { allocations: 1, reuses: 1, free: 0 });

        let other = pool.acquire_copy(&[9; 3]);
        assert_eq!(other, [9, 9, 9]);
        assert_eq!(pool.stats().allocations, 2);
    }

    #[test]
    fn clear_empties_free_list() {
        let pool = BufferPool::new();
        pool.release(vec![0u8; 4]);
        pool.release(vec![0u8; 4]);
        assert_eq!(pool.stats().free, 2);
        pool.clear();
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn shared_across_threads() {
        let pool = std::sync::Arc::new(BufferPool::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let b = pool.acquire(32);
                        pool.release(b);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.allocations + stats.reuses, 400);
        assert!(stats.free <= 4);
    }
}
