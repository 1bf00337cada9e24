//! PCM ring buffer between the decode step and the output buffers.
//!
//! The decode step appends resampled bytes; the output refill removes them from the
//! front. Both sides go through the same mutex, so the reported length is always the
//! number of bytes appended minus the number removed.
//!
//! The output refill holds the lock across an inline decode step, so the decode side
//! writes through a [`PcmGuard`] instead of locking again.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Mutex-protected byte FIFO of output-format PCM.
#[derive(Debug, Default)]
pub struct PcmRingBuffer {
    inner: Mutex<VecDeque<u8>>,
}

/// Exclusive access to the buffered bytes while the lock is held.
pub struct PcmGuard<'a> {
    bytes: MutexGuard<'a, VecDeque<u8>>,
}

impl PcmRingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-size the buffer for roughly `bytes` of audio.
    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(bytes)),
        }
    }

    /// Acquire the lock. A poisoned lock is recovered: the byte queue has no invariants a
    /// panic could break halfway.
    pub fn lock(&self) -> PcmGuard<'_> {
        PcmGuard {
            bytes: self.inner.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn append(&self, bytes: &[u8]) {
        self.lock().append(bytes);
    }

    /// Copy up to `out.len()` bytes from the front and remove them.
    pub fn take_into(&self, out: &mut [u8]) -> usize {
        self.lock().take_into(out)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl PcmGuard<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.bytes.extend(bytes.iter().copied());
    }

    /// Copy up to `out.len()` bytes from the front without removing them.
    pub fn copy_front(&self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.bytes.len());
        let (a, b) = self.bytes.as_slices();
        if n <= a.len() {
            out[..n].copy_from_slice(&a[..n]);
        } else {
            out[..a.len()].copy_from_slice(a);
            out[a.len()..n].copy_from_slice(&b[..n - a.len()]);
        }
        n
    }

    /// Drop up to `n` bytes from the front; returns how many were removed.
    pub fn remove_front(&mut self, n: usize) -> usize {
        let n = n.min(self.bytes.len());
        self.bytes.drain(..n);
        n
    }

    pub fn take_into(&mut self, out: &mut [u8]) -> usize {
        let n = self.copy_front(out);
        self.remove_front(n)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn take_into_is_fifo_and_partial() {
        let ring = PcmRingBuffer::new();
        ring.append(&[1, 2, 3]);
        ring.append(&[4, 5]);
        let mut out = [0u8; 4];
        assert_eq!(ring.take_into(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        let mut out = [0u8; 4];
        assert_eq!(ring.take_into(&mut out), 1);
        assert_eq!(out[0], 5);
        assert!(ring.is_empty());
    }

    #[test]
    fn copy_front_spans_wrapped_storage() {
        let ring = PcmRingBuffer::with_capacity(4);
        let mut g = ring.lock();
        g.append(&[0, 1, 2, 3]);
        g.remove_front(3);
        g.append(&[4, 5, 6]);
        let mut out = [0u8; 4];
        assert_eq!(g.copy_front(&mut out), 4);
        assert_eq!(out, [3, 4, 5, 6]);
        assert_eq!(g.len(), 4);
    }

    #[test]
    fn remove_front_saturates() {
        let ring = PcmRingBuffer::new();
        let mut g = ring.lock();
        g.append(&[9; 10]);
        assert_eq!(g.remove_front(25), 10);
        assert!(g.is_empty());
    }

    #[test]
    fn concurrent_produce_consume_conserves_bytes() {
        let ring = Arc::new(PcmRingBuffer::new());
        let producer_ring = ring.clone();
        let producer = thread::spawn(move || {
            let mut appended = 0usize;
            for i in 0..2000usize {
                let chunk = vec![0xAB; 1 + i % 97];
                producer_ring.append(&chunk);
                appended += chunk.len();
            }
            appended
        });

        let consumer_ring = ring.clone();
        let consumer = thread::spawn(move || {
            let mut removed = 0usize;
            let mut out = vec![0u8; 61];
            for _ in 0..3000 {
                removed += consumer_ring.take_into(&mut out);
                thread::yield_now();
            }
            removed
        });

        let appended = producer.join().unwrap();
        let removed = consumer.join().unwrap();
        assert_eq!(ring.len(), appended - removed);
    }
}
