//! Single-producer single-consumer byte ring
//!
//! A fixed-capacity byte ring decoupling the feed client from the frame
//! dispatcher. One producer writes, one consumer reads, no locks: the
//! producer publishes `head` with release ordering after the bytes are in
//! place, the consumer acquires `head` before reading and publishes `tail`
//! with release ordering after consuming. One byte of capacity is kept free
//! to distinguish full from empty.
//!
//! `split` hands out the two halves as owned handles; the `&mut self`
//! methods on each half are what enforce the single-producer /
//! single-consumer discipline at compile time.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared {
    buf: UnsafeCell<Box<[u8]>>,
    capacity: usize,
    /// Producer write position, always stored modulo capacity.
    head: AtomicUsize,
    /// Consumer read position, always stored modulo capacity.
    tail: AtomicUsize,
}

// The halves never touch the same bytes: the producer only writes between
// head and tail-1, the consumer only reads between tail and head.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

/// Create a ring of the given byte capacity and split it into halves.
pub fn split(capacity: usize) -> (RingProducer, RingConsumer) {
    assert!(capacity >= 2, "ring capacity must hold at least one byte");
    let shared = Arc::new(Shared {
        buf: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        capacity,
        head: AtomicUsize::new(0),
        tail: AtomicUsize::new(0),
    });
    (
        RingProducer {
            shared: Arc::clone(&shared),
        },
        RingConsumer { shared },
    )
}

/// Producer half of the ring.
pub struct RingProducer {
    shared: Arc<Shared>,
}

impl RingProducer {
    /// Write up to `data.len()` bytes, returning how many were accepted.
    ///
    /// Wraparound is handled with at most two copies. The new `head` is
    /// published with release ordering only after both copies are done.
    pub fn write(&mut self, data: &[u8]) -> usize {
        let cap = self.shared.capacity;
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);

        let space = (tail + cap - head - 1) % cap;
        let to_write = data.len().min(space);
        if to_write == 0 {
            return 0;
        }

        let first = to_write.min(cap - head);
        unsafe {
            let buf = &mut *self.shared.buf.get();
            buf[head..head + first].copy_from_slice(&data[..first]);
            let second = to_write - first;
            if second > 0 {
                buf[..second].copy_from_slice(&data[first..to_write]);
            }
        }

        self.shared
            .head
            .store((head + to_write) % cap, Ordering::Release);
        to_write
    }

    /// Write a complete frame or nothing.
    ///
    /// Frames must never be torn: a partially visible frame would force the
    /// dispatcher into a resync scan. Returns `false` when the ring lacks
    /// room for the whole frame so the caller can back off or drop.
    pub fn write_frame(&mut self, frame: &[u8]) -> bool {
        if frame.len() > self.free() {
            return false;
        }
        let written = self.write(frame);
        debug_assert_eq!(written, frame.len());
        true
    }

    /// Bytes currently writable.
    pub fn free(&self) -> usize {
        let cap = self.shared.capacity;
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        (tail + cap - head - 1) % cap
    }
}

/// Consumer half of the ring.
pub struct RingConsumer {
    shared: Arc<Shared>,
}

impl RingConsumer {
    /// Read up to `out.len()` bytes, returning how many were copied.
    pub fn read(&mut self, out: &mut [u8]) -> usize {
        let cap = self.shared.capacity;
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);

        let available = (head + cap - tail) % cap;
        let to_read = out.len().min(available);
        if to_read == 0 {
            return 0;
        }

        let first = to_read.min(cap - tail);
        unsafe {
            let buf = &*self.shared.buf.get();
            out[..first].copy_from_slice(&buf[tail..tail + first]);
            let second = to_read - first;
            if second > 0 {
                out[first..to_read].copy_from_slice(&buf[..second]);
            }
        }

        self.shared
            .tail
            .store((tail + to_read) % cap, Ordering::Release);
        to_read
    }

    /// Bytes currently readable.
    pub fn available(&self) -> usize {
        let cap = self.shared.capacity;
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        (head + cap - tail) % cap
    }

    /// Whether the ring holds no unread bytes.
    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_write_read_roundtrip() {
        let (mut producer, mut consumer) = split(64);

        let data = b"hello ring";
        assert_eq!(producer.write(data), data.len());
        assert_eq!(consumer.available(), data.len());

        let mut out = [0u8; 32];
        let n = consumer.read(&mut out);
        assert_eq!(&out[..n], data);
        assert!(consumer.is_empty());
    }

    #[test]
    fn test_capacity_minus_one_usable() {
        let (mut producer, _consumer) = split(16);
        let data = [7u8; 32];
        // One slot stays free to distinguish full from empty.
        assert_eq!(producer.write(&data), 15);
        assert_eq!(producer.free(), 0);
        assert_eq!(producer.write(&data), 0);
    }

    #[test]
    fn test_wraparound_preserves_content() {
        let (mut producer, mut consumer) = split(16);
        let mut out = [0u8; 16];

        // Move the indices near the end of the buffer.
        assert_eq!(producer.write(&[0u8; 12]), 12);
        assert_eq!(consumer.read(&mut out[..12]), 12);

        // This write must split into two copies.
        let data: Vec<u8> = (0u8..10).collect();
        assert_eq!(producer.write(&data), 10);
        let n = consumer.read(&mut out);
        assert_eq!(&out[..n], data.as_slice());
    }

    #[test]
    fn test_write_frame_refuses_partial() {
        let (mut producer, mut consumer) = split(16);

        assert!(producer.write_frame(&[1u8; 10]));
        // Only 5 bytes left; a 10-byte frame must be refused entirely.
        assert!(!producer.write_frame(&[2u8; 10]));
        assert_eq!(consumer.available(), 10);

        let mut out = [0u8; 16];
        consumer.read(&mut out);
        assert!(producer.write_frame(&[2u8; 10]));
    }

    #[test]
    fn test_spsc_threads_preserve_byte_order() {
        let (mut producer, mut consumer) = split(256);
        const TOTAL: usize = 100_000;

        let writer = thread::spawn(move || {
            let mut next = 0usize;
            while next < TOTAL {
                let byte = [(next % 251) as u8];
                if producer.write(&byte) == 1 {
                    next += 1;
                } else {
                    thread::yield_now();
                }
            }
        });

        let mut seen = 0usize;
        let mut out = [0u8; 64];
        while seen < TOTAL {
            let n = consumer.read(&mut out);
            for &b in &out[..n] {
                assert_eq!(b, (seen % 251) as u8);
                seen += 1;
            }
            if n == 0 {
                thread::yield_now();
            }
        }
        writer.join().unwrap();
    }
}
