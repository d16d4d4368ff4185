//! Per-worker buffer arena.
//!
//! All transmit and receive buffers are allocated once when the engine
//! starts. Each worker then owns exactly one slot, so the hot loop never
//! allocates and no two workers ever touch the same memory.

use std::io::{self, Write};

/// Fixed set of buffer slots, one per worker.
pub struct BufferArena {
    slots: Vec<WorkerBuffers>,
}

impl BufferArena {
    /// Allocate `count` slots, each with a transmit and a receive buffer of
    /// `size` bytes.
    pub fn new(count: usize, size: usize) -> Self {
        let slots = (0..count)
            .map(|_| WorkerBuffers {
                tx: vec![0u8; size].into_boxed_slice(),
                rx: vec![0u8; size].into_boxed_slice(),
            })
            .collect();

        Self { slots }
    }

    /// Number of slots.
    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Hand out the slots, paired with the worker index that owns each.
    pub fn into_slots(self) -> impl Iterator<Item = (usize, WorkerBuffers)> {
        self.slots.into_iter().enumerate()
    }
}

/// Buffers owned by a single worker.
#[derive(Debug)]
pub struct WorkerBuffers {
    pub tx: Box<[u8]>,
    pub rx: Box<[u8]>,
}

impl WorkerBuffers {
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.tx.len()
    }
}

/// Write the echo request for message number `n` into `buf`.
///
/// Returns the payload length. Fails with `WriteZero` if `buf` is too small.
pub fn write_payload(buf: &mut [u8], n: u32) -> io::Result<usize> {
    let capacity = buf.len();
    let mut cursor: &mut [u8] = buf;
    write!(cursor, "TxRx message number {n}")?;
    Ok(capacity - cursor.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_slots() {
        let arena = BufferArena::new(3, 128);
        assert_eq!(arena.len(), 3);

        let slots: Vec<_> = arena.into_slots().collect();
        assert_eq!(slots.len(), 3);
        for (expected, (index, buffers)) in slots.iter().enumerate() {
            assert_eq!(*index, expected);
            assert_eq!(buffers.tx.len(), 128);
            assert_eq!(buffers.rx.len(), 128);
            assert_eq!(buffers.capacity(), 128);
        }
    }

    #[test]
    fn test_slots_are_disjoint() {
        let mut slots: Vec<_> = BufferArena::new(2, 16).into_slots().map(|(_, b)| b).collect();
        slots[0].tx.fill(0xAA);
        assert!(slots[1].tx.iter().all(|&b| b == 0));
        assert!(slots[0].rx.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_payload() {
        let mut buf = [0u8; 64];
        let len = write_payload(&mut buf, 42).unwrap();
        assert_eq!(&buf[..len], b"TxRx message number 42");
    }

    #[test]
    fn test_payload_length_follows_counter() {
        let mut buf = [0u8; 64];
        assert_eq!(write_payload(&mut buf, 0).unwrap(), 21);
        assert_eq!(write_payload(&mut buf, u32::MAX).unwrap(), 30);
        assert!(write_payload(&mut buf, u32::MAX).unwrap() <= buf.len());
    }

    #[test]
    fn test_payload_too_large_for_buffer() {
        let mut buf = [0u8; 10];
        let err = write_payload(&mut buf, 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WriteZero);
    }
}
