//! In-memory model of the SPSC byte ring for property-based testing.
//!
//! This module replicates the byte-ring index arithmetic (free-running
//! u32 cursors masked by a power-of-two capacity) in plain Rust so it can
//! be fuzzed against a queue oracle without touching real shared memory.

use std::collections::VecDeque;

/// Minimum ring capacity (must be power of 2).
pub const MIN_CAPACITY: u32 = 8;
/// Maximum ring capacity for fuzzing (keep small to find edge cases faster).
pub const MAX_CAPACITY: u32 = 256;

/// In-memory model of one byte ring.
pub struct ByteRingModel {
    capacity: u32,
    mask: u32,
    data: Vec<u8>,
    write_pos: u32,
    read_pos: u32,
}

impl ByteRingModel {
    /// Create a ring with the capacity clamped to a valid power of two.
    pub fn new(capacity: u32) -> Self {
        let capacity = capacity
            .next_power_of_two()
            .clamp(MIN_CAPACITY, MAX_CAPACITY);
        Self {
            capacity,
            mask: capacity - 1,
            data: vec![0u8; capacity as usize],
            write_pos: 0,
            read_pos: 0,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn write_pos(&self) -> u32 {
        self.write_pos
    }

    pub fn read_pos(&self) -> u32 {
        self.read_pos
    }

    pub fn available_read(&self) -> u32 {
        self.write_pos.wrapping_sub(self.read_pos)
    }

    pub fn available_write(&self) -> u32 {
        self.capacity - self.available_read()
    }

    /// Write as many bytes as fit. Returns the count written.
    pub fn write(&mut self, src: &[u8]) -> usize {
        let n = (self.available_write() as usize).min(src.len());
        for (i, &b) in src[..n].iter().enumerate() {
            let at = (self.write_pos.wrapping_add(i as u32) & self.mask) as usize;
            self.data[at] = b;
        }
        self.write_pos = self.write_pos.wrapping_add(n as u32);
        n
    }

    /// Read as many bytes as are queued. Returns the count read.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let n = (self.available_read() as usize).min(dst.len());
        self.peek(0, &mut dst[..n]);
        self.read_pos = self.read_pos.wrapping_add(n as u32);
        n
    }

    /// Non-advancing peek starting `offset` bytes past the read cursor.
    ///
    /// The span must already be available.
    pub fn peek(&self, offset: usize, dst: &mut [u8]) {
        assert!(offset + dst.len() <= self.available_read() as usize);
        for (i, b) in dst.iter_mut().enumerate() {
            let at = (self
                .read_pos
                .wrapping_add((offset + i) as u32)
                & self.mask) as usize;
            *b = self.data[at];
        }
    }

    /// Consume `n` bytes without copying them.
    pub fn advance_read(&mut self, n: usize) {
        assert!(n <= self.available_read() as usize);
        self.read_pos = self.read_pos.wrapping_add(n as u32);
    }
}

/// Operations that can be performed on the ring.
#[derive(Clone, Debug)]
pub enum RingOp {
    /// Write the given bytes (as many as fit).
    Write(Vec<u8>),
    /// Read up to this many bytes.
    Read(u16),
    /// Peek up to this many bytes without consuming.
    Peek(u16),
    /// Consume up to this many bytes without copying.
    Advance(u16),
}

/// Execute a sequence of operations against a queue oracle and verify
/// invariants after every step.
pub fn execute_and_verify(capacity: u32, ops: &[RingOp]) -> Result<(), String> {
    let mut ring = ByteRingModel::new(capacity);
    let mut oracle: VecDeque<u8> = VecDeque::new();

    for (i, op) in ops.iter().enumerate() {
        match op {
            RingOp::Write(bytes) => {
                let expect = (ring.available_write() as usize).min(bytes.len());
                let n = ring.write(bytes);
                if n != expect {
                    return Err(format!("op {}: wrote {} but {} fit", i, n, expect));
                }
                oracle.extend(&bytes[..n]);
            }
            RingOp::Read(max) => {
                let mut buf = vec![0u8; *max as usize];
                let expect = (ring.available_read() as usize).min(buf.len());
                let n = ring.read(&mut buf);
                if n != expect {
                    return Err(format!("op {}: read {} but {} queued", i, n, expect));
                }
                for (j, &b) in buf[..n].iter().enumerate() {
                    let want = oracle.pop_front().expect("oracle underflow");
                    if b != want {
                        return Err(format!(
                            "op {}: byte {} read as {:#x}, expected {:#x}",
                            i, j, b, want
                        ));
                    }
                }
            }
            RingOp::Peek(max) => {
                let n = (ring.available_read() as usize).min(*max as usize);
                let mut buf = vec![0u8; n];
                ring.peek(0, &mut buf);
                for (j, &b) in buf.iter().enumerate() {
                    let want = oracle[j];
                    if b != want {
                        return Err(format!(
                            "op {}: peek byte {} as {:#x}, expected {:#x}",
                            i, j, b, want
                        ));
                    }
                }
            }
            RingOp::Advance(max) => {
                let n = (ring.available_read() as usize).min(*max as usize);
                ring.advance_read(n);
                oracle.drain(..n);
            }
        }

        verify_ring_invariants(&ring, &oracle, i)?;
    }

    Ok(())
}

fn verify_ring_invariants(
    ring: &ByteRingModel,
    oracle: &VecDeque<u8>,
    op_idx: usize,
) -> Result<(), String> {
    // Invariant 1: queued count matches the oracle.
    if ring.available_read() as usize != oracle.len() {
        return Err(format!(
            "after op {}: available_read()={} but oracle holds {}",
            op_idx,
            ring.available_read(),
            oracle.len()
        ));
    }

    // Invariant 2: the two availabilities always sum to the capacity.
    if ring.available_read() + ring.available_write() != ring.capacity() {
        return Err(format!(
            "after op {}: read({}) + write({}) != capacity({})",
            op_idx,
            ring.available_read(),
            ring.available_write(),
            ring.capacity()
        ));
    }

    // Invariant 3: the cursor distance never exceeds the capacity.
    if ring.write_pos().wrapping_sub(ring.read_pos()) > ring.capacity() {
        return Err(format!(
            "after op {}: cursors diverged past capacity ({} vs {})",
            op_idx,
            ring.write_pos(),
            ring.read_pos()
        ));
    }

    Ok(())
}
