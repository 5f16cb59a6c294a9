//! In-memory model of the full transfer protocol for property-based
//! testing.
//!
//! The model runs producer and consumer in lock step inside one thread:
//! whenever the producer would block (full command ring, full large ring,
//! staging wrap), the consumer is pumped instead. The two properties under
//! test are the transport's core guarantees: every byte written is
//! delivered (conservation), in exactly the order written (order
//! preservation), regardless of how writes map onto descriptors and large
//! transfers.

use std::collections::VecDeque;

/// Transfer buffer size used by the model.
pub const BUFFER_SIZE: u32 = 256;
/// Producer staging step.
pub const WRITE_STEP: u32 = 64;
/// Command ring depth in descriptors (small, to exercise full-ring pumping).
pub const CMD_RING_DESCS: usize = 4;
/// Consumer pull granularity for large transfers.
const LARGE_CHUNK: usize = 32;

/// Lock-step model of one producer/consumer pair.
pub struct StreamModel {
    buffer: Vec<u8>,
    descs: VecDeque<(u32, u32)>,
    large: VecDeque<u8>,
    transfer_size: u32,
    write_start: u32,
    pending: u32,
    delivered: Vec<u8>,
    expected: Vec<u8>,
}

impl Default for StreamModel {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamModel {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; BUFFER_SIZE as usize],
            descs: VecDeque::new(),
            large: VecDeque::new(),
            transfer_size: 0,
            write_start: 0,
            pending: 0,
            delivered: Vec::new(),
            expected: Vec::new(),
        }
    }

    /// Stage bytes the way the producer's alloc path does: flush when the
    /// step would overflow, wrap once outstanding descriptors drain.
    pub fn write(&mut self, bytes: &[u8]) {
        assert!(!bytes.is_empty() && bytes.len() <= BUFFER_SIZE as usize);
        self.expected.extend_from_slice(bytes);
        let n = bytes.len() as u32;

        if self.pending > 0 && self.pending + n > WRITE_STEP {
            self.flush();
        }
        if self.pending == 0 {
            let want = n.max(WRITE_STEP).min(BUFFER_SIZE);
            if self.write_start + want > BUFFER_SIZE {
                while !self.descs.is_empty() {
                    self.consume_once();
                }
                self.write_start = 0;
            }
        }

        let offset = (self.write_start + self.pending) as usize;
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.pending += n;
    }

    /// Publish the staged bytes as one descriptor, pumping the consumer
    /// while the command ring is full.
    pub fn flush(&mut self) {
        if self.pending == 0 {
            return;
        }
        self.wait_large_drained();
        while self.descs.len() == CMD_RING_DESCS {
            self.consume_once();
        }
        self.descs.push_back((self.write_start, self.pending));
        self.write_start += self.pending;
        self.pending = 0;
    }

    /// Stream a payload through the large ring, announcement first.
    pub fn write_large(&mut self, bytes: &[u8]) {
        assert!(!bytes.is_empty());
        self.expected.extend_from_slice(bytes);

        self.flush();
        while !self.descs.is_empty() {
            self.consume_once();
        }
        self.wait_large_drained();

        self.transfer_size = bytes.len() as u32;
        for &b in bytes {
            while self.large.len() == BUFFER_SIZE as usize {
                self.consume_once();
            }
            self.large.push_back(b);
        }
    }

    /// Drain the previous announcement, mirroring the producer's guard
    /// against clobbering an undebited transfer size.
    fn wait_large_drained(&mut self) {
        while self.transfer_size > 0 || !self.large.is_empty() {
            self.consume_once();
        }
    }

    /// One consumer step, with the real branch ordering: command ring
    /// first, then the large ring.
    pub fn consume_once(&mut self) {
        if let Some((offset, size)) = self.descs.pop_front() {
            let start = offset as usize;
            self.delivered
                .extend_from_slice(&self.buffer[start..start + size as usize]);
            return;
        }
        if !self.large.is_empty() {
            let n = self
                .large
                .len()
                .min(self.transfer_size as usize)
                .min(LARGE_CHUNK);
            self.transfer_size -= n as u32;
            for _ in 0..n {
                self.delivered.push(self.large.pop_front().unwrap());
            }
        }
    }

    /// Flush and drain everything still in flight.
    pub fn finish(&mut self) {
        self.flush();
        while !self.descs.is_empty() || !self.large.is_empty() {
            self.consume_once();
        }
    }

    pub fn delivered(&self) -> &[u8] {
        &self.delivered
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }
}

/// Operations driving the model.
#[derive(Clone, Debug)]
pub enum StreamOp {
    /// Stage a small write of this many bytes of the given value.
    Write(u16, u8),
    /// Stream a large transfer of this many bytes of the given value.
    WriteLarge(u16, u8),
    /// Explicit flush.
    Flush,
    /// Pump the consumer once.
    Consume,
}

/// Execute operations and verify conservation and order preservation.
pub fn execute_and_verify(ops: &[StreamOp]) -> Result<(), String> {
    let mut model = StreamModel::new();

    for op in ops {
        match op {
            StreamOp::Write(len, val) => {
                // Small-path writes stay within the staging step's regime.
                let len = (*len as usize % (WRITE_STEP as usize * 2)).max(1);
                model.write(&vec![*val; len]);
            }
            StreamOp::WriteLarge(len, val) => {
                // Large-path writes exceed the step, up to twice the buffer
                // so ring pumping is exercised.
                let min = WRITE_STEP as usize + 1;
                let span = BUFFER_SIZE as usize * 2 - min;
                let len = min + (*len as usize % span);
                model.write_large(&vec![*val; len]);
            }
            StreamOp::Flush => model.flush(),
            StreamOp::Consume => model.consume_once(),
        }
    }

    model.finish();

    if model.delivered().len() != model.expected().len() {
        return Err(format!(
            "conservation violated: wrote {} bytes, delivered {}",
            model.expected().len(),
            model.delivered().len()
        ));
    }
    if model.delivered() != model.expected() {
        let first_diff = model
            .delivered()
            .iter()
            .zip(model.expected().iter())
            .position(|(a, b)| a != b)
            .unwrap();
        return Err(format!(
            "order violated at byte {}: got {:#x}, expected {:#x}",
            first_diff,
            model.delivered()[first_diff],
            model.expected()[first_diff]
        ));
    }

    Ok(())
}
