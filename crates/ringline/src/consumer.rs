//! Server-side stream: drains the ordered byte stream the client
//! publishes and writes readback bytes the other way.
//!
//! `read_raw` is the heart of the transport. One call multiplexes the
//! command ring (descriptor payloads) and the large ring (announced
//! streams) into the caller's buffer, carrying an oversized descriptor
//! payload across calls in a local stash, spinning a bounded number of
//! times on empty rings, and finally blocking once in the
//! unavailable-read callback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::context::{RingContext, StreamConfig};
use crate::descriptor::{TransferMode, XferDesc, XFER_DESC_SIZE};
use crate::layout::PeerState;
use crate::region::SharedRegion;
use crate::ring::ring_yield;
use crate::stream::{CommandStream, StreamStats, BACKOFF_WARN_ITERS};
use crate::wake::{UnavailableReadFn, WakeResult};

/// Inline capacity of the carry buffer; larger payloads spill to heap.
const CARRY_INLINE: usize = 512;

/// The server end of the transport.
pub struct ConsumerStream {
    ctx: RingContext,
    unavailable_read: UnavailableReadFn,
    /// Stash for a descriptor payload the caller's buffer could not hold.
    read_buffer: SmallVec<[u8; CARRY_INLINE]>,
    /// Bytes still to drain from the stash.
    read_buffer_left: usize,
    /// Peeked-descriptor scratch, reused across calls.
    desc_scratch: Vec<u8>,
    /// Staging space for the write path.
    write_buffer: Vec<u8>,
    max_spins: u32,
    should_exit: bool,
    paused: Arc<AtomicBool>,
    stats: StreamStats,
    // Keeps the mapping alive for as long as the views are bound.
    _region: Arc<SharedRegion>,
}

impl ConsumerStream {
    /// Create the server stream over a region.
    ///
    /// `unavailable_read` blocks until a doorbell arrives (`Woken`) or the
    /// embedder shuts down (`Shutdown`). It is called only after
    /// `max_spins` empty observations of all rings.
    pub fn new(
        region: Arc<SharedRegion>,
        unavailable_read: impl FnMut() -> WakeResult + Send + 'static,
    ) -> Self {
        Self::with_config(region, StreamConfig::default(), unavailable_read)
    }

    /// Create the server stream with explicit tuning.
    pub fn with_config(
        region: Arc<SharedRegion>,
        config: StreamConfig,
        unavailable_read: impl FnMut() -> WakeResult + Send + 'static,
    ) -> Self {
        // SAFETY: the region is sized for its transfer buffer and outlives
        // the stream via the held Arc; this is the single consumer side.
        let ctx = unsafe { RingContext::bind(region.base(), region.xfer_buffer_size()) };
        Self {
            ctx,
            unavailable_read: Box::new(unavailable_read),
            read_buffer: SmallVec::new(),
            read_buffer_left: 0,
            desc_scratch: Vec::new(),
            write_buffer: Vec::new(),
            max_spins: config.max_spins,
            should_exit: false,
            paused: Arc::new(AtomicBool::new(false)),
            stats: StreamStats::default(),
            _region: region,
        }
    }

    /// Whether the stream has gone terminal.
    #[inline]
    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Counters: delivered reads and payload bytes received.
    #[inline]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Snapshot gate. While the flag is set, `read_raw` returns `Some(0)`
    /// without touching any ring index or state word.
    pub fn pause_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.paused)
    }

    /// Publish the terminal state so the client abandons its sends.
    pub fn announce_exit(&self) {
        self.ctx.host_state().store(PeerState::Exit);
    }

    /// Read up to `dst.len()` bytes of the ordered stream.
    ///
    /// Returns `None` on terminal shutdown (the unavailable-read callback
    /// reported `Shutdown`, or the client violated the transfer-mode
    /// protocol), `Some(0)` only while the snapshot gate is closed,
    /// otherwise the delivered count in `1..=dst.len()`.
    pub fn read_raw(&mut self, dst: &mut [u8]) -> Option<usize> {
        if self.paused.load(Ordering::Acquire) || dst.is_empty() {
            return Some(0);
        }

        let wanted = dst.len();
        let mut count = 0usize;
        let mut spins = 0u32;
        // True so that re-entry mid-large-transfer keeps spinning on the
        // announced size instead of blocking.
        let mut in_large_xfer = true;

        self.ctx.host_state().store(PeerState::CanConsume);

        while count < wanted {
            if self.read_buffer_left > 0 {
                let avail = (wanted - count).min(self.read_buffer_left);
                let start = self.read_buffer.len() - self.read_buffer_left;
                dst[count..count + avail].copy_from_slice(&self.read_buffer[start..start + avail]);
                count += avail;
                self.read_buffer_left -= avail;
                continue;
            }
            self.read_buffer.clear();

            if count > 0 {
                // Partial delivery; the caller comes back for the rest.
                break;
            }

            self.ctx.host_state().store(PeerState::CanConsume);
            if self.should_exit {
                return None;
            }

            let ring_avail = self.ctx.to_host().available_read();
            let large_avail = self.ctx.to_host_large().available_read();

            if ring_avail > 0 {
                in_large_xfer = false;
                let mode = self.ctx.config().transfer_mode.load(Ordering::Acquire);
                match TransferMode::from_u32(mode) {
                    Some(TransferMode::Type1) => {
                        self.type1_read(ring_avail, dst, &mut count);
                    }
                    Some(TransferMode::Type2) => {
                        // Reserved lane: no progress.
                    }
                    Some(TransferMode::Type3) => {
                        tracing::error!(
                            "command ring non-empty while in large-transfer mode"
                        );
                        self.should_exit = true;
                    }
                    None => {
                        tracing::error!(mode, "unknown transfer mode");
                        self.should_exit = true;
                    }
                }
            } else if large_avail > 0 {
                self.type3_read(large_avail, dst, &mut count);
                in_large_xfer = true;
                if self.ctx.config().transfer_size.load(Ordering::Acquire) == 0 {
                    in_large_xfer = false;
                }
            } else {
                if in_large_xfer {
                    if self.ctx.config().transfer_size.load(Ordering::Acquire) != 0 {
                        // Mid-transfer: the producer's next bytes are
                        // imminent, never block on them.
                        continue;
                    }
                    in_large_xfer = false;
                }

                spins += 1;
                if spins < self.max_spins {
                    ring_yield();
                    continue;
                }
                spins = 0;

                if self.should_exit {
                    return None;
                }
                if let WakeResult::Shutdown = (self.unavailable_read)() {
                    self.should_exit = true;
                }
            }
        }

        self.stats.xmits += 1;
        self.stats.total_bytes += count as u64;
        self.ctx.host_state().store(PeerState::Rendering);
        Some(count)
    }

    /// Convenience wrapper over `read_raw`: 0 on shutdown.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        self.read_raw(dst).unwrap_or(0)
    }

    /// Send a whole payload on the readback ring.
    ///
    /// Returns the bytes sent, short only when teardown was observed.
    pub fn write_fully(&mut self, buf: &[u8]) -> usize {
        let staged = self.alloc_buffer(buf.len());
        staged[..buf.len()].copy_from_slice(buf);
        self.commit_buffer(buf.len())
    }

    /// Drain one descriptor's payload out of the transfer buffer.
    ///
    /// Every queued descriptor is peeked, but at most one is consumed per
    /// invocation; draining several here has produced corrupted streams
    /// in the field, so one-per-call is the contract.
    fn type1_read(&mut self, available: u32, dst: &mut [u8], count: &mut usize) {
        let total = available as usize / XFER_DESC_SIZE;
        let byte_len = total * XFER_DESC_SIZE;
        if self.desc_scratch.len() < byte_len {
            self.desc_scratch.resize(byte_len * 2, 0);
        }
        self.ctx
            .to_host()
            .copy_contents(0, &mut self.desc_scratch[..byte_len]);

        for i in 0..total {
            let desc = XferDesc::from_bytes(
                self.desc_scratch[i * XFER_DESC_SIZE..(i + 1) * XFER_DESC_SIZE]
                    .try_into()
                    .unwrap(),
            );
            let size = desc.size as usize;

            if *count + size > dst.len() {
                // Stash the payload or this call gets stuck re-peeking a
                // descriptor it can never deliver.
                if *count == 0 && i == 0 {
                    // SAFETY: the producer published (offset, size) inside
                    // the transfer buffer and owns no byte of it until the
                    // descriptor is consumed below.
                    let payload = unsafe {
                        std::slice::from_raw_parts(
                            self.ctx.buffer_ptr().add(desc.offset as usize),
                            size,
                        )
                    };
                    self.read_buffer.extend_from_slice(payload);
                    self.read_buffer_left = size;
                    self.ctx.to_host().advance_read(XFER_DESC_SIZE, 1);
                    self.acknowledge(size);
                }
                return;
            }

            // SAFETY: as above; the range is inside the transfer buffer.
            let payload = unsafe {
                std::slice::from_raw_parts(self.ctx.buffer_ptr().add(desc.offset as usize), size)
            };
            dst[*count..*count + size].copy_from_slice(payload);
            self.ctx.to_host().advance_read(XFER_DESC_SIZE, 1);
            *count += size;
            self.acknowledge(size);
            return;
        }
    }

    /// Pull announced large-transfer bytes off the large ring.
    fn type3_read(&mut self, available: u32, dst: &mut [u8], count: &mut usize) {
        let announced = self.ctx.config().transfer_size.load(Ordering::Acquire);
        let max_can_read = (dst.len() - *count) as u32;
        let actually_read = available.min(announced).min(max_can_read);
        if actually_read == 0 {
            return;
        }

        // Debit the announcement before touching the ring, or the next
        // announcement races this one.
        self.ctx
            .config()
            .transfer_size
            .fetch_sub(actually_read, Ordering::Release);

        // An abort leaves the tail of the chunk undelivered but still
        // counted; the stream is tearing down when the error flag is up.
        let span = &mut dst[*count..*count + actually_read as usize];
        let abort = &self.ctx.config().in_error;
        self.ctx.to_host_large().read_fully_with_abort(span, 1, abort);

        *count += actually_read as usize;
        self.acknowledge(actually_read as usize);
    }

    /// Advance the shared consumed-byte counter.
    #[inline]
    fn acknowledge(&self, n: usize) {
        self.ctx
            .config()
            .host_consumed_pos
            .fetch_add(n as u32, Ordering::Release);
    }
}

impl CommandStream for ConsumerStream {
    fn alloc_buffer(&mut self, min: usize) -> &mut [u8] {
        if self.write_buffer.len() < min {
            self.write_buffer.resize(min, 0);
        }
        &mut self.write_buffer[..min]
    }

    fn commit_buffer(&mut self, size: usize) -> usize {
        debug_assert!(size <= self.write_buffer.len());
        let mut sent = 0usize;
        let mut iters: u64 = 0;
        let mut backed_off: u64 = 0;
        while sent < size {
            let n = self
                .ctx
                .from_host_large()
                .write(&self.write_buffer[sent..size], 1);
            if n == 0 {
                if self.ctx.host_state().load() == Some(PeerState::Exit) {
                    break;
                }
                ring_yield();
                iters += 1;
                if iters > BACKOFF_WARN_ITERS {
                    backed_off += 1;
                }
                continue;
            }
            sent += n;
        }
        if backed_off > 0 {
            tracing::warn!(
                backed_off_iters = backed_off,
                "readback write backed off due to client slowness"
            );
        }
        sent
    }

    fn read_raw(&mut self, dst: &mut [u8]) -> Option<usize> {
        ConsumerStream::read_raw(self, dst)
    }
}
