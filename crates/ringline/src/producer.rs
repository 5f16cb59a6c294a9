//! Client-side stream: stages bytes in the shared transfer buffer and
//! publishes them as descriptors or large transfers.
//!
//! The producer owns a staging cursor into the transfer buffer. `alloc`
//! hands out slices at the cursor; `flush` publishes everything staged
//! since the last flush as one descriptor on the command ring. Payloads
//! larger than the staging step stream through the large ring instead,
//! announced by the shared transfer size.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::context::{RingContext, StreamConfig};
use crate::descriptor::{TransferMode, XferDesc, XFER_DESC_SIZE};
use crate::layout::PeerState;
use crate::region::SharedRegion;
use crate::ring::ring_yield;
use crate::stream::{CommandStream, StreamStats, BACKOFF_WARN_ITERS};
use crate::wake::DoorbellFn;

/// The client end of the transport.
pub struct ProducerStream {
    ctx: RingContext,
    doorbell: DoorbellFn,
    write_step: u32,
    /// Transfer-buffer offset of the current staging region.
    write_start: u32,
    /// Bytes handed out since the last flush.
    pending: u32,
    /// A large transfer was announced and may still be draining.
    large_outstanding: bool,
    should_exit: bool,
    stats: StreamStats,
    // Keeps the mapping alive for as long as the views are bound.
    _region: Arc<SharedRegion>,
}

impl ProducerStream {
    /// Create the client stream over a region and initialize the shared
    /// config block. Must happen before the consumer's first read.
    pub fn new(region: Arc<SharedRegion>, doorbell: impl Fn() + Send + 'static) -> Self {
        Self::with_config(region, StreamConfig::default(), doorbell)
    }

    /// Create the client stream with explicit tuning.
    pub fn with_config(
        region: Arc<SharedRegion>,
        config: StreamConfig,
        doorbell: impl Fn() + Send + 'static,
    ) -> Self {
        // SAFETY: the region is sized for its transfer buffer and outlives
        // the stream via the held Arc; this is the single producer side.
        let ctx = unsafe { RingContext::bind(region.base(), region.xfer_buffer_size()) };
        let write_step = config.flush_interval.min(ctx.buffer_size());
        ctx.init_config(write_step);
        Self {
            ctx,
            doorbell: Box::new(doorbell),
            write_step,
            write_start: 0,
            pending: 0,
            large_outstanding: false,
            should_exit: false,
            stats: StreamStats::default(),
            _region: region,
        }
    }

    /// Whether a peer exit has been observed.
    #[inline]
    pub fn should_exit(&self) -> bool {
        self.should_exit
    }

    /// Counters: flushes performed and payload bytes published.
    #[inline]
    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Reserve `n` bytes of staging space in the transfer buffer.
    ///
    /// The returned slice is valid until the next `alloc`/`flush`; its
    /// bytes are published by the next flush. Staged bytes are flushed
    /// implicitly when they would outgrow the staging step, so a long
    /// run of `alloc` calls streams to the consumer without explicit
    /// flushes.
    ///
    /// `n` must not exceed the transfer buffer size.
    pub fn alloc(&mut self, n: usize) -> &mut [u8] {
        assert!(
            n > 0 && n <= self.ctx.buffer_size() as usize,
            "allocation does not fit the transfer buffer"
        );
        let n32 = n as u32;

        if self.pending > 0 && self.pending + n32 > self.write_step {
            self.flush();
        }

        if self.pending == 0 {
            // Starting a fresh region: reserve a full step (or the whole
            // oversized request) before the buffer end, wrapping once all
            // outstanding descriptors are consumed.
            let want = n32.max(self.write_step).min(self.ctx.buffer_size());
            if self.write_start + want > self.ctx.buffer_size() {
                self.wait_descriptors_drained();
                self.write_start = 0;
            }
        }

        let offset = (self.write_start + self.pending) as usize;
        self.pending += n32;
        // SAFETY: [offset, offset + n) lies inside the transfer buffer and
        // belongs to the producer until a descriptor covering it is
        // published and consumed.
        unsafe { std::slice::from_raw_parts_mut(self.ctx.buffer_ptr().add(offset), n) }
    }

    /// Publish everything staged since the last flush as one descriptor.
    ///
    /// Returns the bytes published (0 when nothing was pending or the
    /// consumer exited).
    pub fn flush(&mut self) -> usize {
        if self.pending == 0 {
            return 0;
        }
        if self.should_exit {
            self.pending = 0;
            return 0;
        }

        // A descriptor published while large-transfer bytes are still
        // draining would be consumed ahead of them; hold it back.
        self.wait_large_drained();
        if self.should_exit {
            self.pending = 0;
            return 0;
        }

        let desc = XferDesc {
            offset: self.write_start,
            size: self.pending,
        };
        if !self.push_descriptor(desc) {
            self.pending = 0;
            return 0;
        }

        let sent = self.pending as usize;
        self.write_start += self.pending;
        self.pending = 0;
        self.stats.xmits += 1;
        self.stats.total_bytes += sent as u64;
        self.ring_doorbell();
        sent
    }

    /// Send a whole payload, choosing the transfer path by size.
    ///
    /// Payloads up to the staging step travel as descriptors; anything
    /// larger streams through the large ring. Returns the bytes sent,
    /// short only when the consumer signaled exit.
    pub fn write_fully(&mut self, buf: &[u8]) -> usize {
        if self.should_exit || buf.is_empty() {
            return 0;
        }
        if buf.len() <= self.write_step as usize {
            self.alloc(buf.len()).copy_from_slice(buf);
            self.flush();
            return if self.should_exit { 0 } else { buf.len() };
        }
        self.write_large(buf)
    }

    /// Read back `dst.len()` bytes the server sent on the readback ring.
    ///
    /// Outstanding staged bytes are flushed first so the server can reach
    /// the request this readback answers. Returns a short count only when
    /// the server signaled exit.
    pub fn readback(&mut self, dst: &mut [u8]) -> usize {
        self.flush();
        self.ctx.guest_state().store(PeerState::CanConsume);
        let mut got = 0;
        while got < dst.len() {
            let n = self.ctx.from_host_large().read(&mut dst[got..], 1);
            if n == 0 {
                if self.ctx.host_state().load() == Some(PeerState::Exit) {
                    self.should_exit = true;
                    break;
                }
                ring_yield();
                continue;
            }
            got += n;
        }
        self.ctx.guest_state().store(PeerState::Rendering);
        got
    }

    /// Stream an oversized payload through the large ring.
    fn write_large(&mut self, buf: &[u8]) -> usize {
        // The consumer accepts large-transfer bytes only with an empty
        // command ring, so everything staged must drain first, and the
        // previous announcement must be fully debited before the next
        // store overwrites it.
        self.flush();
        self.wait_descriptors_drained();
        self.wait_large_drained();
        if self.should_exit {
            return 0;
        }

        self.ctx
            .config()
            .transfer_mode
            .store(TransferMode::Type3 as u32, Ordering::Release);
        self.ctx
            .config()
            .transfer_size
            .store(buf.len() as u32, Ordering::Release);
        self.large_outstanding = true;

        let mut sent = 0usize;
        let mut doorbelled = false;
        let mut iters: u64 = 0;
        let mut backed_off: u64 = 0;
        while sent < buf.len() {
            let n = self.ctx.to_host_large().write(&buf[sent..], 1);
            if n == 0 {
                match self.ctx.host_state().load() {
                    Some(PeerState::Exit) => {
                        self.should_exit = true;
                        break;
                    }
                    Some(PeerState::CanConsume) if !doorbelled => {
                        (self.doorbell)();
                        doorbelled = true;
                    }
                    _ => {}
                }
                ring_yield();
                iters += 1;
                if iters > BACKOFF_WARN_ITERS {
                    backed_off += 1;
                }
                continue;
            }
            sent += n;
            if !doorbelled {
                // The doorbell fires only once the first chunk is visible,
                // so a woken consumer always finds large-ring bytes.
                self.ring_doorbell();
                doorbelled = true;
            }
        }

        self.ctx
            .config()
            .transfer_mode
            .store(TransferMode::Type1 as u32, Ordering::Release);

        if backed_off > 0 {
            tracing::warn!(
                backed_off_iters = backed_off,
                "large transfer backed off due to consumer slowness"
            );
        }
        if sent > 0 {
            self.stats.xmits += 1;
            self.stats.total_bytes += sent as u64;
        }
        sent
    }

    /// Enqueue one descriptor, spinning while the command ring is full.
    ///
    /// Returns false when the consumer signaled exit.
    fn push_descriptor(&mut self, desc: XferDesc) -> bool {
        let bytes = desc.to_bytes();
        let mut doorbelled = false;
        let mut iters: u64 = 0;
        let mut backed_off: u64 = 0;
        loop {
            if self.ctx.to_host().write(&bytes, XFER_DESC_SIZE) != 0 {
                if backed_off > 0 {
                    tracing::warn!(
                        backed_off_iters = backed_off,
                        "descriptor publish backed off due to consumer slowness"
                    );
                }
                return true;
            }
            match self.ctx.host_state().load() {
                Some(PeerState::Exit) => {
                    self.should_exit = true;
                    return false;
                }
                Some(PeerState::CanConsume) if !doorbelled => {
                    // The consumer may be blocked on its doorbell while the
                    // ring sits full; wake it once so it can drain.
                    (self.doorbell)();
                    doorbelled = true;
                }
                _ => {}
            }
            ring_yield();
            iters += 1;
            if iters > BACKOFF_WARN_ITERS {
                backed_off += 1;
            }
        }
    }

    /// Wait until every published descriptor has been consumed.
    ///
    /// A consumed descriptor implies its payload was copied out, so the
    /// staging cursor may wrap over old payload bytes afterwards.
    fn wait_descriptors_drained(&mut self) {
        let mut doorbelled = false;
        let mut iters: u64 = 0;
        let mut backed_off: u64 = 0;
        while self.ctx.to_host().available_read() > 0 {
            match self.ctx.host_state().load() {
                Some(PeerState::Exit) => {
                    self.should_exit = true;
                    return;
                }
                Some(PeerState::CanConsume) if !doorbelled => {
                    (self.doorbell)();
                    doorbelled = true;
                }
                _ => {}
            }
            ring_yield();
            iters += 1;
            if iters > BACKOFF_WARN_ITERS {
                backed_off += 1;
            }
        }
        if backed_off > 0 {
            tracing::warn!(
                backed_off_iters = backed_off,
                "descriptor drain backed off due to consumer slowness"
            );
        }
    }

    /// Wait until the previously announced large transfer is fully
    /// consumed: announcement debited to zero and the large ring empty.
    fn wait_large_drained(&mut self) {
        if !self.large_outstanding {
            return;
        }
        let mut doorbelled = false;
        let mut iters: u64 = 0;
        let mut backed_off: u64 = 0;
        loop {
            let announced = self.ctx.config().transfer_size.load(Ordering::Acquire);
            if announced == 0 && self.ctx.to_host_large().available_read() == 0 {
                break;
            }
            match self.ctx.host_state().load() {
                Some(PeerState::Exit) => {
                    self.should_exit = true;
                    return;
                }
                Some(PeerState::CanConsume) if !doorbelled => {
                    (self.doorbell)();
                    doorbelled = true;
                }
                _ => {}
            }
            ring_yield();
            iters += 1;
            if iters > BACKOFF_WARN_ITERS {
                backed_off += 1;
            }
        }
        self.large_outstanding = false;
        if backed_off > 0 {
            tracing::warn!(
                backed_off_iters = backed_off,
                "large-transfer drain backed off due to consumer slowness"
            );
        }
    }

    /// Raise the doorbell iff the consumer is inside its read loop.
    ///
    /// When the state word reads `Rendering` the consumer will re-enter
    /// `read_raw` on its own and sample the rings, so a doorbell would be
    /// redundant; this suppression is what keeps the packet:doorbell
    /// ratio high under load.
    fn ring_doorbell(&self) {
        if self.ctx.host_state().load() == Some(PeerState::CanConsume) {
            (self.doorbell)();
        }
    }
}

impl CommandStream for ProducerStream {
    fn alloc_buffer(&mut self, min: usize) -> &mut [u8] {
        self.alloc(min)
    }

    fn commit_buffer(&mut self, size: usize) -> usize {
        debug_assert_eq!(size, self.pending as usize);
        self.flush()
    }

    fn read_raw(&mut self, dst: &mut [u8]) -> Option<usize> {
        if dst.is_empty() {
            return Some(0);
        }
        self.flush();
        self.ctx.guest_state().store(PeerState::CanConsume);
        loop {
            let n = self.ctx.from_host_large().read(dst, 1);
            if n > 0 {
                self.ctx.guest_state().store(PeerState::Rendering);
                return Some(n);
            }
            if self.should_exit || self.ctx.host_state().load() == Some(PeerState::Exit) {
                self.should_exit = true;
                self.ctx.guest_state().store(PeerState::Rendering);
                return None;
            }
            ring_yield();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn observer(region: &Arc<SharedRegion>) -> RingContext {
        // SAFETY: test-only second view acting as the consumer side.
        unsafe { RingContext::bind(region.base(), region.xfer_buffer_size()) }
    }

    fn pop_descriptor(ctx: &RingContext) -> Option<XferDesc> {
        let mut bytes = [0u8; XFER_DESC_SIZE];
        if ctx.to_host().read(&mut bytes, XFER_DESC_SIZE) == 0 {
            return None;
        }
        Some(XferDesc::from_bytes(bytes))
    }

    #[test]
    fn test_flush_publishes_one_descriptor() {
        let region = SharedRegion::create_anonymous(16384).unwrap();
        let server = observer(&region);
        let mut producer = ProducerStream::new(Arc::clone(&region), || {});

        producer.alloc(128).fill(0xab);
        producer.alloc(64).fill(0xcd);
        assert_eq!(producer.flush(), 192);

        let desc = pop_descriptor(&server).unwrap();
        assert_eq!(desc.offset, 0);
        assert_eq!(desc.size, 192);

        let payload =
            unsafe { std::slice::from_raw_parts(server.buffer_ptr(), desc.size as usize) };
        assert!(payload[..128].iter().all(|&b| b == 0xab));
        assert!(payload[128..192].iter().all(|&b| b == 0xcd));
        assert!(pop_descriptor(&server).is_none());
    }

    #[test]
    fn test_alloc_flushes_when_step_overflows() {
        let region = SharedRegion::create_anonymous(16384).unwrap();
        let server = observer(&region);
        let mut producer = ProducerStream::new(Arc::clone(&region), || {});

        // 4096-byte step: the 11th 384-byte packet cannot fit on top of
        // ten pending ones, so the first ten flush on their own.
        for _ in 0..11 {
            producer.alloc(384).fill(0xff);
        }
        let desc = pop_descriptor(&server).unwrap();
        assert_eq!(desc.size, 3840);
        assert_eq!(desc.offset, 0);

        assert_eq!(producer.flush(), 384);
        let desc = pop_descriptor(&server).unwrap();
        assert_eq!(desc.offset, 3840);
        assert_eq!(desc.size, 384);
    }

    #[test]
    fn test_staging_wraps_after_drain() {
        let region = SharedRegion::create_anonymous(4096).unwrap();
        let server = observer(&region);
        let mut producer = ProducerStream::new(Arc::clone(&region), || {});

        // Buffer and step are both 4096: every flush fills the buffer and
        // the next alloc must wrap back to offset zero.
        for _ in 0..3 {
            producer.alloc(4096).fill(0x5a);
            producer.flush();
            let desc = pop_descriptor(&server).unwrap();
            assert_eq!(desc.offset, 0);
            assert_eq!(desc.size, 4096);
        }
    }

    #[test]
    fn test_doorbell_suppression() {
        let region = SharedRegion::create_anonymous(16384).unwrap();
        let server = observer(&region);
        let rings = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&rings);
        let mut producer = ProducerStream::new(Arc::clone(&region), move || {
            counted.fetch_add(1, Ordering::Relaxed);
        });

        // A zeroed region reads CanConsume, so the first flush rings.
        producer.alloc(16).fill(1);
        producer.flush();
        assert_eq!(rings.load(Ordering::Relaxed), 1);

        // While the consumer renders, the doorbell is suppressed.
        server.host_state().store(PeerState::Rendering);
        producer.alloc(16).fill(2);
        producer.flush();
        assert_eq!(rings.load(Ordering::Relaxed), 1);

        server.host_state().store(PeerState::CanConsume);
        producer.alloc(16).fill(3);
        producer.flush();
        assert_eq!(rings.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_write_fully_large_goes_through_large_ring() {
        let region = SharedRegion::create_anonymous(16384).unwrap();
        let server = observer(&region);
        server.host_state().store(PeerState::Rendering);
        let mut producer = ProducerStream::new(Arc::clone(&region), || {});

        let payload = vec![0xaa; 8192];
        assert_eq!(producer.write_fully(&payload), 8192);

        // Nothing on the command ring; the announcement and the bytes sit
        // on the large ring.
        assert_eq!(server.to_host().available_read(), 0);
        assert_eq!(server.to_host_large().available_read(), 8192);
        assert_eq!(server.config().transfer_size.load(Ordering::Acquire), 8192);
        assert_eq!(
            TransferMode::from_u32(server.config().transfer_mode.load(Ordering::Acquire)),
            Some(TransferMode::Type1)
        );
    }

    #[test]
    fn test_large_write_abandons_on_exit() {
        let region = SharedRegion::create_anonymous(4096).unwrap();
        let server = observer(&region);
        let mut producer = ProducerStream::new(Arc::clone(&region), || {});

        server.host_state().store(PeerState::Exit);

        // 20000 bytes cannot fit the 4096-byte ring; with no consumer the
        // producer observes the exit once the ring fills.
        let payload = vec![0x11; 20000];
        let sent = producer.write_fully(&payload);
        assert_eq!(sent, 4096);
        assert!(producer.should_exit());

        // Terminal: further writes send nothing.
        assert_eq!(producer.write_fully(&payload), 0);
    }

    #[test]
    fn test_flush_without_pending_is_a_no_op() {
        let region = SharedRegion::create_anonymous(4096).unwrap();
        let mut producer = ProducerStream::new(region, || {});
        assert_eq!(producer.flush(), 0);
        assert_eq!(producer.stats(), StreamStats::default());
    }
}
