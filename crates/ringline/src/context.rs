//! Typed views over one shared region.
//!
//! A `RingContext` binds, once at construction, every view a stream needs:
//! the four rings, the config block, the two state words, and the transfer
//! buffer base. It owns nothing; both peers bind their own context over
//! the same bytes.

use std::ptr::{addr_of_mut, NonNull};
use std::sync::atomic::Ordering;

use crate::descriptor::TransferMode;
use crate::layout::{RingConfig, RingStorage, StateWord};
use crate::ring::Ring;

/// Non-owning views bound over one shared region.
pub struct RingContext {
    to_host: Ring,
    from_host: Ring,
    to_host_large: Ring,
    from_host_large: Ring,
    storage: NonNull<RingStorage>,
    buffer: NonNull<u8>,
    buffer_size: u32,
}

// SAFETY: RingContext points into shared memory; cross-thread accesses go
// through atomics (indices, config, state words) or through buffer spans
// whose exclusive ownership is enforced by the ring protocol.
unsafe impl Send for RingContext {}
unsafe impl Sync for RingContext {}

impl RingContext {
    /// Bind views over a region of `region_size(xfer_buffer_size)` bytes.
    ///
    /// # Safety
    ///
    /// - `base` must point to a region of at least
    ///   `region_size(xfer_buffer_size)` bytes, zeroed at first use.
    /// - The region must outlive the context.
    /// - Across all contexts bound to the region there must be exactly one
    ///   producer and one consumer per ring.
    pub unsafe fn bind(base: NonNull<u8>, xfer_buffer_size: usize) -> Self {
        debug_assert!(xfer_buffer_size.is_power_of_two());
        let storage = base.cast::<RingStorage>();
        let s = storage.as_ptr();
        // SAFETY: the buffer follows the control block inside the region.
        let buffer = unsafe { base.as_ptr().add(core::mem::size_of::<RingStorage>()) };

        // SAFETY: field projections of the caller-guaranteed storage; the
        // command rings bind their inline record arrays, the large rings
        // bind the shared transfer buffer.
        unsafe {
            Self {
                to_host: Ring::from_raw(
                    addr_of_mut!((*s).to_host.indices),
                    addr_of_mut!((*s).to_host.data) as *mut u8,
                    crate::layout::CMD_RING_SIZE as u32,
                ),
                from_host: Ring::from_raw(
                    addr_of_mut!((*s).from_host.indices),
                    addr_of_mut!((*s).from_host.data) as *mut u8,
                    crate::layout::CMD_RING_SIZE as u32,
                ),
                to_host_large: Ring::from_raw(
                    addr_of_mut!((*s).to_host_large),
                    buffer,
                    xfer_buffer_size as u32,
                ),
                from_host_large: Ring::from_raw(
                    addr_of_mut!((*s).from_host_large),
                    buffer,
                    xfer_buffer_size as u32,
                ),
                storage,
                buffer: NonNull::new_unchecked(buffer),
                buffer_size: xfer_buffer_size as u32,
            }
        }
    }

    /// Client→server command ring.
    #[inline]
    pub fn to_host(&self) -> &Ring {
        &self.to_host
    }

    /// Server→client command ring (reserved lane).
    #[inline]
    pub fn from_host(&self) -> &Ring {
        &self.from_host
    }

    /// Client→server large-transfer ring.
    #[inline]
    pub fn to_host_large(&self) -> &Ring {
        &self.to_host_large
    }

    /// Server→client large-transfer ring.
    #[inline]
    pub fn from_host_large(&self) -> &Ring {
        &self.from_host_large
    }

    /// The shared configuration block.
    #[inline]
    pub fn config(&self) -> &RingConfig {
        // SAFETY: valid for the region's lifetime; all fields are atomic.
        unsafe { &(*self.storage.as_ptr()).config }
    }

    /// The server-side state word.
    #[inline]
    pub fn host_state(&self) -> &StateWord {
        // SAFETY: valid for the region's lifetime; the word is atomic.
        unsafe { &(*self.storage.as_ptr()).host_state }
    }

    /// The client-side state word.
    #[inline]
    pub fn guest_state(&self) -> &StateWord {
        // SAFETY: valid for the region's lifetime; the word is atomic.
        unsafe { &(*self.storage.as_ptr()).guest_state }
    }

    /// Base pointer of the transfer buffer.
    #[inline]
    pub fn buffer_ptr(&self) -> *mut u8 {
        self.buffer.as_ptr()
    }

    /// Transfer buffer size in bytes.
    #[inline]
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Producer-side config initialization, performed before the
    /// consumer's first read.
    pub fn init_config(&self, flush_interval: u32) {
        let cfg = self.config();
        cfg.buffer_size.store(self.buffer_size, Ordering::Relaxed);
        cfg.flush_interval.store(flush_interval, Ordering::Relaxed);
        cfg.host_consumed_pos.store(0, Ordering::Relaxed);
        cfg.transfer_size.store(0, Ordering::Relaxed);
        cfg.in_error.store(0, Ordering::Relaxed);
        cfg.transfer_mode
            .store(TransferMode::Type1 as u32, Ordering::Release);
    }
}

/// Stream tuning knobs.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Producer staging step: pending bytes are flushed before they would
    /// exceed this many bytes. Also published as the config block's flush
    /// interval.
    pub flush_interval: u32,
    /// Empty observations the consumer tolerates before blocking on the
    /// unavailable-read callback.
    pub max_spins: u32,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            flush_interval: 4096,
            max_spins: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{region_size, PeerState, CMD_RING_SIZE};
    use std::alloc::{alloc_zeroed, dealloc, Layout};

    /// Zeroed heap region with the control block's 64-byte alignment.
    struct TestRegion {
        base: NonNull<u8>,
        layout: Layout,
    }

    impl TestRegion {
        fn new(xfer: usize) -> Self {
            let layout = Layout::from_size_align(region_size(xfer), 64).unwrap();
            let ptr = unsafe { alloc_zeroed(layout) };
            Self {
                base: NonNull::new(ptr).unwrap(),
                layout,
            }
        }
    }

    impl Drop for TestRegion {
        fn drop(&mut self) {
            unsafe { dealloc(self.base.as_ptr(), self.layout) };
        }
    }

    #[test]
    fn test_bind_ring_capacities() {
        let region = TestRegion::new(16384);
        let ctx = unsafe { RingContext::bind(region.base, 16384) };

        assert_eq!(ctx.to_host().capacity(), CMD_RING_SIZE as u32);
        assert_eq!(ctx.from_host().capacity(), CMD_RING_SIZE as u32);
        assert_eq!(ctx.to_host_large().capacity(), 16384);
        assert_eq!(ctx.from_host_large().capacity(), 16384);
        assert_eq!(ctx.buffer_size(), 16384);
    }

    #[test]
    fn test_init_config() {
        let region = TestRegion::new(4096);
        let ctx = unsafe { RingContext::bind(region.base, 4096) };

        ctx.init_config(2048);
        let cfg = ctx.config();
        assert_eq!(cfg.buffer_size.load(Ordering::Relaxed), 4096);
        assert_eq!(cfg.flush_interval.load(Ordering::Relaxed), 2048);
        assert_eq!(
            TransferMode::from_u32(cfg.transfer_mode.load(Ordering::Acquire)),
            Some(TransferMode::Type1)
        );
    }

    #[test]
    fn test_both_sides_observe_same_ring() {
        let region = TestRegion::new(4096);
        let client = unsafe { RingContext::bind(region.base, 4096) };
        let server = unsafe { RingContext::bind(region.base, 4096) };

        client.to_host().write(b"ping", 1);
        let mut out = [0u8; 4];
        assert_eq!(server.to_host().read(&mut out, 1), 4);
        assert_eq!(&out, b"ping");

        client.host_state().store(PeerState::Rendering);
        assert_eq!(server.host_state().load(), Some(PeerState::Rendering));
    }
}
