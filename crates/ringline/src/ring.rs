//! Lock-free SPSC byte-ring primitive.
//!
//! A `Ring` is a non-owning view over one `RingIndices` pair plus its
//! backing bytes (inline command-ring storage or the shared transfer
//! buffer). Exactly one producer and one consumer may operate on a ring;
//! index updates use release stores and index observations use acquire
//! loads, which is the only synchronization the payload copies rely on.
//!
//! Operations that move data take a `step`: the record size in bytes.
//! Whole records only ever cross the ring, which is how descriptor reads
//! on the command ring stay record-aligned.

use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::layout::RingIndices;

/// Cooperative pause used by every busy-wait in the transport.
#[inline]
pub fn ring_yield() {
    std::thread::yield_now();
}

/// SPSC ring view. See the module docs for the access contract.
pub struct Ring {
    indices: NonNull<RingIndices>,
    data: NonNull<u8>,
    capacity: u32,
    mask: u32,
}

// SAFETY: Ring points into shared memory whose cross-thread accesses are
// ordered by the atomic index pair; all methods take &self.
unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    /// Create a ring view from raw pointers.
    ///
    /// # Safety
    ///
    /// - `indices` must point to a valid `RingIndices` in the shared region.
    /// - `data` must point to `capacity` bytes backing this ring.
    /// - Both must remain valid for the lifetime of the view, with at most
    ///   one producer and one consumer using it.
    pub unsafe fn from_raw(indices: *mut RingIndices, data: *mut u8, capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "capacity must be power of 2");
        Self {
            // SAFETY: caller guarantees non-null, valid pointers.
            indices: unsafe { NonNull::new_unchecked(indices) },
            data: unsafe { NonNull::new_unchecked(data) },
            capacity,
            mask: capacity - 1,
        }
    }

    #[inline]
    fn indices(&self) -> &RingIndices {
        // SAFETY: caller of from_raw guaranteed a valid pointer.
        unsafe { self.indices.as_ref() }
    }

    /// Ring capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Bytes available to the consumer.
    #[inline]
    pub fn available_read(&self) -> u32 {
        let idx = self.indices();
        idx.write_pos
            .load(Ordering::Acquire)
            .wrapping_sub(idx.read_pos.load(Ordering::Relaxed))
    }

    /// Bytes of free space available to the producer.
    #[inline]
    pub fn available_write(&self) -> u32 {
        let idx = self.indices();
        self.capacity
            - idx
                .write_pos
                .load(Ordering::Relaxed)
                .wrapping_sub(idx.read_pos.load(Ordering::Acquire))
    }

    /// Copy bytes at `pos` into the ring, splitting at the wrap point.
    ///
    /// # Safety
    ///
    /// The caller must own the `[pos, pos + src.len())` span (unpublished
    /// producer space).
    unsafe fn copy_in(&self, pos: u32, src: &[u8]) {
        let at = (pos & self.mask) as usize;
        let first = src.len().min(self.capacity as usize - at);
        // SAFETY: both parts stay inside the capacity-sized backing span.
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), self.data.as_ptr().add(at), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(
                    src.as_ptr().add(first),
                    self.data.as_ptr(),
                    src.len() - first,
                );
            }
        }
    }

    /// Copy bytes at `pos` out of the ring, splitting at the wrap point.
    ///
    /// # Safety
    ///
    /// The caller must own the `[pos, pos + dst.len())` span (published,
    /// unconsumed bytes).
    unsafe fn copy_out(&self, pos: u32, dst: &mut [u8]) {
        let at = (pos & self.mask) as usize;
        let first = dst.len().min(self.capacity as usize - at);
        // SAFETY: both parts stay inside the capacity-sized backing span.
        unsafe {
            ptr::copy_nonoverlapping(self.data.as_ptr().add(at), dst.as_mut_ptr(), first);
            if first < dst.len() {
                ptr::copy_nonoverlapping(
                    self.data.as_ptr(),
                    dst.as_mut_ptr().add(first),
                    dst.len() - first,
                );
            }
        }
    }

    /// Write as many whole `step`-sized records from `src` as fit.
    ///
    /// Returns the number of bytes written (a multiple of `step`).
    /// Producer side only. Wait-free.
    pub fn write(&self, src: &[u8], step: usize) -> usize {
        debug_assert!(step > 0 && src.len() % step == 0);
        let avail = self.available_write() as usize;
        let n = (avail / step).min(src.len() / step) * step;
        if n == 0 {
            return 0;
        }
        let idx = self.indices();
        let wp = idx.write_pos.load(Ordering::Relaxed);
        // SAFETY: [wp, wp + n) is unpublished producer space.
        unsafe { self.copy_in(wp, &src[..n]) };
        idx.write_pos
            .store(wp.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Read as many whole `step`-sized records into `dst` as are queued.
    ///
    /// Returns the number of bytes read (a multiple of `step`).
    /// Consumer side only. Wait-free.
    pub fn read(&self, dst: &mut [u8], step: usize) -> usize {
        debug_assert!(step > 0);
        let avail = self.available_read() as usize;
        let n = (avail / step).min(dst.len() / step) * step;
        if n == 0 {
            return 0;
        }
        let idx = self.indices();
        let rp = idx.read_pos.load(Ordering::Relaxed);
        // SAFETY: [rp, rp + n) holds published, unconsumed bytes.
        unsafe { self.copy_out(rp, &mut dst[..n]) };
        idx.read_pos
            .store(rp.wrapping_add(n as u32), Ordering::Release);
        n
    }

    /// Consume `steps` records of `step` bytes without copying them.
    ///
    /// Consumer side only. The records must already be available.
    pub fn advance_read(&self, step: usize, steps: usize) {
        let n = (step * steps) as u32;
        debug_assert!(n <= self.available_read());
        let idx = self.indices();
        let rp = idx.read_pos.load(Ordering::Relaxed);
        idx.read_pos.store(rp.wrapping_add(n), Ordering::Release);
    }

    /// Non-advancing peek: copy `dst.len()` bytes starting `offset` bytes
    /// past the read cursor.
    ///
    /// Consumer side only. The span must already be available.
    pub fn copy_contents(&self, offset: usize, dst: &mut [u8]) {
        debug_assert!(offset + dst.len() <= self.available_read() as usize);
        let idx = self.indices();
        let rp = idx
            .read_pos
            .load(Ordering::Relaxed)
            .wrapping_add(offset as u32);
        // SAFETY: the span is published and unconsumed per the contract.
        unsafe { self.copy_out(rp, dst) };
    }

    /// Read exactly `dst.len()` bytes, busy-waiting for the producer,
    /// unless `abort` becomes non-zero first.
    ///
    /// Returns the bytes actually read; a short count means the abort
    /// flag was observed.
    pub fn read_fully_with_abort(&self, dst: &mut [u8], step: usize, abort: &AtomicU32) -> usize {
        let mut done = 0;
        while done < dst.len() {
            if abort.load(Ordering::Acquire) != 0 {
                break;
            }
            let n = self.read(&mut dst[done..], step);
            if n == 0 {
                ring_yield();
                continue;
            }
            done += n;
        }
        done
    }
}
