//! Shared region allocation and mapping.
//!
//! A `SharedRegion` owns one mapping large enough for the control block
//! plus the transfer buffer. Anonymous mappings serve in-process pairs
//! (tests, benchmarks); file-backed mappings serve two-process
//! deployments, where the creator sizes the file and the peer opens it.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::error::RegionError;
use crate::layout::{region_size, MIN_XFER_BUFFER_SIZE};

/// One mapped shared region.
///
/// Streams hold an `Arc<SharedRegion>` so the mapping outlives whichever
/// side shuts down last.
pub struct SharedRegion {
    base: NonNull<u8>,
    size: usize,
    xfer_buffer_size: usize,
}

// SAFETY: SharedRegion hands out only the base pointer; all shared-state
// access goes through the atomic discipline of the views bound over it.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    fn validate(xfer_buffer_size: usize) -> Result<(), RegionError> {
        if !xfer_buffer_size.is_power_of_two() {
            return Err(RegionError::InvalidConfig(
                "transfer buffer size must be a power of two",
            ));
        }
        if xfer_buffer_size < MIN_XFER_BUFFER_SIZE {
            return Err(RegionError::InvalidConfig(
                "transfer buffer size must be at least 4096",
            ));
        }
        Ok(())
    }

    /// Create an anonymous region (not backed by a file).
    ///
    /// The kernel zeroes the mapping, which is the layout's required
    /// initial state.
    pub fn create_anonymous(xfer_buffer_size: usize) -> Result<Arc<Self>, RegionError> {
        Self::validate(xfer_buffer_size)?;
        let size = region_size(xfer_buffer_size);
        let base = unsafe { map_anonymous(size)? };
        Ok(Arc::new(Self {
            base,
            size,
            xfer_buffer_size,
        }))
    }

    /// Create a file-backed region, truncating the file if it exists.
    pub fn create_file(
        path: impl AsRef<std::path::Path>,
        xfer_buffer_size: usize,
    ) -> Result<Arc<Self>, RegionError> {
        Self::validate(xfer_buffer_size)?;
        let size = region_size(xfer_buffer_size);
        let base = unsafe { map_file(path.as_ref(), size, true)? };
        Ok(Arc::new(Self {
            base,
            size,
            xfer_buffer_size,
        }))
    }

    /// Open an existing file-backed region created by the peer.
    ///
    /// `xfer_buffer_size` must match the creator's.
    pub fn open_file(
        path: impl AsRef<std::path::Path>,
        xfer_buffer_size: usize,
    ) -> Result<Arc<Self>, RegionError> {
        Self::validate(xfer_buffer_size)?;
        let size = region_size(xfer_buffer_size);
        let base = unsafe { map_file(path.as_ref(), size, false)? };
        Ok(Arc::new(Self {
            base,
            size,
            xfer_buffer_size,
        }))
    }

    /// Base address of the region.
    #[inline]
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Total mapped size in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.size
    }

    /// Whether the mapping is empty (never true for a constructed region).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Transfer-buffer size this region was created with.
    #[inline]
    pub fn xfer_buffer_size(&self) -> usize {
        self.xfer_buffer_size
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        // SAFETY: base/size came from a successful mmap owned solely by
        // this struct.
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.size);
        }
    }
}

/// Create an anonymous mmap region.
///
/// # Safety
///
/// Returns a pointer to a newly mapped region of `size` bytes, zeroed.
unsafe fn map_anonymous(size: usize) -> Result<NonNull<u8>, RegionError> {
    use libc::{mmap, MAP_ANONYMOUS, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};

    let ptr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_SHARED | MAP_ANONYMOUS,
            -1,
            0,
        )
    };

    if ptr == MAP_FAILED {
        return Err(RegionError::System(std::io::Error::last_os_error()));
    }

    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| RegionError::System(std::io::Error::other("mmap returned null")))
}

/// Create or open a file-backed mmap region.
///
/// # Safety
///
/// Returns a pointer to a newly mapped region of `size` bytes. If `create`
/// is true the file is created/truncated and sized; otherwise it must
/// already exist.
unsafe fn map_file(
    path: &std::path::Path,
    size: usize,
    create: bool,
) -> Result<NonNull<u8>, RegionError> {
    use libc::{mmap, MAP_FAILED, MAP_SHARED, PROT_READ, PROT_WRITE};
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    let file = if create {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size as u64)?;
        file
    } else {
        OpenOptions::new().read(true).write(true).open(path)?
    };

    let fd = file.as_raw_fd();

    let ptr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            PROT_READ | PROT_WRITE,
            MAP_SHARED,
            fd,
            0,
        )
    };

    // The mapping keeps the pages alive; the descriptor can close.
    drop(file);

    if ptr == MAP_FAILED {
        return Err(RegionError::System(std::io::Error::last_os_error()));
    }

    NonNull::new(ptr as *mut u8)
        .ok_or_else(|| RegionError::System(std::io::Error::other("mmap returned null")))
}
