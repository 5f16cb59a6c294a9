//! Shared-region layout definitions.
//!
//! This module defines the `repr(C)` structures that make up the control
//! block at the start of the shared region. Both peers map the same bytes;
//! every mutable field is an atomic and every size is locked by a
//! compile-time assertion.
//!
//! # Memory Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  to_host command ring (indices + 4096 bytes of descriptor records)   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  from_host command ring (reserved lane in this core)                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  to_host large-transfer ring indices                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  from_host large-transfer ring indices                               │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ring config (transfer mode/size, consumed position, error flag)     │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  host state word │ guest state word                                  │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  transfer buffer (power-of-two size, backs both large rings and      │
//! │  every descriptor payload)                                           │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The large rings keep only their indices in the control block; their
//! backing bytes are the transfer buffer that follows it.

use std::sync::atomic::{AtomicU32, Ordering};

/// Size in bytes of each command ring's record storage.
///
/// Holds 512 transfer descriptors of 8 bytes each.
pub const CMD_RING_SIZE: usize = 4096;

/// Smallest transfer buffer the layout accepts.
pub const MIN_XFER_BUFFER_SIZE: usize = 4096;

/// Producer/consumer index pair for one SPSC ring.
///
/// Each index sits on its own cache line to avoid false sharing between
/// the two sides. Indices are free-running; readers mask them with the
/// ring capacity.
#[repr(C, align(64))]
pub struct RingIndices {
    /// Producer cursor (written by producer, read by consumer).
    pub write_pos: AtomicU32,
    _pad0: [u8; 60],
    /// Consumer cursor (written by consumer, read by producer).
    pub read_pos: AtomicU32,
    _pad1: [u8; 60],
}

const _: () = assert!(core::mem::size_of::<RingIndices>() == 128);

impl RingIndices {
    /// Reset both cursors.
    pub fn init(&self) {
        self.write_pos.store(0, Ordering::Relaxed);
        self.read_pos.store(0, Ordering::Relaxed);
    }
}

/// A command ring: index pair plus inline record storage.
#[repr(C)]
pub struct CmdRing {
    pub indices: RingIndices,
    pub data: [u8; CMD_RING_SIZE],
}

const _: () = assert!(core::mem::size_of::<CmdRing>() == 128 + CMD_RING_SIZE);

/// Shared configuration block.
///
/// Written by the producer before the consumer's first read; individual
/// fields are updated with release stores and observed with acquire loads
/// while the stream is live.
#[repr(C, align(64))]
pub struct RingConfig {
    /// Size of the transfer buffer in bytes.
    pub buffer_size: AtomicU32,
    /// Producer staging step; hint for when a flush should be emitted.
    pub flush_interval: AtomicU32,
    /// Bytes the consumer has acknowledged, monotonically advancing.
    pub host_consumed_pos: AtomicU32,
    /// Current descriptor family on the command ring (see `TransferMode`).
    pub transfer_mode: AtomicU32,
    /// Bytes remaining in the currently announced large transfer.
    pub transfer_size: AtomicU32,
    /// Abort flag consulted by large-ring reads.
    pub in_error: AtomicU32,
    _pad: [u8; 40],
}

const _: () = assert!(core::mem::size_of::<RingConfig>() == 64);

/// One observable peer state word on its own cache line.
#[repr(C, align(64))]
pub struct StateWord {
    pub value: AtomicU32,
    _pad: [u8; 60],
}

const _: () = assert!(core::mem::size_of::<StateWord>() == 64);

impl StateWord {
    /// Load the state with acquire ordering.
    #[inline]
    pub fn load(&self) -> Option<PeerState> {
        PeerState::from_u32(self.value.load(Ordering::Acquire))
    }

    /// Publish a new state with release ordering.
    #[inline]
    pub fn store(&self, state: PeerState) {
        self.value.store(state as u32, Ordering::Release);
    }
}

/// Observable values of `host_state` and `guest_state`.
///
/// These are hints: no ordering is implied beyond the word's own
/// acquire/release pair. A lost wakeup is recovered by the consumer's
/// bounded spin before it blocks.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// The peer is inside its read loop and can consume (or is blocked
    /// waiting for a doorbell).
    CanConsume = 0,
    /// The peer is out of the read loop, processing what it read.
    Rendering = 1,
    /// Terminal: the peer is tearing down; writers abandon their sends.
    Exit = 2,
}

impl PeerState {
    /// Convert from the raw word.
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(PeerState::CanConsume),
            1 => Some(PeerState::Rendering),
            2 => Some(PeerState::Exit),
            _ => None,
        }
    }
}

/// The control block at the start of the shared region.
///
/// The transfer buffer follows immediately after this struct.
#[repr(C)]
pub struct RingStorage {
    /// Client→server command ring.
    pub to_host: CmdRing,
    /// Server→client command ring. Part of the wire layout; the server
    /// write path in this core uses only the large ring, so its indices
    /// stay at zero.
    pub from_host: CmdRing,
    /// Client→server large-transfer ring (data in the transfer buffer).
    pub to_host_large: RingIndices,
    /// Server→client large-transfer ring (data in the transfer buffer).
    pub from_host_large: RingIndices,
    pub config: RingConfig,
    pub host_state: StateWord,
    pub guest_state: StateWord,
}

const _: () = assert!(
    core::mem::size_of::<RingStorage>()
        == 2 * core::mem::size_of::<CmdRing>()
            + 2 * core::mem::size_of::<RingIndices>()
            + core::mem::size_of::<RingConfig>()
            + 2 * core::mem::size_of::<StateWord>()
);

/// Total region size for a given transfer-buffer size.
pub const fn region_size(xfer_buffer_size: usize) -> usize {
    core::mem::size_of::<RingStorage>() + xfer_buffer_size
}
