//! ringline: lock-free shared-memory command stream transport.
//!
//! Two cooperating peers, a client producing command bytes and a server
//! consuming them in order, share one contiguous memory region. The
//! region carries two independent SPSC lanes multiplexed into a single
//! ordered byte stream:
//!
//! - a **command ring** of fixed 8-byte descriptors, each pointing at a
//!   payload slice the client staged in the shared transfer buffer;
//! - a **large ring** that streams oversized payloads straight through
//!   the transfer buffer, announced by an atomic transfer size.
//!
//! The only out-of-band coupling is a doorbell (client→server wake) and
//! an unavailable-read callback (server blocks for a doorbell after a
//! bounded spin). Everything else is acquire/release on the shared words.
//!
//! # Characteristics
//!
//! - SPSC throughout: one writer and one reader per ring
//! - No locks; the consumer's only suspension point is the
//!   unavailable-read callback
//! - Doorbell suppression: the client rings only when the server is
//!   observably waiting
//! - Partial reads carried across calls, so callers may read in any
//!   granularity
//!
//! # Quick start
//!
//! ```
//! use std::sync::Arc;
//! use ringline::{ConsumerStream, ProducerStream, SharedRegion, WakeResult, WakeSignal};
//!
//! let region = SharedRegion::create_anonymous(16384).unwrap();
//! let signal = Arc::new(WakeSignal::new());
//!
//! let bell = Arc::clone(&signal);
//! let mut client = ProducerStream::new(Arc::clone(&region), move || bell.signal());
//!
//! let wait = Arc::clone(&signal);
//! let mut server = ConsumerStream::new(region, move || {
//!     wait.wait();
//!     WakeResult::Woken
//! });
//!
//! client.alloc(5).copy_from_slice(b"hello");
//! client.flush();
//!
//! let mut buf = [0u8; 5];
//! assert_eq!(server.read(&mut buf), 5);
//! assert_eq!(&buf, b"hello");
//! ```

#![forbid(unsafe_op_in_unsafe_fn)]

pub mod layout;

mod consumer;
mod context;
mod descriptor;
mod error;
mod producer;
mod region;
mod ring;
mod stream;
mod wake;

pub use consumer::ConsumerStream;
pub use context::{RingContext, StreamConfig};
pub use descriptor::{TransferMode, XferDesc, XFER_DESC_SIZE};
pub use error::RegionError;
pub use layout::{region_size, PeerState, RingConfig, RingStorage, StateWord};
pub use producer::ProducerStream;
pub use region::SharedRegion;
pub use ring::{ring_yield, Ring};
pub use stream::{CommandStream, StreamStats};
pub use wake::{Doorbell, DoorbellFn, UnavailableReadFn, WakeResult, WakeSignal};
