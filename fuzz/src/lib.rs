//! Fuzzing harnesses for ringline transport components.
//!
//! These fuzzers operate on in-memory replicas of the ring and stream
//! algorithms, without touching real shared memory, to test invariants of
//! the byte ring and the transfer-framing protocol.

pub mod byte_ring_model;
pub mod stream_model;
