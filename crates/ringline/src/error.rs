//! Error types for region setup.
//!
//! Protocol-level failures are not errors in the `Result` sense: the
//! streams surface them through return-value conventions (partial counts,
//! `None` for terminal shutdown) because there is no out-of-band channel
//! between the peers.

use std::io;

/// Errors from creating or opening a shared region.
#[derive(Debug)]
pub enum RegionError {
    /// Invalid configuration.
    InvalidConfig(&'static str),
    /// System error (mmap failed, file could not be created, ...).
    System(io::Error),
}

impl std::fmt::Display for RegionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            Self::System(e) => write!(f, "system error: {}", e),
        }
    }
}

impl std::error::Error for RegionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::System(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RegionError {
    fn from(e: io::Error) -> Self {
        Self::System(e)
    }
}
