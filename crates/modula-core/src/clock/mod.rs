//! Causal clock
//!
//! Hybrid logical clock timestamps that order events across nodes without a
//! shared clock.
//!
//! # Usage
//!
//! ```ignore
//! use modula_core::clock::HybridClock;
//! use std::sync::Arc;
//!
//! // Construct once at startup and share
//! let clock = Arc::new(HybridClock::new());
//!
//! let local = clock.now();
//! let merged = clock.update(remote_timestamp);
//! assert!(merged.after(&local));
//! ```

pub mod hlc;
pub mod timestamp;

pub use hlc::{HybridClock, SystemWallClock, WallClock};
pub use timestamp::{LOGICAL_BITS, MAX_PHYSICAL, Timestamp};
