//! Common utilities and types shared across Embaixada crates.
//!
//! This module provides the error taxonomy used by the sync core and the
//! remote API layer, plus small shared value types.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{Clock, EpochMillis, ManualClock, OperationId, SystemClock};
