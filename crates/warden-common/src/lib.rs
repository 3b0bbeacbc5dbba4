//! # Warden Common
//!
//! Shared types, errors, and constants used across Warden components.
//!
//! ## Modules
//! - `types` - Node roles, peer verdicts, watchdog state, the safety configuration resource
//! - `error` - Common error type and its retry/fatal classification
//! - `constants` - Timing constants, label keys, Redis key layout

pub mod constants;
pub mod error;
pub mod types;

pub use error::WardenError;
pub use types::*;

/// Result alias used by Warden libraries
pub type Result<T> = std::result::Result<T, WardenError>;
