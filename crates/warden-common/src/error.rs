//! Common error types for Warden components.

use thiserror::Error;

/// Common errors across Warden components
#[derive(Debug, Error)]
pub enum WardenError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Watchdog device could not be opened, fed, or released
    #[error("Watchdog error: {0}")]
    Watchdog(String),

    /// Operation requires an armed watchdog
    #[error("Watchdog is not armed")]
    WatchdogNotArmed,

    /// A background task was requested outside of a Tokio runtime
    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    /// Config resource store operation failed
    #[error("Store error: {0}")]
    Store(String),

    /// The singleton configuration resource does not exist
    #[error("Configuration resource not found: {0}")]
    ConfigNotFound(String),

    /// The persisted safety floor was never written
    #[error("Safety floor is not initialized: {0}")]
    Uninitialized(String),

    /// The safety floor has not been computed yet
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Optimistic concurrency conflict
    #[error("Conflict on {name}: expected version {expected}, found {found}")]
    Conflict {
        /// Resource name
        name: String,
        /// Version the writer based its update on
        expected: u64,
        /// Version currently stored
        found: u64,
    },

    /// Node roster query failed
    #[error("Roster error: {0}")]
    Roster(String),

    /// Startup classification failed; the agent must not proceed
    #[error("Error initializing control-plane manager: {0}")]
    Initialization(String),

    /// Reachability probe failed
    #[error("Probe error: {0}")]
    Probe(String),

    /// Operation exceeded its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// JSON encoding/decoding failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl WardenError {
    /// Returns true if the caller's reconciliation loop should retry
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Store(_)
                | Self::Roster(_)
                | Self::Conflict { .. }
                | Self::Probe(_)
                | Self::Timeout(_)
                | Self::NotReady(_)
        )
    }

    /// Returns true if the agent must halt
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Initialization(_))
    }
}
