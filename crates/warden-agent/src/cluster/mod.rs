//! Cluster collaborators.
//!
//! The core only talks to the rest of the cluster through these seams:
//! - Node roster (role-labelled node list)
//! - Safety configuration store (singleton resource, optimistic concurrency)
//! - Audit event sink
//!
//! Each seam has a Redis-backed implementation and an in-memory one.

mod events;
mod roster;
mod store;

pub use events::{EventRecorder, MemoryEventRecorder, RedisEventRecorder};
pub use roster::{NodeRoster, RedisNodeRoster, StaticRoster};
pub use store::{ConfigStore, MemoryConfigStore, RedisConfigStore};

use std::future::Future;
use std::time::Duration;
use warden_common::{Result, WardenError};

/// Run a store/roster call under an explicit deadline
pub(crate) async fn with_deadline<T, F>(deadline: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(WardenError::Timeout(format!("{what} after {deadline:?}"))),
    }
}

pub(crate) fn redis_err(e: redis::RedisError) -> WardenError {
    WardenError::Store(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_deadline_times_out() {
        let result: Result<()> = with_deadline(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, WardenError::Timeout(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_with_deadline_passes_result_through() {
        let value = with_deadline(Duration::from_secs(1), "fast call", async { Ok(7) }).await;
        assert_eq!(tokio_test::assert_ok!(value), 7);
    }
}
