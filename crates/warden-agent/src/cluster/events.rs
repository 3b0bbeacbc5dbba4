//! Audit event sink.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::time::Duration;
use warden_common::AuditEvent;
use warden_common::constants::redis_keys;

use super::{redis_err, with_deadline};

/// Accepts user-visible audit events. Recording never fails the caller.
#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Pushes events onto a capped Redis list
#[derive(Clone)]
pub struct RedisEventRecorder {
    redis: ConnectionManager,
    timeout: Duration,
}

impl RedisEventRecorder {
    pub fn new(redis: ConnectionManager, timeout: Duration) -> Self {
        Self { redis, timeout }
    }
}

#[async_trait]
impl EventRecorder for RedisEventRecorder {
    async fn record(&self, event: AuditEvent) {
        let data = match serde_json::to_string(&event) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize audit event");
                return;
            }
        };

        let mut conn = self.redis.clone();
        let result = with_deadline(self.timeout, "event record", async move {
            let outcome: redis::RedisResult<()> = redis::pipe()
                .lpush(redis_keys::EVENTS, data)
                .ignore()
                .ltrim(redis_keys::EVENTS, 0, redis_keys::MAX_EVENTS - 1)
                .ignore()
                .query_async(&mut conn)
                .await;
            outcome.map_err(redis_err)
        })
        .await;

        if let Err(e) = result {
            tracing::warn!(
                error = %e,
                reason = %event.reason,
                object = %event.object,
                "Failed to record audit event"
            );
        }
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemoryEventRecorder {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl EventRecorder for MemoryEventRecorder {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
