//! Health check endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::reboot::floor_to_secs;
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// Basic health check (is the server running?)
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
pub struct ReadyResponse {
    status: &'static str,
    safe_time_secs: u64,
    redis: bool,
}

/// Readiness check: the safe reboot time is known and Redis answers
pub async fn ready_check(
    State(state): State<AppState>,
) -> Result<Json<ReadyResponse>, StatusCode> {
    let safe_time = match state.calculator.get_time_to_assume_node_rebooted().await {
        Ok(t) => t,
        Err(e) => {
            tracing::debug!(error = %e, "Not ready: safe time unknown");
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    let redis_ok = check_redis(&state).await;
    if !redis_ok {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(ReadyResponse {
        status: "ready",
        safe_time_secs: floor_to_secs(safe_time),
        redis: state.redis.is_some(),
    }))
}

async fn check_redis(state: &AppState) -> bool {
    let Some(redis) = &state.redis else {
        return true;
    };
    let mut conn = redis.clone();
    let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
    result.is_ok()
}

#[derive(Serialize)]
pub struct WatchdogStatus {
    state: &'static str,
    timeout_secs: u64,
    last_feed_age_ms: Option<u64>,
    feed_count: u64,
}

#[derive(Serialize)]
pub struct StatusResponse {
    node: String,
    agent: bool,
    role: Option<&'static str>,
    watchdog: Option<WatchdogStatus>,
    safe_time_secs: Option<u64>,
    safe_time_error: Option<String>,
    uptime_secs: u64,
}

/// Node, watchdog and safe time overview
pub async fn status(
    State(state): State<AppState>,
) -> Json<StatusResponse> {
    let watchdog = state.watchdog.as_ref().map(|wd| WatchdogStatus {
        state: wd.status().as_str(),
        timeout_secs: wd.timeout().as_secs(),
        last_feed_age_ms: wd
            .last_feed_time()
            .map(|at| at.elapsed().as_millis() as u64),
        feed_count: wd.feed_count(),
    });

    let (safe_time_secs, safe_time_error) =
        match state.calculator.get_time_to_assume_node_rebooted().await {
            Ok(t) => (Some(floor_to_secs(t)), None),
            Err(e) => (None, Some(e.to_string())),
        };

    Json(StatusResponse {
        node: state.node_name().to_string(),
        agent: state.calculator.is_agent(),
        role: state.control_plane.as_ref().map(|m| m.node_role().as_str()),
        watchdog,
        safe_time_secs,
        safe_time_error,
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}
