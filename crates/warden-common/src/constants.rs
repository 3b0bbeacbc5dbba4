//! Shared constants for Warden components.

use std::time::Duration;

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default agent HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8890";

/// Name of the singleton safety configuration resource
pub const DEFAULT_CONFIG_NAME: &str = "warden-config";

/// Default watchdog device
pub const DEFAULT_WATCHDOG_PATH: &str = "/dev/watchdog";

/// Default user-configured safe time to assume a node rebooted (seconds)
pub const DEFAULT_SAFE_TIME_TO_ASSUME_NODE_REBOOTED_SECS: u64 = 180;

/// Default API connectivity check interval (milliseconds)
pub const DEFAULT_API_CHECK_INTERVAL_MS: u64 = 15_000;

/// Default timeout for each API connectivity check (milliseconds)
pub const DEFAULT_API_SERVER_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for establishing a peer connection (milliseconds)
pub const DEFAULT_PEER_DIAL_TIMEOUT_MS: u64 = 5_000;

/// Default timeout for each peer request (milliseconds)
pub const DEFAULT_PEER_REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Default number of consecutive API errors before peers are contacted
pub const DEFAULT_MAX_API_ERROR_THRESHOLD: u32 = 3;

/// Upper bound on waiting for any peer response before assuming there are none
pub const MAX_TIME_FOR_NO_PEERS_RESPONSE: Duration = Duration::from_secs(30);

/// Fixed margin added to the computed safe reboot time
pub const SAFE_TIME_BUFFER: Duration = Duration::from_secs(15);

/// Updates of the persisted floor within this window are assumed to come
/// from the same configuration change, applied by different agents
pub const RECENT_UPDATE_WINDOW: Duration = Duration::from_secs(15);

/// Smallest number of peers queried together
pub const MIN_NODES_IN_BATCH: u32 = 3;

/// Batches after the first, smaller one
pub const MAX_BATCHES_AFTER_FIRST: u32 = 10;

/// Worst-case number of peer batches
pub const MAX_BATCHES: u32 = MAX_BATCHES_AFTER_FIRST + 1;

/// Well-known external address used to detect loss of outside connectivity
pub const DEFAULT_EXTERNAL_PROBE_ADDR: &str = "google.com:80";

/// Local workload-runtime (kubelet) port
pub const RUNTIME_ENDPOINT_PORT: u16 = 10250;

/// Local control-plane API endpoint
pub const DEFAULT_API_ENDPOINT_ADDR: &str = "127.0.0.1:6443";

/// Default deadline for a single diagnostic probe (milliseconds)
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 5_000;

/// Default deadline for a single store round trip (milliseconds)
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 5_000;

/// Node role labels
pub mod labels {
    /// Present on worker nodes; takes precedence over the control-plane labels
    pub const WORKER_ROLE: &str = "node-role.kubernetes.io/worker";

    /// Deprecated control-plane label
    pub const MASTER_ROLE: &str = "node-role.kubernetes.io/master";

    /// Current control-plane label
    pub const CONTROL_PLANE_ROLE: &str = "node-role.kubernetes.io/control-plane";
}

/// Redis key layout
pub mod redis_keys {
    /// Node roster hash: field = node name, value = JSON node record
    pub const NODES: &str = "warden:nodes";

    /// Safety configuration resource: warden:config:{name}
    pub const CONFIG_PREFIX: &str = "warden:config:";

    /// Index of configuration resource names
    pub const CONFIG_INDEX: &str = "warden:configs";

    /// Audit event list
    pub const EVENTS: &str = "warden:events";

    /// Maximum audit events retained
    pub const MAX_EVENTS: isize = 1000;
}

/// Status condition types and reasons
pub mod conditions {
    /// Set when the configured safe time is overridden by the computed floor
    pub const SAFE_TIME_OVERRIDDEN: &str = "SafeTimeToAssumeNodeRebootedOverridden";

    /// Condition reason: configured value below the floor
    pub const REASON_SAFE_TIME_INVALID: &str = "SafeTimeIsInvalid";

    /// Condition reason: configured value at or above the floor
    pub const REASON_SAFE_TIME_VALID: &str = "SafeTimeIsValid";

    /// Audit event reason for an overridden safe time
    pub const EVENT_SAFE_TIME_INVALID: &str = "SafeTimeToAssumeNodeRebootedSecondsInvalid";
}
