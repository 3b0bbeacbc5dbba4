//! Core types shared across Warden components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::constants::{self, labels};

/// Role of a cluster node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    /// Runs cluster-management services; gets stricter health scrutiny
    ControlPlane,
    /// Runs ordinary workloads
    Worker,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control-plane",
            Self::Worker => "worker",
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node as reported by the roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Node name (unique in the cluster)
    pub name: String,

    /// Role-indicating labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Builder-style label insertion
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn has_label(&self, key: &str) -> bool {
        self.labels.contains_key(key)
    }

    pub fn is_worker(&self) -> bool {
        self.has_label(labels::WORKER_ROLE)
    }

    /// True if either the deprecated or the current control-plane label is set
    pub fn is_control_plane(&self) -> bool {
        self.has_label(labels::MASTER_ROLE) || self.has_label(labels::CONTROL_PLANE_ROLE)
    }

    /// Classify the node; the worker label wins over control-plane labels
    pub fn role(&self) -> Option<NodeRole> {
        if self.is_worker() {
            Some(NodeRole::Worker)
        } else if self.is_control_plane() {
            Some(NodeRole::ControlPlane)
        } else {
            None
        }
    }
}

/// Label-existence filter for roster queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoleFilter {
    /// Every node
    #[default]
    Any,
    /// Nodes carrying the worker label
    Workers,
    /// Nodes carrying a control-plane label
    ControlPlane,
}

impl RoleFilter {
    pub fn matches(&self, node: &NodeRecord) -> bool {
        match self {
            Self::Any => true,
            Self::Workers => node.is_worker(),
            Self::ControlPlane => node.is_control_plane(),
        }
    }
}

/// Why peers consider a node healthy or unhealthy.
///
/// Unknown wire values are kept as `Unrecognized` so they can be logged
/// and handled by the fail-safe path instead of failing deserialization.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VerdictReason {
    /// No failure marker exists for the node
    FailureMarkerNotFound,
    /// API errors haven't reached the threshold, peers not queried yet
    ErrorThresholdNotReached,
    /// Peers are silent but the non-responsive grace period hasn't passed
    PeerResponseWithinGrace,
    /// No peers exist to ask
    NoPeersFound,
    /// Most peers couldn't reach the control-plane API either
    PeersCannotReachApi,
    /// Peers reported a failure marker for the node
    FailureMarkerFound,
    /// The node believes itself isolated
    NodeIsolated,
    /// Any value this build doesn't know
    Unrecognized(String),
}

impl VerdictReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::FailureMarkerNotFound => "failure-marker-not-found",
            Self::ErrorThresholdNotReached => "error-threshold-not-reached",
            Self::PeerResponseWithinGrace => "peer-response-within-grace",
            Self::NoPeersFound => "no-peers-found",
            Self::PeersCannotReachApi => "peers-cannot-reach-api",
            Self::FailureMarkerFound => "failure-marker-found",
            Self::NodeIsolated => "node-isolated",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Reasons reported together with a healthy verdict
    pub fn is_healthy_family(&self) -> bool {
        matches!(
            self,
            Self::FailureMarkerNotFound
                | Self::ErrorThresholdNotReached
                | Self::PeerResponseWithinGrace
                | Self::NoPeersFound
                | Self::PeersCannotReachApi
        )
    }

    /// Reasons reported together with an unhealthy verdict
    pub fn is_unhealthy_family(&self) -> bool {
        matches!(self, Self::FailureMarkerFound | Self::NodeIsolated)
    }
}

impl From<String> for VerdictReason {
    fn from(value: String) -> Self {
        match value.as_str() {
            "failure-marker-not-found" => Self::FailureMarkerNotFound,
            "error-threshold-not-reached" => Self::ErrorThresholdNotReached,
            "peer-response-within-grace" => Self::PeerResponseWithinGrace,
            "no-peers-found" => Self::NoPeersFound,
            "peers-cannot-reach-api" => Self::PeersCannotReachApi,
            "failure-marker-found" => Self::FailureMarkerFound,
            "node-isolated" => Self::NodeIsolated,
            _ => Self::Unrecognized(value),
        }
    }
}

impl From<VerdictReason> for String {
    fn from(value: VerdictReason) -> Self {
        match value {
            VerdictReason::Unrecognized(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for VerdictReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health opinion produced by the peer-communication layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerVerdict {
    pub is_healthy: bool,
    pub reason: VerdictReason,
}

impl PeerVerdict {
    pub fn new(is_healthy: bool, reason: VerdictReason) -> Self {
        Self { is_healthy, reason }
    }

    pub fn healthy(reason: VerdictReason) -> Self {
        Self::new(true, reason)
    }

    pub fn unhealthy(reason: VerdictReason) -> Self {
        Self::new(false, reason)
    }
}

/// Watchdog driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogState {
    /// No keep-alive task; the timer is released
    #[default]
    Disarmed,
    /// Timer open and fed by the keep-alive task
    Armed,
    /// The timer could not be armed
    Malfunctioning,
}

impl WatchdogState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disarmed => "disarmed",
            Self::Armed => "armed",
            Self::Malfunctioning => "malfunctioning",
        }
    }
}

impl std::fmt::Display for WatchdogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-facing settings of the safety configuration resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSpec {
    /// Time after which healthy agents assume an unhealthy node rebooted.
    /// Values below the computed floor are overridden.
    #[serde(default = "default_safe_time")]
    pub safe_time_to_assume_node_rebooted_seconds: u64,

    /// Watchdog device expected on each node
    #[serde(default = "default_watchdog_path")]
    pub watchdog_file_path: String,

    /// Fall back to a software reboot when the watchdog can't be used
    #[serde(default = "default_true")]
    pub is_software_reboot_enabled: bool,

    #[serde(default = "default_api_check_interval")]
    pub api_check_interval_ms: u64,

    #[serde(default = "default_api_server_timeout")]
    pub api_server_timeout_ms: u64,

    #[serde(default = "default_peer_dial_timeout")]
    pub peer_dial_timeout_ms: u64,

    #[serde(default = "default_peer_request_timeout")]
    pub peer_request_timeout_ms: u64,

    /// After this many API errors the node starts contacting its peers
    #[serde(default = "default_max_api_error_threshold")]
    pub max_api_error_threshold: u32,
}

impl Default for ConfigSpec {
    fn default() -> Self {
        Self {
            safe_time_to_assume_node_rebooted_seconds: default_safe_time(),
            watchdog_file_path: default_watchdog_path(),
            is_software_reboot_enabled: true,
            api_check_interval_ms: default_api_check_interval(),
            api_server_timeout_ms: default_api_server_timeout(),
            peer_dial_timeout_ms: default_peer_dial_timeout(),
            peer_request_timeout_ms: default_peer_request_timeout(),
            max_api_error_threshold: default_max_api_error_threshold(),
        }
    }
}

fn default_safe_time() -> u64 { constants::DEFAULT_SAFE_TIME_TO_ASSUME_NODE_REBOOTED_SECS }
fn default_watchdog_path() -> String { constants::DEFAULT_WATCHDOG_PATH.to_string() }
fn default_true() -> bool { true }
fn default_api_check_interval() -> u64 { constants::DEFAULT_API_CHECK_INTERVAL_MS }
fn default_api_server_timeout() -> u64 { constants::DEFAULT_API_SERVER_TIMEOUT_MS }
fn default_peer_dial_timeout() -> u64 { constants::DEFAULT_PEER_DIAL_TIMEOUT_MS }
fn default_peer_request_timeout() -> u64 { constants::DEFAULT_PEER_REQUEST_TIMEOUT_MS }
fn default_max_api_error_threshold() -> u32 { constants::DEFAULT_MAX_API_ERROR_THRESHOLD }

/// Boolean status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A typed status condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Observed state of the safety configuration resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigStatus {
    /// Computed safety floor; zero until an agent writes it
    #[serde(default)]
    pub min_safe_time_to_assume_node_rebooted_seconds: u64,

    /// When an agent last changed this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl ConfigStatus {
    /// Look up a condition by type
    pub fn condition(&self, condition_type: &str) -> Option<&Condition> {
        self.conditions
            .iter()
            .find(|c| c.condition_type == condition_type)
    }

    /// Set a condition, replacing any with the same type.
    ///
    /// `last_transition_time` only moves when the status flips.
    pub fn set_condition(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
        now: DateTime<Utc>,
    ) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.condition_type == condition_type)
        {
            Some(existing) => {
                if existing.status != status {
                    existing.status = status;
                    existing.last_transition_time = now;
                }
                existing.reason = reason.to_string();
                existing.message = message.to_string();
            }
            None => self.conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            }),
        }
    }
}

/// The cluster-visible safety configuration resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafetyConfigResource {
    pub name: String,

    /// Bumped on every write; used for optimistic concurrency
    #[serde(default)]
    pub version: u64,

    #[serde(default)]
    pub spec: ConfigSpec,

    #[serde(default)]
    pub status: ConfigStatus,
}

impl SafetyConfigResource {
    /// A resource with default spec and empty status
    pub fn default_named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: 0,
            spec: ConfigSpec::default(),
            status: ConfigStatus::default(),
        }
    }
}

/// Audit event class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

/// A user-visible audit event attached to a resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub kind: EventKind,
    /// Name of the resource the event refers to
    pub object: String,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn warning(object: impl Into<String>, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            object: object.into(),
            reason: reason.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
