//! Control-plane health decisions.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use warden_common::{NodeRecord, NodeRole, PeerVerdict, Result, RoleFilter, VerdictReason, WardenError};

use super::diagnostics::Diagnostics;
use crate::cluster::NodeRoster;

/// Classify every node by its role labels. The worker label wins over
/// the control-plane labels; a node with neither fails the whole map.
pub fn build_role_map(nodes: &[NodeRecord]) -> Result<HashMap<String, NodeRole>> {
    let mut roles = HashMap::with_capacity(nodes.len());
    for node in nodes {
        let Some(role) = node.role() else {
            error!(node = %node.name, "Could not find role for node");
            return Err(WardenError::Initialization(format!(
                "could not find role for node {}",
                node.name
            )));
        };
        roles.insert(node.name.clone(), role);
    }
    Ok(roles)
}

/// Decides whether a control-plane node should be considered healthy
/// given what its worker peers reported and what it sees locally.
pub struct ControlPlaneManager {
    node_name: String,
    node_role: NodeRole,
    roles: HashMap<String, NodeRole>,
    had_external_access: bool,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ControlPlaneManager {
    /// Build the role map from the roster and snapshot external access.
    ///
    /// Fails with `Initialization` if the roster can't be read, a node has
    /// no role, or this node isn't in the map.
    pub async fn initialize(
        node_name: impl Into<String>,
        roster: &dyn NodeRoster,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Result<Self> {
        let node_name = node_name.into();

        let nodes = roster.list(RoleFilter::Any).await.map_err(|e| {
            error!(error = %e, "Could not retrieve nodes");
            WardenError::Initialization(format!("could not retrieve nodes: {e}"))
        })?;
        let roles = build_role_map(&nodes)?;

        let Some(node_role) = roles.get(&node_name).copied() else {
            error!(node = %node_name, "Could not find role for current node");
            return Err(WardenError::Initialization(format!(
                "could not find role for current node {node_name}"
            )));
        };

        let had_external_access = diagnostics.has_external_access().await;
        info!(
            node = %node_name,
            role = %node_role,
            nodes = roles.len(),
            external_access = had_external_access,
            "Control-plane manager initialized"
        );

        Ok(Self {
            node_name,
            node_role,
            roles,
            had_external_access,
            diagnostics,
        })
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn node_role(&self) -> NodeRole {
        self.node_role
    }

    pub fn is_control_plane(&self) -> bool {
        self.node_role == NodeRole::ControlPlane
    }

    pub fn role_of(&self, node: &str) -> Option<NodeRole> {
        self.roles.get(node).copied()
    }

    pub fn roles(&self) -> &HashMap<String, NodeRole> {
        &self.roles
    }

    /// External access as observed at startup
    pub fn had_external_access(&self) -> bool {
        self.had_external_access
    }

    /// Turn the worker peers' verdict into a final health decision.
    ///
    /// Ambiguous healthy verdicts are only accepted if local diagnostics
    /// pass; reasons with no rule here are unhealthy.
    pub async fn is_control_plane_node_healthy(
        &self,
        verdict: &PeerVerdict,
        other_control_plane_nodes_reachable: bool,
    ) -> bool {
        match &verdict.reason {
            VerdictReason::FailureMarkerFound => false,
            VerdictReason::NodeIsolated => other_control_plane_nodes_reachable,
            VerdictReason::ErrorThresholdNotReached | VerdictReason::FailureMarkerNotFound => true,
            // connected to most workers, which can't reach the API either
            VerdictReason::PeersCannotReachApi => self.is_diagnostics_passed().await,
            VerdictReason::NoPeersFound => {
                self.is_diagnostics_passed().await && other_control_plane_nodes_reachable
            }
            reason @ (VerdictReason::PeerResponseWithinGrace | VerdictReason::Unrecognized(_)) => {
                error!(
                    reason = %reason,
                    node = %self.node_name,
                    "Node is considered unhealthy by worker peers for an unknown reason"
                );
                false
            }
        }
    }

    /// Losing external access that existed at startup, a dead runtime
    /// endpoint, or a dead local API endpoint all fail diagnostics.
    pub async fn is_diagnostics_passed(&self) -> bool {
        if self.had_external_access && !self.diagnostics.has_external_access().await {
            warn!(node = %self.node_name, "Lost external access since startup");
            return false;
        }
        if !self.diagnostics.is_runtime_endpoint_alive().await {
            warn!(node = %self.node_name, "Runtime endpoint is down");
            return false;
        }
        if !self.diagnostics.is_api_endpoint_alive().await {
            warn!(node = %self.node_name, "Local API endpoint is down");
            return false;
        }
        true
    }
}
