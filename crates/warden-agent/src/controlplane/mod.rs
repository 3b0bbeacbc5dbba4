//! Health decisions for control-plane nodes.
//!
//! Worker peers report a verdict about this node. For control-plane nodes
//! the ambiguous verdicts (peers can't reach the API, no peers answered)
//! are only trusted if local diagnostics agree.

mod diagnostics;
mod manager;
mod quorum;

pub use diagnostics::{Diagnostics, NetworkDiagnostics, tcp_probe};
pub use manager::{ControlPlaneManager, build_role_map};
pub use quorum::QuorumProbe;
