//! # Warden - node self-fencing agent
//!
//! When a node can't prove it is healthy it must reboot itself within a
//! bounded time, so the rest of the cluster can safely take over its
//! workloads.
//!
//! ## Architecture
//! ```text
//! Watchdog ──timeout──► SafeTimeCalculator ──floor──► Redis (config) ◄── observers
//! Roster + peer verdict + diagnostics ──► ControlPlaneManager ──► fence / no fence
//! ```

pub mod cluster;
pub mod config;
pub mod controlplane;
pub mod reboot;
pub mod routes;
pub mod state;
pub mod watchdog;
