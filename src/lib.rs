//! Continuously refreshed health picture for a fleet of git checkouts.
//!
//! [`scan::start`] spawns the orchestrator and returns a [`dashboard::Dashboard`]
//! handle for reading the published snapshot and requesting rescans.

pub mod classify;
pub mod config;
pub mod dashboard;
pub mod discovery;
pub mod git;
pub mod model;
pub mod probe;
pub mod process;
pub mod review;
pub mod scan;
pub mod worktree;

#[cfg(test)]
pub(crate) mod testutil;
