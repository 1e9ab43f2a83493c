//! Integration test suite for provisor
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! - **rendering**: store-backed transitive resolution, secrets and artifacts
//! - **host_config**: host documents rendered from the project layout
//! - **provisioning**: provisioner chains against recording doubles
//! - **cli**: the `provisor` binary end to end (no remote hosts involved)

// Shared test utilities (from parent tests/ directory)
#[path = "../common/mod.rs"]
mod common;

mod cli;
mod host_config;
mod provisioning;
mod rendering;
