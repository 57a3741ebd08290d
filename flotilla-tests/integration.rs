//! Integration tests for Flotilla
//!
//! These tests run the orchestrator end to end against the simulated
//! registry and transport, verifying stage interactions: provisioning
//! feeding session creation, pooled dispatch, and batched teardown.

#[path = "integration/fleet_lifecycle.rs"]
mod fleet_lifecycle;

#[path = "integration/provisioning.rs"]
mod provisioning;

#[path = "integration/failure_isolation.rs"]
mod failure_isolation;
