//! Test utilities and fixtures
//!
//! Shared helpers for exercising the replication core: a recording
//! transport stub for handler-level tests and a full per-peer stack wired
//! to the in-memory mesh for convergence scenarios.

pub mod fixtures;

pub use fixtures::{settle, RecordingConnection, TestPeer};
