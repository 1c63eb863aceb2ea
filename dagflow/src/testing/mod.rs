//! Test doubles and builders for dagflow configurations.
//!
//! This module provides:
//! - Mock nodes that record their execution in a shared [`ExecutionLog`]
//! - [`ConfigFixture`], a builder for configuration documents

mod fixtures;
mod mocks;

pub use fixtures::ConfigFixture;
pub use mocks::{register_mocks, ExecutionLog, FailingNode, ProducerNode, RecordingNode, TerminatingNode};
