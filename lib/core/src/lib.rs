//! Core domain types for the flowgrid workflow executor.
//!
//! This crate provides the strongly-typed identifiers shared by the
//! scheduling engine and the coordinator binary.

pub mod id;

pub use id::{ClientId, ParseIdError, RunnerId, WorkflowId};
