//! Shared test utilities for mediaflow integration tests.
//!
//! This module provides:
//! - `TestHarness` owning a temp directory, a job store and a recording listener
//! - Builders for job specs and scripted fake stage adapters

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
