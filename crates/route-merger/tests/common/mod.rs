//! Shared test utilities for route-merger integration tests.
//!
//! This module provides:
//! - `TestHarness` wrapping a `MemoryStore` and a reconcile context
//! - Builders for patches and targets

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
