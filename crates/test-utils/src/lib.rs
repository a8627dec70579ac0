//! Shared test utilities for the forecast-cycle workspace.
//!
//! This crate provides common testing infrastructure including:
//! - Temporary data roots with raw and normalized cycle directories
//! - Normalized CSV generators
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{DataRoot, NormalizedCsv};
//! ```

pub mod fixtures;
pub mod generators;

// Re-export commonly used items at the crate root
pub use fixtures::*;
pub use generators::*;
