//! Shared helpers for SealDB benchmarks.

#![warn(missing_docs)]

pub mod utils;
