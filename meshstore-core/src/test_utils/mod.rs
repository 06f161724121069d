//! Test utilities shared by the unit and cross-module suites

pub mod async_helpers;
pub mod fixtures;

pub use async_helpers::*;
pub use fixtures::*;
