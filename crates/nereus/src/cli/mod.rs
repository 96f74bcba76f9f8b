//! CLI command implementations.

mod display;

pub mod analyze;
pub mod edges;
pub mod query;
pub mod resources;
pub mod stats;
pub mod units;
