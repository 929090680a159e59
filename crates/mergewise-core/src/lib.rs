//! Configuration and wiring for the MergeWise context engine.

pub mod bootstrap;
pub mod config;

pub use bootstrap::AppBuilder;
pub use config::Config;
