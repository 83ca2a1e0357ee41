//! Configuration management for the engine

pub mod loader;
pub mod schema;
pub mod validator;

pub use loader::ConfigLoader;
pub use schema::{AccessConfig, CommonConfig, Config, MatchingConfig, RuleConfig, TelemetryConfig};
pub use validator::ConfigValidator;
