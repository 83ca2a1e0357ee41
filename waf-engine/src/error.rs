//! Error types for engine management operations

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, WafError>;

#[derive(Debug, Error)]
pub enum WafError {
    #[error("Configuration validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Invalid rule pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    #[error("Invalid address: {address}")]
    InvalidAddress { address: String },

    #[error("Duplicate {list} entry: {address}")]
    DuplicateEntry { address: String, list: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: u64 },

    #[error("Invalid time range: {0}")]
    InvalidRange(String),

    #[error("Malformed request line: {0}")]
    MalformedRequest(String),

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Failed to serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Line codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WafError {
    pub(crate) fn rule_not_found(id: u64) -> Self {
        WafError::NotFound { kind: "Rule", id }
    }

    pub(crate) fn entry_not_found(id: u64) -> Self {
        WafError::NotFound { kind: "IP entry", id }
    }
}

/// A rule pattern the matching engine refused to compile
#[derive(Debug, Clone, Error)]
#[error("{pattern}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Duplicate rule id: {id}")]
    DuplicateRuleId { id: u64 },

    #[error("Rule {id} has an invalid pattern: {source}")]
    InvalidPattern {
        id: u64,
        #[source]
        source: PatternError,
    },

    #[error("Invalid access entry address: {address}")]
    InvalidAddress { address: String },

    #[error("Duplicate access entry: {address} ({list})")]
    DuplicateEntry { address: String, list: String },

    #[error("{kind} id {id} leaves no room for new ids")]
    IdExhausted { kind: &'static str, id: u64 },

    #[error("Telemetry capacity must be greater than zero")]
    ZeroCapacity,

    #[error("Subscriber backlog must be greater than zero")]
    ZeroBacklog,

    #[error("Invalid HTTP status for {field}: {status}")]
    InvalidStatus { field: &'static str, status: u16 },
}
