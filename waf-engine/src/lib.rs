//! Request decision engine for a web application firewall
//!
//! Each request is checked against IP access lists, then against ordered
//! regex rules, and the verdict is recorded on a bounded telemetry stream
//! that feeds live tails and rollups.

pub mod access;
pub mod aggregate;
pub mod config;
pub mod decision;
pub mod error;
pub mod firewall;
pub mod ingress;
pub mod model;
pub mod rules;
pub mod telemetry;

// Re-export commonly used types
pub use access::AccessList;
pub use aggregate::{Bucket, TimeRange, TrafficSummary};
pub use config::{Config, ConfigLoader, ConfigValidator};
pub use decision::{DecisionEngine, DecisionPolicy};
pub use error::{PatternError, Result, ValidationError, WafError};
pub use firewall::Firewall;
pub use ingress::{IngressServer, IngressServerConfig};
pub use model::{
    AccessStatus, Action, IpEntry, ListType, LogEntry, NewIpEntry, NewRule, Request, Rule,
    ThreatLevel, Verdict,
};
pub use rules::{PatternEngine, RegexEngine, ResolutionMode, RuleSet};
pub use telemetry::{Subscription, TelemetryStream};
