//! Data types shared by the access list, rule set and telemetry stream

use crate::error::{Result, WafError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

pub type RuleId = u64;
pub type EntryId = u64;

/// What the engine decided to do with a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Flag,
    Block,
}

impl Action {
    /// Relative strength used by severity-based resolution
    pub fn strength(self) -> u8 {
        match self {
            Action::Allow => 0,
            Action::Flag => 1,
            Action::Block => 2,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "ALLOW"),
            Action::Flag => write!(f, "FLAG"),
            Action::Block => write!(f, "BLOCK"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreatLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    /// Threat level implied by an action.
    ///
    /// BLOCK maps to HIGH, or CRITICAL when the deciding rule is marked
    /// severe and escalation is enabled. FLAG maps to MEDIUM, ALLOW to NONE.
    pub fn for_action(action: Action, severe: bool, escalate: bool) -> Self {
        match action {
            Action::Block if severe && escalate => ThreatLevel::Critical,
            Action::Block => ThreatLevel::High,
            Action::Flag => ThreatLevel::Medium,
            Action::Allow => ThreatLevel::None,
        }
    }

    /// HIGH and CRITICAL entries raise an alert on the console
    pub fn is_alert(self) -> bool {
        self >= ThreatLevel::High
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ThreatLevel::None => "NONE",
            ThreatLevel::Low => "LOW",
            ThreatLevel::Medium => "MEDIUM",
            ThreatLevel::High => "HIGH",
            ThreatLevel::Critical => "CRITICAL",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListType {
    Whitelist,
    Blacklist,
}

impl fmt::Display for ListType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListType::Whitelist => write!(f, "whitelist"),
            ListType::Blacklist => write!(f, "blacklist"),
        }
    }
}

/// Result of an access list query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessStatus {
    Whitelisted,
    Blacklisted,
    Unlisted,
}

/// An inbound request as handed to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub source_ip: IpAddr,
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub body: Option<String>,
    /// Arrival time; the engine stamps the current time when absent
    pub timestamp: Option<DateTime<Utc>>,
}

impl Request {
    pub fn new(source_ip: IpAddr, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            source_ip,
            method: method.into(),
            path: path.into(),
            query: None,
            body: None,
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Parse a request line of the form `IP METHOD TARGET [RFC3339-TIMESTAMP]`.
    ///
    /// A `?` in the target splits it into path and query string.
    pub fn parse_line(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 3 || parts.len() > 4 {
            return Err(WafError::MalformedRequest(format!(
                "expected 'IP METHOD PATH [TIMESTAMP]', got {} fields",
                parts.len()
            )));
        }

        let source_ip: IpAddr = parts[0]
            .parse()
            .map_err(|_| WafError::MalformedRequest(format!("invalid source IP {}", parts[0])))?;

        let (path, query) = match parts[2].split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (parts[2].to_string(), None),
        };

        let timestamp = match parts.get(3) {
            Some(ts) => Some(
                DateTime::parse_from_rfc3339(ts)
                    .map_err(|e| WafError::MalformedRequest(format!("invalid timestamp {}: {}", ts, e)))?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(Self {
            source_ip,
            method: parts[1].to_uppercase(),
            path,
            query,
            body: None,
            timestamp,
        })
    }

    /// The text rules are matched against
    pub fn surface(&self) -> RequestSurface<'_> {
        RequestSurface {
            path: &self.path,
            query: self.query.as_deref(),
            body: self.body.as_deref(),
        }
    }
}

/// Matchable parts of a request: the path, then query and body when present
#[derive(Debug, Clone, Copy)]
pub struct RequestSurface<'a> {
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub body: Option<&'a str>,
}

impl<'a> RequestSurface<'a> {
    pub fn from_path(path: &'a str) -> Self {
        Self {
            path,
            query: None,
            body: None,
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &'a str> {
        std::iter::once(self.path).chain(self.query).chain(self.body)
    }
}

/// Operator input for creating or editing a rule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NewRule {
    pub name: String,
    pub pattern: String,
    pub action: Action,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severe: bool,
    #[serde(default)]
    pub category: Option<String>,
}

impl NewRule {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, action: Action) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            action,
            description: String::new(),
            severe: false,
            category: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn severe(mut self) -> Self {
        self.severe = true;
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Point-in-time view of a rule, including its hit counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub pattern: String,
    pub action: Action,
    pub description: String,
    pub enabled: bool,
    pub severe: bool,
    pub category: Option<String>,
    pub hit_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IpEntry {
    pub id: EntryId,
    /// Address as entered: an IP literal or a CIDR block
    pub address: String,
    pub list_type: ListType,
    pub note: Option<String>,
    pub added_at: DateTime<Utc>,
}

/// Operator input for adding an access list entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewIpEntry {
    pub address: String,
    pub list_type: ListType,
    pub note: Option<String>,
    pub added_at: Option<DateTime<Utc>>,
}

impl NewIpEntry {
    pub fn new(address: impl Into<String>, list_type: ListType) -> Self {
        Self {
            address: address.into(),
            list_type,
            note: None,
            added_at: None,
        }
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// The engine's in-flight decision for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub action: Action,
    pub matched_rule: Option<RuleId>,
    pub reason: String,
    /// Set when the deciding rule is marked severe
    pub severe: bool,
}

impl Verdict {
    /// Implicit result when nothing matched
    pub fn implicit_allow() -> Self {
        Self {
            action: Action::Allow,
            matched_rule: None,
            reason: "No rule matched".to_string(),
            severe: false,
        }
    }
}

/// Immutable record of one classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub source_ip: IpAddr,
    pub method: String,
    pub path: String,
    pub status: u16,
    pub action: Action,
    pub threat_level: ThreatLevel,
    pub matched_rule_id: Option<RuleId>,
    pub details: Option<String>,
}
