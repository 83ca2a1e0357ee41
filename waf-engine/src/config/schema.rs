//! Configuration schema types

use crate::decision::DecisionPolicy;
use crate::error::{Result, ValidationError};
use crate::model::{Action, EntryId, IpEntry, ListType, Rule, RuleId};
use crate::rules::RegexEngine;
use crate::telemetry::{DEFAULT_BACKLOG, DEFAULT_CAPACITY};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Complete engine configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub common: CommonConfig,
    #[serde(default)]
    pub engine: DecisionPolicy,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    /// Rules in evaluation order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
    #[serde(default)]
    pub access: Vec<AccessConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CommonConfig {
    /// Debug logging, same as passing `--verbose`
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// Undelivered entries kept per live subscriber before the oldest drop
    #[serde(default = "default_backlog")]
    pub subscriber_backlog: usize,
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_backlog() -> usize {
    DEFAULT_BACKLOG
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            subscriber_backlog: default_backlog(),
        }
    }
}

/// Regex engine limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MatchingConfig {
    #[serde(default = "default_size_limit")]
    pub size_limit: usize,
    /// Per-match time budget; 0 disables the check
    #[serde(default = "default_match_budget_ms")]
    pub match_budget_ms: u64,
}

fn default_size_limit() -> usize {
    crate::rules::pattern::DEFAULT_SIZE_LIMIT
}

fn default_match_budget_ms() -> u64 {
    crate::rules::pattern::DEFAULT_MATCH_BUDGET.as_millis() as u64
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            size_limit: default_size_limit(),
            match_budget_ms: default_match_budget_ms(),
        }
    }
}

impl MatchingConfig {
    pub fn engine(&self) -> RegexEngine {
        let budget = match self.match_budget_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        RegexEngine::new()
            .with_size_limit(self.size_limit)
            .with_match_budget(budget)
    }
}

/// A seeded rule
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleConfig {
    pub id: RuleId,
    pub name: String,
    pub pattern: String,
    pub action: Action,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Escalate BLOCKs from this rule to CRITICAL
    #[serde(default)]
    pub severe: bool,
    /// Attack category shown in rollups; derived from the name when absent
    #[serde(default)]
    pub category: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RuleConfig {
    pub fn to_rule(&self) -> Rule {
        Rule {
            id: self.id,
            name: self.name.clone(),
            pattern: self.pattern.clone(),
            action: self.action,
            description: self.description.clone(),
            enabled: self.enabled,
            severe: self.severe,
            category: self.category.clone(),
            hit_count: 0,
        }
    }
}

/// A seeded access list entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct AccessConfig {
    #[serde(default)]
    pub id: Option<EntryId>,
    pub address: String,
    pub list: ListType,
    #[serde(default)]
    pub note: Option<String>,
    #[serde(default)]
    pub added_at: Option<DateTime<Utc>>,
}

impl Config {
    /// Whether binaries should log at debug level
    pub fn debug_logging(&self, verbose_flag: bool) -> bool {
        verbose_flag || self.common.verbose
    }

    pub fn seed_rules(&self) -> Vec<Rule> {
        self.rules.iter().map(RuleConfig::to_rule).collect()
    }

    /// Access entries with ids filled in after the highest explicit id
    pub fn seed_entries(&self) -> Result<Vec<IpEntry>> {
        let max_id = self.access.iter().filter_map(|a| a.id).max().unwrap_or(0);
        let mut next_id = max_id;
        let now = Utc::now();

        let mut entries = Vec::with_capacity(self.access.len());
        for a in &self.access {
            let id = match a.id {
                Some(id) => id,
                None => {
                    next_id = next_id.checked_add(1).ok_or(ValidationError::IdExhausted {
                        kind: "Access entry",
                        id: max_id,
                    })?;
                    next_id
                }
            };
            entries.push(IpEntry {
                id,
                address: a.address.trim().to_string(),
                list_type: a.list,
                note: a.note.clone(),
                added_at: a.added_at.unwrap_or(now),
            });
        }
        Ok(entries)
    }
}
