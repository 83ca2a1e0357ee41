//! Engine boundary consumed by the console: ingress, rule and IP management,
//! telemetry and rollups

use crate::access::{AccessCounts, AccessList};
use crate::aggregate::{self, Bucket, TimeRange, TrafficSummary};
use crate::config::{Config, ConfigValidator};
use crate::decision::{DecisionEngine, DecisionPolicy};
use crate::error::Result;
use crate::model::{
    AccessStatus, EntryId, IpEntry, LogEntry, NewIpEntry, NewRule, Request, Rule, RuleId,
};
use crate::rules::{PatternEngine, RuleSet};
use crate::telemetry::{Subscription, TelemetryStream};
use chrono::Duration;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::info;

pub struct Firewall {
    engine: DecisionEngine,
}

impl Firewall {
    pub fn new(engine: DecisionEngine) -> Self {
        Self { engine }
    }

    /// Build from plain configuration data: seed rules and entries, engine
    /// policy and stream capacity
    pub fn from_config(config: &Config) -> Result<Self> {
        ConfigValidator::validate(config)?;

        let patterns: Arc<dyn PatternEngine> = Arc::new(config.matching.engine());
        let rules = RuleSet::from_rules(config.seed_rules(), patterns)?;
        let access = AccessList::from_entries(config.seed_entries()?)?;
        let telemetry = TelemetryStream::with_limits(
            config.telemetry.capacity,
            config.telemetry.subscriber_backlog,
        );

        info!(
            "Engine ready: {} rules, {} access entries, telemetry capacity {}",
            rules.len(),
            access.len(),
            telemetry.capacity()
        );

        Ok(Self::new(DecisionEngine::new(
            Arc::new(access),
            Arc::new(rules),
            telemetry,
            config.engine.clone(),
        )))
    }

    /// Empty rule set and access lists with default policy
    pub fn empty() -> Self {
        Self::new(DecisionEngine::new(
            Arc::new(AccessList::new()),
            Arc::new(RuleSet::new()),
            TelemetryStream::new(),
            DecisionPolicy::default(),
        ))
    }

    // Ingress

    pub fn classify(&self, request: &Request) -> LogEntry {
        self.engine.classify(request)
    }

    // Rule management

    pub fn list_rules(&self) -> Vec<Rule> {
        self.engine.rules().list()
    }

    pub fn add_rule(&self, rule: NewRule) -> Result<Rule> {
        self.engine.rules().add(rule)
    }

    pub fn update_rule(&self, id: RuleId, rule: NewRule) -> Result<Rule> {
        self.engine.rules().update(id, rule)
    }

    pub fn enable_rule(&self, id: RuleId) -> Result<Rule> {
        self.engine.rules().set_enabled(id, true)
    }

    pub fn disable_rule(&self, id: RuleId) -> Result<Rule> {
        self.engine.rules().set_enabled(id, false)
    }

    pub fn delete_rule(&self, id: RuleId) -> Result<Rule> {
        self.engine.rules().remove(id)
    }

    // IP management

    pub fn list_entries(&self) -> Vec<IpEntry> {
        self.engine.access().entries()
    }

    pub fn add_entry(&self, entry: NewIpEntry) -> Result<IpEntry> {
        self.engine.access().add(entry)
    }

    pub fn remove_entry(&self, id: EntryId) -> Result<IpEntry> {
        self.engine.access().remove(id)
    }

    pub fn query(&self, ip: IpAddr) -> AccessStatus {
        self.engine.access().query(ip)
    }

    pub fn search_entries(&self, needle: &str) -> Vec<IpEntry> {
        self.engine.access().filter(needle)
    }

    pub fn entry_counts(&self) -> AccessCounts {
        self.engine.access().counts()
    }

    // Telemetry

    pub fn subscribe(&self) -> Subscription {
        self.engine.telemetry().subscribe()
    }

    pub fn pause(&self, handle: &Subscription) {
        handle.pause();
    }

    pub fn resume(&self, handle: &Subscription) {
        handle.resume();
    }

    /// Empty the log. Rule hit counters and access lists are untouched.
    pub fn clear(&self) {
        self.engine.telemetry().clear();
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.engine.telemetry().snapshot()
    }

    // Aggregation

    pub fn bucketize(&self, range: TimeRange, width: Duration) -> Result<Vec<Bucket>> {
        aggregate::bucketize(&self.snapshot(), range, width)
    }

    /// Per-category counts over `range`, or the whole log when `None`
    pub fn by_category(&self, range: Option<TimeRange>) -> BTreeMap<String, u64> {
        aggregate::by_category(&self.entries_in(range), &self.list_rules())
    }

    pub fn summary(&self, range: Option<TimeRange>) -> TrafficSummary {
        aggregate::summary(&self.entries_in(range))
    }

    fn entries_in(&self, range: Option<TimeRange>) -> Vec<LogEntry> {
        let snapshot = self.snapshot();
        match range {
            Some(range) => aggregate::within(&snapshot, range),
            None => snapshot,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }
}
