//! Per-request decision: access lists first, then rules

use crate::access::AccessList;
use crate::model::{AccessStatus, Action, LogEntry, Request, ThreatLevel, Verdict};
use crate::rules::{ResolutionMode, RuleSet};
use crate::telemetry::TelemetryStream;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Engine-level policy knobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DecisionPolicy {
    #[serde(default)]
    pub resolution: ResolutionMode,
    #[serde(default = "default_block_status")]
    pub block_status: u16,
    #[serde(default = "default_pass_status")]
    pub flag_status: u16,
    #[serde(default = "default_pass_status")]
    pub allow_status: u16,
    /// Report BLOCKs decided by a severe rule as CRITICAL instead of HIGH
    #[serde(default = "default_true")]
    pub escalate_severe: bool,
}

fn default_block_status() -> u16 {
    403
}

fn default_pass_status() -> u16 {
    200
}

fn default_true() -> bool {
    true
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            resolution: ResolutionMode::default(),
            block_status: default_block_status(),
            flag_status: default_pass_status(),
            allow_status: default_pass_status(),
            escalate_severe: true,
        }
    }
}

impl DecisionPolicy {
    pub fn status_for(&self, action: Action) -> u16 {
        match action {
            Action::Block => self.block_status,
            Action::Flag => self.flag_status,
            Action::Allow => self.allow_status,
        }
    }
}

/// Combines the access lists and rule set into one verdict per request and
/// records every decision on the telemetry stream.
#[derive(Debug)]
pub struct DecisionEngine {
    access: Arc<AccessList>,
    rules: Arc<RuleSet>,
    telemetry: TelemetryStream,
    policy: DecisionPolicy,
    next_id: AtomicU64,
}

impl DecisionEngine {
    pub fn new(
        access: Arc<AccessList>,
        rules: Arc<RuleSet>,
        telemetry: TelemetryStream,
        policy: DecisionPolicy,
    ) -> Self {
        Self {
            access,
            rules,
            telemetry,
            policy,
            next_id: AtomicU64::new(1),
        }
    }

    /// Decide without recording. Rule hit counters still advance.
    pub fn decide(&self, request: &Request) -> Verdict {
        let (status, entry) = self.access.lookup(request.source_ip);
        let note = entry.and_then(|entry| entry.note);

        match status {
            AccessStatus::Blacklisted => Verdict {
                action: Action::Block,
                matched_rule: None,
                reason: list_reason("IP blacklisted", note),
                severe: false,
            },
            AccessStatus::Whitelisted => Verdict {
                action: Action::Allow,
                matched_rule: None,
                reason: list_reason("IP whitelisted", note),
                severe: false,
            },
            AccessStatus::Unlisted => self
                .rules
                .evaluate_with(&request.surface(), self.policy.resolution),
        }
    }

    /// Classify a request and append the resulting entry to the stream.
    ///
    /// Always produces an entry; worst case it is the implicit ALLOW.
    pub fn classify(&self, request: &Request) -> LogEntry {
        let verdict = self.decide(request);
        let entry = self.record(request, verdict);

        debug!(
            id = entry.id,
            ip = %entry.source_ip,
            method = %entry.method,
            path = %entry.path,
            action = %entry.action,
            threat = %entry.threat_level,
            "Classified request"
        );

        self.telemetry.append(entry.clone());
        entry
    }

    fn record(&self, request: &Request, verdict: Verdict) -> LogEntry {
        let threat_level =
            ThreatLevel::for_action(verdict.action, verdict.severe, self.policy.escalate_severe);

        // The implicit allow carries no details
        let details = if verdict == Verdict::implicit_allow() {
            None
        } else {
            Some(verdict.reason)
        };

        LogEntry {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            timestamp: request.timestamp.unwrap_or_else(Utc::now),
            source_ip: request.source_ip,
            method: request.method.clone(),
            path: request.path.clone(),
            status: self.policy.status_for(verdict.action),
            action: verdict.action,
            threat_level,
            matched_rule_id: verdict.matched_rule,
            details,
        }
    }

    pub fn access(&self) -> &Arc<AccessList> {
        &self.access
    }

    pub fn rules(&self) -> &Arc<RuleSet> {
        &self.rules
    }

    pub fn telemetry(&self) -> &TelemetryStream {
        &self.telemetry
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }
}

fn list_reason(base: &str, note: Option<String>) -> String {
    match note {
        Some(note) => format!("{} ({})", base, note),
        None => base.to_string(),
    }
}
