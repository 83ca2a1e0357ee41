//! Read-only rollups over a telemetry snapshot
//!
//! Everything here is a pure function of its inputs.

use crate::error::{Result, WafError};
use crate::model::{Action, LogEntry, Rule, RuleId, ThreatLevel};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Category for entries not attributable to a rule
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Most buckets a single `bucketize` call will produce
pub const MAX_BUCKETS: i64 = 10_000;

/// Half-open time range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Smallest range holding every entry, or `None` for an empty slice
    pub fn covering(entries: &[LogEntry]) -> Option<Self> {
        let start = entries.iter().map(|e| e.timestamp).min()?;
        let end = entries.iter().map(|e| e.timestamp).max()?;
        // End is exclusive, so step past the newest entry
        Some(Self::new(start, end + Duration::nanoseconds(1)))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub total: u64,
    pub blocked: u64,
}

/// Headline counters shown on the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrafficSummary {
    pub total: u64,
    pub allowed: u64,
    pub flagged: u64,
    pub blocked: u64,
    /// Entries at HIGH or CRITICAL threat level
    pub alerts: u64,
}

/// Count requests and blocks per fixed-width bucket across `range`.
///
/// Buckets start at `range.start`, ascend in time and cover the whole range;
/// buckets without entries are present with zero counts. Entries outside the
/// range are ignored.
pub fn bucketize(entries: &[LogEntry], range: TimeRange, width: Duration) -> Result<Vec<Bucket>> {
    if width <= Duration::zero() {
        return Err(WafError::InvalidRange(format!(
            "bucket duration must be positive, got {}",
            width
        )));
    }
    if range.end < range.start {
        return Err(WafError::InvalidRange(format!(
            "range ends ({}) before it starts ({})",
            range.end, range.start
        )));
    }

    let width_ns = width
        .num_nanoseconds()
        .ok_or_else(|| WafError::InvalidRange("bucket duration too large".to_string()))?;
    let span_ns = (range.end - range.start)
        .num_nanoseconds()
        .ok_or_else(|| WafError::InvalidRange("range too large".to_string()))?;

    // Ceiling division: a partial trailing bucket still gets a slot
    let count = span_ns / width_ns + i64::from(span_ns % width_ns != 0);
    if count > MAX_BUCKETS {
        return Err(WafError::InvalidRange(format!(
            "{} buckets requested, at most {} allowed",
            count, MAX_BUCKETS
        )));
    }
    let mut buckets: Vec<Bucket> = (0..count)
        .map(|i| Bucket {
            start: range.start + Duration::nanoseconds(i * width_ns),
            total: 0,
            blocked: 0,
        })
        .collect();

    for entry in entries.iter().filter(|e| range.contains(e.timestamp)) {
        let offset = (entry.timestamp - range.start).num_nanoseconds().unwrap_or(0);
        if let Some(bucket) = buckets.get_mut((offset / width_ns) as usize) {
            bucket.total += 1;
            if entry.action == Action::Block {
                bucket.blocked += 1;
            }
        }
    }

    Ok(buckets)
}

/// Attack category for a rule: its configured category, else a tag derived
/// from its name
pub fn category_of(rule: &Rule) -> String {
    if let Some(category) = &rule.category {
        return category.clone();
    }

    let name = rule.name.to_lowercase();
    if name.contains("sql") {
        "SQL Injection".to_string()
    } else if name.contains("xss") || name.contains("script") {
        "XSS".to_string()
    } else if name.contains("traversal") {
        "Path Traversal".to_string()
    } else {
        rule.name.clone()
    }
}

/// Count entries per attack category.
///
/// Entries without a matched rule, or whose rule is no longer in `rules`,
/// count as [`UNCATEGORIZED`].
pub fn by_category(entries: &[LogEntry], rules: &[Rule]) -> BTreeMap<String, u64> {
    let categories: HashMap<RuleId, String> =
        rules.iter().map(|rule| (rule.id, category_of(rule))).collect();

    let mut counts = BTreeMap::new();
    for entry in entries {
        let category = entry
            .matched_rule_id
            .and_then(|id| categories.get(&id))
            .map(String::as_str)
            .unwrap_or(UNCATEGORIZED);
        *counts.entry(category.to_string()).or_insert(0) += 1;
    }
    counts
}

pub fn by_threat_level(entries: &[LogEntry]) -> BTreeMap<ThreatLevel, u64> {
    let mut counts = BTreeMap::new();
    for entry in entries {
        *counts.entry(entry.threat_level).or_insert(0) += 1;
    }
    counts
}

pub fn summary(entries: &[LogEntry]) -> TrafficSummary {
    entries.iter().fold(TrafficSummary::default(), |mut acc, entry| {
        acc.total += 1;
        match entry.action {
            Action::Allow => acc.allowed += 1,
            Action::Flag => acc.flagged += 1,
            Action::Block => acc.blocked += 1,
        }
        if entry.threat_level.is_alert() {
            acc.alerts += 1;
        }
        acc
    })
}

/// Entries whose timestamp falls inside `range`
pub fn within(entries: &[LogEntry], range: TimeRange) -> Vec<LogEntry> {
    entries
        .iter()
        .filter(|e| range.contains(e.timestamp))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::stream::tests::entry;
    use chrono::TimeZone;

    fn at(minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, second).unwrap()
    }

    fn logged(id: u64, ts: DateTime<Utc>, action: Action, rule: Option<RuleId>) -> LogEntry {
        let mut e = entry(id);
        e.timestamp = ts;
        e.action = action;
        e.threat_level = ThreatLevel::for_action(action, false, true);
        e.matched_rule_id = rule;
        e
    }

    fn rule(id: RuleId, name: &str, category: Option<&str>) -> Rule {
        Rule {
            id,
            name: name.to_string(),
            pattern: ".".to_string(),
            action: Action::Block,
            description: String::new(),
            enabled: true,
            severe: false,
            category: category.map(str::to_string),
            hit_count: 0,
        }
    }

    #[test]
    fn test_bucketize_mixed_bucket_and_zero_fill() {
        let entries = vec![
            logged(1, at(0, 5), Action::Allow, None),
            logged(2, at(0, 10), Action::Block, Some(1)),
            logged(3, at(0, 20), Action::Allow, None),
            logged(4, at(0, 30), Action::Block, Some(1)),
            logged(5, at(0, 59), Action::Allow, None),
            logged(6, at(2, 0), Action::Flag, Some(2)),
        ];

        let range = TimeRange::new(at(0, 0), at(3, 0));
        let buckets = bucketize(&entries, range, Duration::minutes(1)).unwrap();

        assert_eq!(buckets.len(), 3);
        assert_eq!((buckets[0].start, buckets[0].total, buckets[0].blocked), (at(0, 0), 5, 2));
        assert_eq!((buckets[1].start, buckets[1].total, buckets[1].blocked), (at(1, 0), 0, 0));
        assert_eq!((buckets[2].start, buckets[2].total, buckets[2].blocked), (at(2, 0), 1, 0));
    }

    #[test]
    fn test_bucketize_partial_trailing_bucket_and_out_of_range() {
        let entries = vec![
            logged(1, at(0, 0), Action::Allow, None),
            logged(2, at(1, 30), Action::Block, None),
            logged(3, at(5, 0), Action::Block, None),
        ];

        let range = TimeRange::new(at(0, 0), at(1, 31));
        let buckets = bucketize(&entries, range, Duration::minutes(1)).unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].total, 1);
        assert_eq!(buckets[1].blocked, 1);
    }

    #[test]
    fn test_bucketize_rejects_bad_input() {
        let range = TimeRange::new(at(1, 0), at(0, 0));
        assert!(bucketize(&[], range, Duration::minutes(1)).is_err());

        let range = TimeRange::new(at(0, 0), at(1, 0));
        assert!(bucketize(&[], range, Duration::zero()).is_err());
        assert!(bucketize(&[], TimeRange::new(at(0, 0), at(0, 0)), Duration::seconds(1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_bucketize_rejects_too_many_buckets() {
        let start = at(0, 0);
        let range = TimeRange::new(start, start + Duration::days(200));
        let err = bucketize(&[], range, Duration::nanoseconds(1)).unwrap_err();
        assert!(matches!(err, WafError::InvalidRange(_)));

        // Exactly at the cap is fine
        let range = TimeRange::new(start, start + Duration::seconds(MAX_BUCKETS));
        assert_eq!(
            bucketize(&[], range, Duration::seconds(1)).unwrap().len(),
            MAX_BUCKETS as usize
        );
    }

    #[test]
    fn test_covering_range_includes_newest() {
        let entries = vec![
            logged(1, at(0, 0), Action::Allow, None),
            logged(2, at(0, 45), Action::Block, None),
        ];
        let range = TimeRange::covering(&entries).unwrap();
        let buckets = bucketize(&entries, range, Duration::seconds(15)).unwrap();

        assert_eq!(buckets.len(), 4);
        assert_eq!(buckets.iter().map(|b| b.total).sum::<u64>(), 2);
        assert_eq!(buckets[3].blocked, 1);
        assert!(TimeRange::covering(&[]).is_none());
    }

    #[test]
    fn test_by_category() {
        let rules = vec![
            rule(1001, "SQL Injection Protection", None),
            rule(1002, "XSS Prevention", None),
            rule(1003, "Directory Traversal", None),
            rule(1005, "Scanner sweep", Some("Recon")),
        ];
        let entries = vec![
            logged(1, at(0, 0), Action::Block, Some(1001)),
            logged(2, at(0, 1), Action::Block, Some(1001)),
            logged(3, at(0, 2), Action::Block, Some(1002)),
            logged(4, at(0, 3), Action::Block, Some(1003)),
            logged(5, at(0, 4), Action::Flag, Some(1005)),
            logged(6, at(0, 5), Action::Allow, None),
            logged(7, at(0, 6), Action::Block, Some(9999)),
        ];

        let counts = by_category(&entries, &rules);
        assert_eq!(counts["SQL Injection"], 2);
        assert_eq!(counts["XSS"], 1);
        assert_eq!(counts["Path Traversal"], 1);
        assert_eq!(counts["Recon"], 1);
        assert_eq!(counts[UNCATEGORIZED], 2);
    }

    #[test]
    fn test_category_falls_back_to_name() {
        assert_eq!(category_of(&rule(1, "Admin Panel Protection", None)), "Admin Panel Protection");
    }

    #[test]
    fn test_summary_and_threat_levels() {
        let mut severe = logged(4, at(0, 3), Action::Block, Some(1));
        severe.threat_level = ThreatLevel::Critical;
        let entries = vec![
            logged(1, at(0, 0), Action::Allow, None),
            logged(2, at(0, 1), Action::Flag, Some(2)),
            logged(3, at(0, 2), Action::Block, Some(1)),
            severe,
        ];

        assert_eq!(
            summary(&entries),
            TrafficSummary {
                total: 4,
                allowed: 1,
                flagged: 1,
                blocked: 2,
                alerts: 2,
            }
        );

        let levels = by_threat_level(&entries);
        assert_eq!(levels[&ThreatLevel::None], 1);
        assert_eq!(levels[&ThreatLevel::Medium], 1);
        assert_eq!(levels[&ThreatLevel::High], 1);
        assert_eq!(levels[&ThreatLevel::Critical], 1);
    }

    #[test]
    fn test_within() {
        let entries = vec![
            logged(1, at(0, 0), Action::Allow, None),
            logged(2, at(1, 0), Action::Allow, None),
        ];
        let inside = within(&entries, TimeRange::new(at(0, 30), at(2, 0)));
        assert_eq!(inside.len(), 1);
        assert_eq!(inside[0].id, 2);
    }
}
