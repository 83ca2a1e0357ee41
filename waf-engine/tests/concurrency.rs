//! Engine behaviour under concurrent classification and management

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use waf_engine::{
    AccessList, Action, DecisionEngine, DecisionPolicy, Firewall, ListType, NewIpEntry, NewRule,
    Request, RuleSet, TelemetryStream,
};

fn firewall_with_capacity(capacity: usize) -> Firewall {
    Firewall::new(DecisionEngine::new(
        Arc::new(AccessList::new()),
        Arc::new(RuleSet::new()),
        TelemetryStream::with_capacity(capacity),
        DecisionPolicy::default(),
    ))
}

fn request(ip: &str, target: &str) -> Request {
    Request::parse_line(&format!("{} GET {}", ip, target)).unwrap()
}

#[test]
fn concurrent_matches_count_every_hit() {
    let waf = firewall_with_capacity(5000);
    let rule = waf
        .add_rule(NewRule::new("XSS Attempt", "<script>", Action::Block))
        .unwrap();

    std::thread::scope(|s| {
        for t in 0..10 {
            let waf = &waf;
            s.spawn(move || {
                for i in 0..100 {
                    let ip = format!("192.0.2.{}", t * 10 + i % 10);
                    let entry = waf.classify(&request(&ip, "/search?q=<script>"));
                    assert_eq!(entry.action, Action::Block);
                }
            });
        }
    });

    let rules = waf.list_rules();
    let after = rules.iter().find(|r| r.id == rule.id).unwrap();
    assert_eq!(after.hit_count, 1000);

    let snapshot = waf.snapshot();
    assert_eq!(snapshot.len(), 1000);
    let ids: HashSet<u64> = snapshot.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 1000);
}

#[test]
fn telemetry_keeps_only_newest_entries() {
    let waf = firewall_with_capacity(100);

    std::thread::scope(|s| {
        for _ in 0..4 {
            let waf = &waf;
            s.spawn(move || {
                for _ in 0..250 {
                    waf.classify(&request("198.51.100.1", "/index.html"));
                }
            });
        }
    });

    let snapshot = waf.snapshot();
    assert_eq!(snapshot.len(), 100);

    let ids: HashSet<u64> = snapshot.iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 100);
    assert!(ids.iter().all(|id| (1..=1000).contains(id)));

    // At most three entries can be appended after the last id is taken, so
    // it is never evicted
    assert!(ids.contains(&1000));
}

#[test]
fn rule_edits_during_traffic_stay_consistent() {
    let waf = firewall_with_capacity(1000);
    let id = waf
        .add_rule(NewRule::new("Admin Panel", "^/admin", Action::Flag))
        .unwrap()
        .id;

    std::thread::scope(|s| {
        let waf = &waf;
        s.spawn(move || {
            for i in 0..200 {
                let toggled = if i % 2 == 0 {
                    waf.enable_rule(id)
                } else {
                    waf.disable_rule(id)
                };
                toggled.unwrap();
            }
        });
        for _ in 0..4 {
            s.spawn(move || {
                for _ in 0..200 {
                    let entry = waf.classify(&request("203.0.113.7", "/admin/users"));
                    // Either version of the rule set is acceptable, never a mix
                    assert!(matches!(entry.action, Action::Flag | Action::Allow));
                    if entry.action == Action::Allow {
                        assert_eq!(entry.matched_rule_id, None);
                    } else {
                        assert_eq!(entry.matched_rule_id, Some(id));
                    }
                }
            });
        }
    });

    let flagged = waf
        .snapshot()
        .iter()
        .filter(|e| e.action == Action::Flag)
        .count() as u64;
    let after = waf.list_rules().into_iter().find(|r| r.id == id).unwrap();
    assert_eq!(after.hit_count, flagged);
}

#[test]
fn blacklist_always_blocks_and_whitelist_always_allows() {
    let waf = firewall_with_capacity(100);
    waf.add_rule(NewRule::new("XSS", "<script>", Action::Block)).unwrap();
    waf.add_entry(NewIpEntry::new("45.33.22.11", ListType::Blacklist).note("Scanner"))
        .unwrap();
    waf.add_entry(NewIpEntry::new("10.0.0.0/8", ListType::Whitelist))
        .unwrap();

    for target in ["/", "/index.html", "/q?x=<script>", "/files/../etc/passwd"] {
        let blocked = waf.classify(&request("45.33.22.11", target));
        assert_eq!(blocked.action, Action::Block);
        assert_eq!(blocked.matched_rule_id, None);

        let allowed = waf.classify(&request("10.20.30.40", target));
        assert_eq!(allowed.action, Action::Allow);
        assert_eq!(allowed.matched_rule_id, None);
    }

    // A rule hit was never recorded for listed sources
    assert!(waf.list_rules().iter().all(|r| r.hit_count == 0));

    let unlisted: IpAddr = "192.0.2.1".parse().unwrap();
    assert_eq!(
        waf.classify(&Request::new(unlisted, "GET", "/q").with_body("<script>"))
            .action,
        Action::Block
    );
}
