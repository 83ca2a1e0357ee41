//! Ordered rule collection with first-match-wins evaluation

use super::pattern::{CompiledPattern, PatternEngine, RegexEngine};
use crate::error::{Result, ValidationError, WafError};
use crate::model::{Action, NewRule, RequestSurface, Rule, RuleId, Verdict};
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

/// How a verdict is chosen when several rules match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    /// The first enabled matching rule in list order decides
    #[default]
    FirstMatch,
    /// The strongest action among all matching rules decides
    /// (BLOCK > FLAG > ALLOW); ties go to the earlier rule
    Severity,
}

/// One rule version. Edits publish a new slot; the hit counter is shared
/// between versions so it survives edits and toggles.
#[derive(Debug)]
struct RuleSlot {
    id: RuleId,
    def: NewRule,
    enabled: bool,
    matcher: Arc<dyn CompiledPattern>,
    hits: Arc<AtomicU64>,
}

impl RuleSlot {
    fn view(&self) -> Rule {
        Rule {
            id: self.id,
            name: self.def.name.clone(),
            pattern: self.def.pattern.clone(),
            action: self.def.action,
            description: self.def.description.clone(),
            enabled: self.enabled,
            severe: self.def.severe,
            category: self.def.category.clone(),
            hit_count: self.hits.load(Ordering::Relaxed),
        }
    }

    /// Test every field of the surface. A faulting match counts as a miss.
    fn matches(&self, surface: &RequestSurface<'_>) -> bool {
        for field in surface.fields() {
            match self.matcher.matches(field) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(fault) => {
                    warn!(
                        rule_id = self.id,
                        rule = %self.def.name,
                        "Rule match fault, treating as non-matching: {}",
                        fault
                    );
                    return false;
                }
            }
        }
        false
    }

    fn record_hit(&self) -> Verdict {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Verdict {
            action: self.def.action,
            matched_rule: Some(self.id),
            reason: format!("Matched rule '{}'", self.def.name),
            severe: self.def.severe,
        }
    }
}

/// Ordered, copy-on-write collection of compiled rules.
///
/// Evaluation reads the current snapshot without locking. Operator edits are
/// serialized and swap in a new snapshot, so a classification in flight sees
/// either the old or the new list, never a mix.
#[derive(Debug)]
pub struct RuleSet {
    rules: ArcSwap<Vec<Arc<RuleSlot>>>,
    engine: Arc<dyn PatternEngine>,
    writer: Mutex<()>,
    next_id: AtomicU64,
}

impl RuleSet {
    /// Create an empty rule set using the default regex engine
    pub fn new() -> Self {
        Self::with_engine(Arc::new(RegexEngine::new()))
    }

    pub fn with_engine(engine: Arc<dyn PatternEngine>) -> Self {
        Self {
            rules: ArcSwap::from_pointee(Vec::new()),
            engine,
            writer: Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Build a rule set from seed rules, keeping their ids, order, enabled
    /// flags and hit counts
    pub fn from_rules(
        seeds: impl IntoIterator<Item = Rule>,
        engine: Arc<dyn PatternEngine>,
    ) -> Result<Self> {
        let mut slots = Vec::new();
        let mut max_id: u64 = 0;

        for seed in seeds {
            let def = NewRule {
                name: seed.name,
                pattern: seed.pattern,
                action: seed.action,
                description: seed.description,
                severe: seed.severe,
                category: seed.category,
            };
            let matcher = engine.compile(&def.pattern)?;
            max_id = max_id.max(seed.id);
            slots.push(Arc::new(RuleSlot {
                id: seed.id,
                def,
                enabled: seed.enabled,
                matcher,
                hits: Arc::new(AtomicU64::new(seed.hit_count)),
            }));
        }

        let next_id = max_id
            .checked_add(1)
            .ok_or(ValidationError::IdExhausted { kind: "Rule", id: max_id })?;

        Ok(Self {
            rules: ArcSwap::from_pointee(slots),
            engine,
            writer: Mutex::new(()),
            next_id: AtomicU64::new(next_id),
        })
    }

    /// Check that a rule's pattern compiles
    pub fn compile(&self, rule: &NewRule) -> Result<Arc<dyn CompiledPattern>> {
        Ok(self.engine.compile(&rule.pattern)?)
    }

    /// Evaluate with first-match-wins resolution
    pub fn evaluate(&self, surface: &RequestSurface<'_>) -> Verdict {
        self.evaluate_with(surface, ResolutionMode::FirstMatch)
    }

    /// Evaluate enabled rules in list order.
    ///
    /// The deciding rule's hit counter is incremented exactly once. With no
    /// match the result is the implicit ALLOW.
    pub fn evaluate_with(&self, surface: &RequestSurface<'_>, mode: ResolutionMode) -> Verdict {
        let rules = self.rules.load();
        let mut enabled = rules.iter().filter(|slot| slot.enabled);

        let winner = match mode {
            ResolutionMode::FirstMatch => enabled.find(|slot| slot.matches(surface)),
            ResolutionMode::Severity => {
                let mut best: Option<&Arc<RuleSlot>> = None;
                for slot in enabled {
                    if best.is_some_and(|b| slot.def.action.strength() <= b.def.action.strength()) {
                        continue;
                    }
                    if slot.matches(surface) {
                        best = Some(slot);
                        if slot.def.action == Action::Block {
                            break;
                        }
                    }
                }
                best
            }
        };

        match winner {
            Some(slot) => slot.record_hit(),
            None => Verdict::implicit_allow(),
        }
    }

    /// Append a new enabled rule to the end of the list
    pub fn add(&self, rule: NewRule) -> Result<Rule> {
        let matcher = self.compile(&rule)?;
        let slot = Arc::new(RuleSlot {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            def: rule,
            enabled: true,
            matcher,
            hits: Arc::new(AtomicU64::new(0)),
        });

        self.edit(|rules| {
            rules.push(slot.clone());
            Ok(())
        })?;

        info!("Added rule {} '{}' ({})", slot.id, slot.def.name, slot.def.action);
        Ok(slot.view())
    }

    /// Replace a rule's definition in place, keeping its id, position,
    /// enabled flag and hit count
    pub fn update(&self, id: RuleId, rule: NewRule) -> Result<Rule> {
        let matcher = self.compile(&rule)?;
        let updated = self.replace_slot(id, |old| RuleSlot {
            id,
            def: rule,
            enabled: old.enabled,
            matcher,
            hits: old.hits.clone(),
        })?;

        info!("Updated rule {} '{}'", id, updated.name);
        Ok(updated)
    }

    pub fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<Rule> {
        let updated = self.replace_slot(id, |old| RuleSlot {
            id,
            def: old.def.clone(),
            enabled,
            matcher: old.matcher.clone(),
            hits: old.hits.clone(),
        })?;

        info!(
            "{} rule {} '{}'",
            if enabled { "Enabled" } else { "Disabled" },
            id,
            updated.name
        );
        Ok(updated)
    }

    pub fn remove(&self, id: RuleId) -> Result<Rule> {
        let mut removed = None;
        self.edit(|rules| {
            let position = rules
                .iter()
                .position(|slot| slot.id == id)
                .ok_or_else(|| WafError::rule_not_found(id))?;
            removed = Some(rules.remove(position));
            Ok(())
        })?;

        let rule = removed.map(|slot| slot.view()).ok_or_else(|| WafError::rule_not_found(id))?;
        info!("Deleted rule {} '{}'", id, rule.name);
        Ok(rule)
    }

    pub fn get(&self, id: RuleId) -> Option<Rule> {
        self.rules
            .load()
            .iter()
            .find(|slot| slot.id == id)
            .map(|slot| slot.view())
    }

    /// All rules in evaluation order
    pub fn list(&self) -> Vec<Rule> {
        self.rules.load().iter().map(|slot| slot.view()).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn replace_slot(&self, id: RuleId, build: impl FnOnce(&RuleSlot) -> RuleSlot) -> Result<Rule> {
        let mut view = None;
        self.edit(|rules| {
            let slot = rules
                .iter_mut()
                .find(|slot| slot.id == id)
                .ok_or_else(|| WafError::rule_not_found(id))?;
            let next = Arc::new(build(slot.as_ref()));
            view = Some(next.view());
            *slot = next;
            Ok(())
        })?;
        view.ok_or_else(|| WafError::rule_not_found(id))
    }

    /// Apply an edit to a private copy of the list and publish it
    fn edit(&self, apply: impl FnOnce(&mut Vec<Arc<RuleSlot>>) -> Result<()>) -> Result<()> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&self.rules.load());
        apply(&mut next)?;
        self.rules.store(Arc::new(next));
        Ok(())
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::PatternError;
    use crate::rules::pattern::MatchFault;
    use std::time::Duration;

    /// Engine whose `FAULT` pattern always overruns its budget; any other
    /// pattern compiles with the regex engine
    #[derive(Debug)]
    pub(crate) struct FaultyEngine;

    pub(crate) const FAULT: &str = "<fault>";

    #[derive(Debug)]
    struct Overrun;

    impl CompiledPattern for Overrun {
        fn matches(&self, _haystack: &str) -> std::result::Result<bool, MatchFault> {
            Err(MatchFault::BudgetExceeded {
                elapsed: Duration::from_millis(80),
                budget: Duration::from_millis(50),
            })
        }
    }

    impl PatternEngine for FaultyEngine {
        fn compile(
            &self,
            pattern: &str,
        ) -> std::result::Result<Arc<dyn CompiledPattern>, PatternError> {
            if pattern == FAULT {
                Ok(Arc::new(Overrun))
            } else {
                RegexEngine::new().compile(pattern)
            }
        }
    }

    fn surface(path: &str) -> RequestSurface<'_> {
        RequestSurface::from_path(path)
    }

    #[test]
    fn test_faulting_rule_is_skipped() {
        let rules = RuleSet::with_engine(Arc::new(FaultyEngine));
        let slow = rules.add(NewRule::new("Slow", FAULT, Action::Block)).unwrap();
        let next = rules.add(NewRule::new("Flag all", ".*", Action::Flag)).unwrap();

        let verdict = rules.evaluate(&surface("/anything"));
        assert_eq!(verdict.action, Action::Flag);
        assert_eq!(verdict.matched_rule, Some(next.id));
        assert_eq!(rules.get(slow.id).unwrap().hit_count, 0);
        assert_eq!(rules.get(next.id).unwrap().hit_count, 1);

        let verdict = rules.evaluate_with(&surface("/anything"), ResolutionMode::Severity);
        assert_eq!(verdict.matched_rule, Some(next.id));
        assert_eq!(rules.get(slow.id).unwrap().hit_count, 0);
    }

    #[test]
    fn test_seed_at_max_id_is_rejected() {
        let seed = Rule {
            id: u64::MAX,
            name: "Last".to_string(),
            pattern: "x".to_string(),
            action: Action::Block,
            description: String::new(),
            enabled: true,
            severe: false,
            category: None,
            hit_count: 0,
        };
        let err = RuleSet::from_rules(vec![seed], Arc::new(RegexEngine::new())).unwrap_err();
        assert!(matches!(
            err,
            WafError::Validation(ValidationError::IdExhausted { kind: "Rule", .. })
        ));
    }

    #[test]
    fn test_only_faulting_rule_gives_implicit_allow() {
        let rules = RuleSet::with_engine(Arc::new(FaultyEngine));
        rules.add(NewRule::new("Slow", FAULT, Action::Block)).unwrap();
        assert_eq!(rules.evaluate(&surface("/x")), Verdict::implicit_allow());
    }

    #[test]
    fn test_first_match_allow_short_circuits_block() {
        let rules = RuleSet::new();
        let admin = rules.add(NewRule::new("Admin carve-out", "/admin", Action::Allow)).unwrap();
        let all = rules.add(NewRule::new("Block all", ".*", Action::Block)).unwrap();

        let verdict = rules.evaluate(&surface("/admin"));
        assert_eq!(verdict.action, Action::Allow);
        assert_eq!(verdict.matched_rule, Some(admin.id));

        assert_eq!(rules.get(admin.id).unwrap().hit_count, 1);
        assert_eq!(rules.get(all.id).unwrap().hit_count, 0);
    }

    #[test]
    fn test_no_match_is_implicit_allow() {
        let rules = RuleSet::new();
        let rule = rules.add(NewRule::new("XSS", "<script>", Action::Block)).unwrap();

        let verdict = rules.evaluate(&surface("/user/profile"));
        assert_eq!(verdict, Verdict::implicit_allow());
        assert_eq!(rules.get(rule.id).unwrap().hit_count, 0);
    }

    #[test]
    fn test_disabled_rule_never_matches() {
        let rules = RuleSet::new();
        let block = rules.add(NewRule::new("Env file", r"\.env", Action::Block)).unwrap();
        let flag = rules.add(NewRule::new("Dotfiles", r"/\.", Action::Flag)).unwrap();

        assert_eq!(rules.evaluate(&surface("/.env")).action, Action::Block);

        rules.set_enabled(block.id, false).unwrap();
        let verdict = rules.evaluate(&surface("/.env"));
        assert_eq!(verdict.action, Action::Flag);
        assert_eq!(verdict.matched_rule, Some(flag.id));

        rules.set_enabled(flag.id, false).unwrap();
        assert_eq!(rules.evaluate(&surface("/.env")), Verdict::implicit_allow());
    }

    #[test]
    fn test_invalid_pattern_rejected_at_add() {
        let rules = RuleSet::new();
        let err = rules.add(NewRule::new("Broken", "(a|b", Action::Block)).unwrap_err();
        assert!(matches!(err, WafError::InvalidPattern(_)));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_update_keeps_position_and_hits() {
        let rules = RuleSet::new();
        let first = rules.add(NewRule::new("Admin", "^/admin/.*", Action::Flag)).unwrap();
        rules.add(NewRule::new("Other", "/other", Action::Block)).unwrap();

        rules.evaluate(&surface("/admin/users"));
        let updated = rules
            .update(first.id, NewRule::new("Admin", "^/admin", Action::Block))
            .unwrap();

        assert_eq!(updated.hit_count, 1);
        assert_eq!(updated.action, Action::Block);
        assert_eq!(rules.list()[0].id, first.id);
        assert_eq!(rules.evaluate(&surface("/admin")).action, Action::Block);
        assert_eq!(rules.get(first.id).unwrap().hit_count, 2);
    }

    #[test]
    fn test_update_with_bad_pattern_leaves_rule_intact() {
        let rules = RuleSet::new();
        let rule = rules.add(NewRule::new("Admin", "^/admin", Action::Flag)).unwrap();

        assert!(rules.update(rule.id, NewRule::new("Admin", "[", Action::Flag)).is_err());
        assert_eq!(rules.get(rule.id).unwrap().pattern, "^/admin");
    }

    #[test]
    fn test_remove_and_not_found() {
        let rules = RuleSet::new();
        let rule = rules.add(NewRule::new("XSS", "<script>", Action::Block)).unwrap();

        assert_eq!(rules.remove(rule.id).unwrap().id, rule.id);
        assert!(matches!(rules.remove(rule.id), Err(WafError::NotFound { .. })));
        assert!(matches!(rules.set_enabled(99, true), Err(WafError::NotFound { .. })));
        assert!(matches!(
            rules.update(99, NewRule::new("x", "x", Action::Block)),
            Err(WafError::NotFound { .. })
        ));
    }

    #[test]
    fn test_severity_mode_prefers_block() {
        let rules = RuleSet::new();
        rules.add(NewRule::new("Allow api", "^/api", Action::Allow)).unwrap();
        rules.add(NewRule::new("Flag login", "login", Action::Flag)).unwrap();
        let sqli = rules.add(NewRule::new("SQL", "(?i)union", Action::Block)).unwrap();

        let path = surface("/api/login/union");
        assert_eq!(rules.evaluate(&path).action, Action::Allow);

        let verdict = rules.evaluate_with(&path, ResolutionMode::Severity);
        assert_eq!(verdict.action, Action::Block);
        assert_eq!(verdict.matched_rule, Some(sqli.id));
        assert_eq!(rules.get(sqli.id).unwrap().hit_count, 1);
    }

    #[test]
    fn test_severity_mode_tie_goes_to_earlier_rule() {
        let rules = RuleSet::new();
        let first = rules.add(NewRule::new("A", "a", Action::Flag)).unwrap();
        rules.add(NewRule::new("B", "b", Action::Flag)).unwrap();

        let verdict = rules.evaluate_with(&surface("/ab"), ResolutionMode::Severity);
        assert_eq!(verdict.matched_rule, Some(first.id));
    }

    #[test]
    fn test_matches_query_and_body() {
        let rules = RuleSet::new();
        rules.add(NewRule::new("XSS", "<script>", Action::Block)).unwrap();

        let from_body = RequestSurface {
            path: "/comment",
            query: None,
            body: Some("hello <script>"),
        };
        assert_eq!(rules.evaluate(&from_body).action, Action::Block);
    }

    #[test]
    fn test_seeded_rules_keep_ids_and_order() {
        let seeds = vec![
            Rule {
                id: 1004,
                name: "Admin Panel Protection".to_string(),
                pattern: "^/admin/.*".to_string(),
                action: Action::Flag,
                description: String::new(),
                enabled: false,
                severe: false,
                category: None,
                hit_count: 0,
            },
            Rule {
                id: 1001,
                name: "SQL".to_string(),
                pattern: "(?i)select".to_string(),
                action: Action::Block,
                description: String::new(),
                enabled: true,
                severe: true,
                category: None,
                hit_count: 5,
            },
        ];
        let rules = RuleSet::from_rules(seeds, Arc::new(RegexEngine::new())).unwrap();

        let ids: Vec<_> = rules.list().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1004, 1001]);
        assert_eq!(rules.get(1001).unwrap().hit_count, 5);
        assert_eq!(rules.add(NewRule::new("n", "n", Action::Flag)).unwrap().id, 1005);
    }
}
