//! Pattern compilation and matching behind a narrow interface
//!
//! The rule set only sees [`PatternEngine`] and [`CompiledPattern`], so the
//! matching implementation can change without touching rule evaluation.

use crate::error::PatternError;
use regex::{Regex, RegexBuilder};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default cap on the compiled size of a single rule pattern
pub const DEFAULT_SIZE_LIMIT: usize = 1 << 20;

/// Default per-match time budget
pub const DEFAULT_MATCH_BUDGET: Duration = Duration::from_millis(50);

/// Why a compiled pattern could not produce an answer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchFault {
    #[error("match took {elapsed:?}, budget is {budget:?}")]
    BudgetExceeded { elapsed: Duration, budget: Duration },

    #[error("matching engine error: {0}")]
    Engine(String),
}

/// Compiles rule patterns
pub trait PatternEngine: Send + Sync + fmt::Debug {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn CompiledPattern>, PatternError>;
}

/// A compiled rule pattern
pub trait CompiledPattern: Send + Sync + fmt::Debug {
    /// Test the pattern against one field of the request surface
    fn matches(&self, haystack: &str) -> Result<bool, MatchFault>;
}

/// Pattern engine backed by the `regex` crate.
///
/// `regex` runs in time linear in the input, so a pathological pattern cannot
/// backtrack catastrophically. The budget still applies: a match slower than
/// the budget is reported as a fault and the caller treats it as a miss.
#[derive(Debug, Clone)]
pub struct RegexEngine {
    size_limit: usize,
    match_budget: Option<Duration>,
}

impl RegexEngine {
    pub fn new() -> Self {
        Self {
            size_limit: DEFAULT_SIZE_LIMIT,
            match_budget: Some(DEFAULT_MATCH_BUDGET),
        }
    }

    pub fn with_size_limit(mut self, size_limit: usize) -> Self {
        self.size_limit = size_limit;
        self
    }

    /// Set the per-match budget; `None` disables the check
    pub fn with_match_budget(mut self, budget: Option<Duration>) -> Self {
        self.match_budget = budget;
        self
    }
}

impl Default for RegexEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternEngine for RegexEngine {
    fn compile(&self, pattern: &str) -> Result<Arc<dyn CompiledPattern>, PatternError> {
        if pattern.trim().is_empty() {
            return Err(PatternError {
                pattern: pattern.to_string(),
                reason: "pattern is empty".to_string(),
            });
        }

        let regex = RegexBuilder::new(pattern)
            .size_limit(self.size_limit)
            .build()
            .map_err(|e| PatternError {
                pattern: pattern.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Arc::new(RegexPattern {
            regex,
            budget: self.match_budget,
        }))
    }
}

#[derive(Debug)]
struct RegexPattern {
    regex: Regex,
    budget: Option<Duration>,
}

impl CompiledPattern for RegexPattern {
    fn matches(&self, haystack: &str) -> Result<bool, MatchFault> {
        let Some(budget) = self.budget else {
            return Ok(self.regex.is_match(haystack));
        };

        let started = Instant::now();
        let found = self.regex.is_match(haystack);
        let elapsed = started.elapsed();
        if elapsed > budget {
            return Err(MatchFault::BudgetExceeded { elapsed, budget });
        }
        Ok(found)
    }
}
