//! Ordered regex rules and their evaluation

pub mod pattern;
pub mod ruleset;

pub use pattern::{CompiledPattern, MatchFault, PatternEngine, RegexEngine};
pub use ruleset::{ResolutionMode, RuleSet};
