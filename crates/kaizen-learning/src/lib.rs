//! Learning subsystem for the Kaizen agent
//!
//! Patterns are extracted from successful fixes, matched against files on
//! later cycles, and decayed or pruned as the evidence changes. Recurring
//! troubles are abstracted into trouble patterns that generate prevention
//! suggestions for the improvement queue.

pub mod abstraction;
pub mod extractor;
pub mod pattern;
pub mod repository;
pub mod rule_engine;
pub mod stats;

pub use abstraction::{AbstractionEngine, AnalysisOutcome, PreventionSuggestion, TroublePattern};
pub use extractor::{ExtractionContext, FailureObservation, PatternExtractor};
pub use pattern::{
    ConditionKind, ConditionTarget, LearnedPattern, PatternCondition, PatternMatch, PatternPhase,
    PatternSolution, PatternStats, SolutionKind,
};
pub use repository::PatternRepository;
pub use rule_engine::RuleEngine;
pub use stats::LearningStats;
