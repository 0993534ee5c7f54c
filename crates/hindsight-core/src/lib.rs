//! Hindsight Core - Feedback loop for agentic task execution
//!
//! This crate turns what happened on past tasks into advice for the next one:
//! - Signal store: append-only failure/loopback/rating/completion logs plus
//!   running stats and streak
//! - Learning extraction from finished execution records
//! - Pattern aggregation over repeated failures and loopbacks
//! - Relevance scoring of stored learnings against a new request
//! - Pre-flight advisory reports

pub mod advisory;
pub mod config;
pub mod error;
pub mod execution;
pub mod learning;
pub mod pattern;
pub mod relevance;
pub mod report;
pub mod signal;
pub mod store;

pub use config::{
    AdvisoryConfig, AggregationConfig, ExtractionConfig, HindsightConfig, ScoringConfig,
    BASE_DIR_ENV, CONFIG_FILE, DEFAULT_BASE_DIR,
};
pub use error::{Error, Result};
pub use execution::{EffortLevel, ExecutionRecord, ExecutionRow, RowStatus, VerificationResult};
pub use signal::{
    AlgorithmStats, AlgorithmStreak, CompletionSignal, FailureSignal, LoopbackSignal,
    RatingSignal,
};
pub use store::{SignalLog, SignalStore};

// Re-export learning types
pub use learning::{CaptureOutcome, Learning, LearningContext, LearningExtractor, LearningType};

// Re-export pattern types
pub use pattern::{Pattern, PatternAggregator, PatternType};

// Re-export scoring and advice
pub use advisory::{
    AdvisorySynthesizer, PreFlightReport, Recommendation, RecommendationKind, RiskSource,
    RiskWarning, Severity, StoreSnapshot, SuccessPattern,
};
pub use relevance::{RelevanceScorer, ScoredLearning};
pub use report::{LogCounts, StoreSummary, WeekRollup};
