//! Raw signals and the running aggregates they feed
//!
//! Signals are appended to their log as they happen and never edited.
//! [`AlgorithmStats`] and [`AlgorithmStreak`] are the only records that are
//! updated in place; the store serialises those updates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lowest accepted rating
pub const MIN_RATING: u8 = 1;
/// Highest accepted rating
pub const MAX_RATING: u8 = 5;

/// A rating at or above this extends the streak
pub const STREAK_EXTEND_RATING: u8 = 4;
/// A rating at or below this breaks the streak
pub const STREAK_BREAK_RATING: u8 = 2;

fn require(field: &'static str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::missing(field));
    }
    Ok(())
}

/// A verification criterion that did not hold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureSignal {
    pub timestamp: DateTime<Utc>,
    pub work_item: String,
    pub phase: String,
    pub criterion: String,
    #[serde(default)]
    pub expected: String,
    #[serde(default)]
    pub observed: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

impl FailureSignal {
    pub fn new(
        work_item: impl Into<String>,
        phase: impl Into<String>,
        criterion: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            work_item: work_item.into(),
            phase: phase.into(),
            criterion: criterion.into(),
            expected: String::new(),
            observed: String::new(),
            root_cause: None,
            capability: None,
        }
    }

    pub fn with_expected(mut self, expected: impl Into<String>) -> Self {
        self.expected = expected.into();
        self
    }

    pub fn with_observed(mut self, observed: impl Into<String>) -> Self {
        self.observed = observed.into();
        self
    }

    pub fn with_root_cause(mut self, root_cause: impl Into<String>) -> Self {
        self.root_cause = Some(root_cause.into());
        self
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Work item and criterion are mandatory
    pub fn validate(&self) -> Result<()> {
        require("workItem", &self.work_item)?;
        require("criterion", &self.criterion)
    }
}

/// A jump back from a later phase to an earlier one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopbackSignal {
    pub timestamp: DateTime<Utc>,
    pub work_item: String,
    pub from_phase: String,
    pub to_phase: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default = "default_iteration")]
    pub iteration: u32,
}

fn default_iteration() -> u32 {
    1
}

impl LoopbackSignal {
    pub fn new(
        work_item: impl Into<String>,
        from_phase: impl Into<String>,
        to_phase: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            work_item: work_item.into(),
            from_phase: from_phase.into(),
            to_phase: to_phase.into(),
            reason: String::new(),
            iteration: default_iteration(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        require("workItem", &self.work_item)?;
        require("fromPhase", &self.from_phase)?;
        require("toPhase", &self.to_phase)
    }
}

/// Explicit or implicit satisfaction score for a work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingSignal {
    pub timestamp: DateTime<Utc>,
    pub work_item: String,
    pub score: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default)]
    pub implicit: bool,
}

impl RatingSignal {
    /// Create a rating; the score is clamped into `[1, 5]`
    pub fn new(work_item: impl Into<String>, score: i64) -> Self {
        Self {
            timestamp: Utc::now(),
            work_item: work_item.into(),
            score: clamp_rating(score),
            feedback: None,
            implicit: false,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }

    pub fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        require("workItem", &self.work_item)
    }
}

/// Clamp an arbitrary score into the rating scale
pub fn clamp_rating(score: i64) -> u8 {
    score.clamp(MIN_RATING as i64, MAX_RATING as i64) as u8
}

/// A finished unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionSignal {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item: Option<String>,
    pub iterations: u32,
    pub success: bool,
}

impl CompletionSignal {
    pub fn new(iterations: u32, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            work_item: None,
            iterations,
            success,
        }
    }

    pub fn with_work_item(mut self, work_item: impl Into<String>) -> Self {
        self.work_item = Some(work_item.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(Error::InvalidField {
                field: "iterations",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Running totals across every recorded event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlgorithmStats {
    /// Completions recorded, successful or not
    pub total_tasks: u64,
    pub completed_tasks: u64,
    /// Failure events: every failure signal plus every unsuccessful
    /// completion. Not a share of `total_tasks`; one task can add several.
    pub failed_tasks: u64,
    pub total_iterations: u64,
    pub total_loopbacks: u64,
    pub avg_iterations: f64,
    pub avg_rating: f64,
    pub rating_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

impl AlgorithmStats {
    pub fn apply_failure(&mut self, at: DateTime<Utc>) {
        self.failed_tasks += 1;
        self.last_updated = Some(at);
    }

    pub fn apply_loopback(&mut self, at: DateTime<Utc>) {
        self.total_loopbacks += 1;
        self.last_updated = Some(at);
    }

    /// Fold a (clamped) score into the running average
    pub fn apply_rating(&mut self, score: u8, at: DateTime<Utc>) {
        let count = self.rating_count as f64;
        self.avg_rating = (self.avg_rating * count + score as f64) / (count + 1.0);
        self.rating_count += 1;
        self.last_updated = Some(at);
    }

    pub fn apply_completion(&mut self, iterations: u32, success: bool, at: DateTime<Utc>) {
        self.total_tasks += 1;
        self.total_iterations += iterations as u64;
        self.avg_iterations = self.total_iterations as f64 / self.total_tasks as f64;
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.last_updated = Some(at);
    }

    /// `completed / total`, zero before any task completes
    pub fn success_rate(&self) -> f64 {
        if self.total_tasks == 0 {
            0.0
        } else {
            self.completed_tasks as f64 / self.total_tasks as f64
        }
    }
}

/// Consecutive successful outcomes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AlgorithmStreak {
    pub current: u64,
    pub best: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

impl AlgorithmStreak {
    pub fn extend(&mut self, at: DateTime<Utc>) {
        self.current += 1;
        self.best = self.best.max(self.current);
        self.last_success = Some(at);
    }

    pub fn reset(&mut self, at: DateTime<Utc>) {
        self.current = 0;
        self.last_failure = Some(at);
    }

    /// Apply the rating thresholds; middling ratings leave the streak alone
    pub fn apply_rating(&mut self, score: u8, at: DateTime<Utc>) {
        if score >= STREAK_EXTEND_RATING {
            self.extend(at);
        } else if score <= STREAK_BREAK_RATING {
            self.reset(at);
        }
    }
}
