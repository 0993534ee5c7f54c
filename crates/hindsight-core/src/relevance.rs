//! Relevance ranking of stored learnings against a new request
//!
//! Score = context (40%) + outcome (30%) + recency (30%):
//! - context: share of the request's words found in the learning's text
//! - outcome: how much the kind of learning should weigh on a new task
//! - recency: `exp(-0.1 * days)`, roughly a 7-day half-life
//!
//! Ties are broken most-recent-first, then by id, so rankings are stable.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::cmp::Ordering;

use crate::config::ScoringConfig;
use crate::learning::Learning;

static WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+").unwrap());

/// Outcome weight of a fresh failure pattern
pub const FRESH_FAILURE_WEIGHT: f64 = 1.2;
/// Outcome weight of a failure pattern past its fresh window
pub const STALE_FAILURE_WEIGHT: f64 = 0.5;
pub const ACTIONABLE_WEIGHT: f64 = 1.1;
pub const SUCCESS_WEIGHT: f64 = 1.0;
pub const DEFAULT_WEIGHT: f64 = 0.8;

/// Display thresholds for the human-readable reasons
const CONTEXT_REASON_THRESHOLD: f64 = 0.3;
const OUTCOME_REASON_THRESHOLD: f64 = 1.0;
const RECENCY_REASON_THRESHOLD: f64 = 0.7;

/// Distinct lowercased words longer than `min_len` characters, in order
pub fn significant_words(text: &str, min_len: usize) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for m in WORD_REGEX.find_iter(text) {
        let word = m.as_str().to_lowercase();
        if word.chars().count() > min_len && !words.contains(&word) {
            words.push(word);
        }
    }
    words
}

/// Fraction of `words` occurring in `haystack` (one-directional)
pub fn overlap_ratio(words: &[String], haystack: &str) -> f64 {
    if words.is_empty() {
        return 0.0;
    }
    let haystack = haystack.to_lowercase();
    let hits = words.iter().filter(|w| haystack.contains(w.as_str())).count();
    hits as f64 / words.len() as f64
}

/// A learning together with its score breakdown
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredLearning {
    pub learning: Learning,
    pub score: f64,
    pub context_match: f64,
    pub outcome_weight: f64,
    pub recency_decay: f64,
    pub reasons: Vec<String>,
}

/// Ranks learnings by relevance to a request
#[derive(Debug, Clone, Default)]
pub struct RelevanceScorer {
    config: ScoringConfig,
}

impl RelevanceScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn request_words(&self, request: &str) -> Vec<String> {
        significant_words(request, self.config.min_word_length)
    }

    /// Context match of a learning against pre-split request words
    pub fn context_match(&self, words: &[String], learning: &Learning) -> f64 {
        let mut haystack = String::new();
        haystack.push_str(&learning.title);
        haystack.push(' ');
        haystack.push_str(&learning.insight);
        haystack.push(' ');
        haystack.push_str(&learning.context.request);
        for tag in &learning.tags {
            haystack.push(' ');
            haystack.push_str(tag);
        }
        overlap_ratio(words, &haystack)
    }

    pub fn recency_decay(&self, learning: &Learning, now: DateTime<Utc>) -> f64 {
        (-self.config.decay_rate * learning.age_days(now)).exp()
    }

    pub fn outcome_weight(&self, learning: &Learning, now: DateTime<Utc>) -> f64 {
        if learning.is_failure_pattern() {
            if learning.age_days(now) < self.config.fresh_failure_days {
                FRESH_FAILURE_WEIGHT
            } else {
                STALE_FAILURE_WEIGHT
            }
        } else if learning.actionable {
            ACTIONABLE_WEIGHT
        } else if learning.learning_type == crate::learning::LearningType::General {
            SUCCESS_WEIGHT
        } else {
            DEFAULT_WEIGHT
        }
    }

    fn score_words(&self, words: &[String], learning: &Learning, now: DateTime<Utc>) -> ScoredLearning {
        let context_match = self.context_match(words, learning);
        let outcome_weight = self.outcome_weight(learning, now);
        let recency_decay = self.recency_decay(learning, now);
        let score = self.config.context_weight * context_match
            + self.config.outcome_weight * outcome_weight
            + self.config.recency_weight * recency_decay;

        let mut reasons = Vec::new();
        if context_match > CONTEXT_REASON_THRESHOLD {
            reasons.push(format!("Context match: {:.0}%", context_match * 100.0));
        }
        if outcome_weight > OUTCOME_REASON_THRESHOLD {
            if learning.is_failure_pattern() {
                reasons.push("Recent failure pattern".to_string());
            } else {
                reasons.push("Actionable insight".to_string());
            }
        }
        if recency_decay > RECENCY_REASON_THRESHOLD {
            reasons.push(format!("Recent ({:.1} days ago)", learning.age_days(now)));
        }

        ScoredLearning {
            learning: learning.clone(),
            score,
            context_match,
            outcome_weight,
            recency_decay,
            reasons,
        }
    }

    /// Score a single learning
    pub fn score(&self, request: &str, learning: &Learning, now: DateTime<Utc>) -> ScoredLearning {
        self.score_words(&self.request_words(request), learning, now)
    }

    /// Score every learning, best first, without truncation
    pub fn rank_all(&self, request: &str, learnings: &[Learning], now: DateTime<Utc>) -> Vec<ScoredLearning> {
        let words = self.request_words(request);
        let mut scored: Vec<ScoredLearning> = learnings
            .iter()
            .map(|l| self.score_words(&words, l, now))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.learning.timestamp.cmp(&a.learning.timestamp))
                .then_with(|| a.learning.id.cmp(&b.learning.id))
        });
        scored
    }

    /// The `top_k` most relevant learnings
    pub fn rank(&self, request: &str, learnings: &[Learning], now: DateTime<Utc>) -> Vec<ScoredLearning> {
        let mut scored = self.rank_all(request, learnings, now);
        scored.truncate(self.config.top_k);
        scored
    }
}
