//! Recurring-signal detection
//!
//! The aggregator scans the failure and loopback logs, groups repeats, and
//! turns every group that reaches the configured size into a [`Pattern`].
//! Pattern ids are a hash of the grouping key, so a second pass over the same
//! signals finds every id already present and writes nothing.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use crate::config::AggregationConfig;
use crate::signal::{FailureSignal, LoopbackSignal};
use crate::store::SignalStore;
use crate::{Error, Result};

/// Kind of recurring signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternType {
    Failure,
    Success,
    Loopback,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failure => "failure",
            Self::Success => "success",
            Self::Loopback => "loopback",
        }
    }
}

impl FromStr for PatternType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "failure" => Ok(Self::Failure),
            "success" => Ok(Self::Success),
            "loopback" => Ok(Self::Loopback),
            _ => Err(Error::Parse(format!("Unknown pattern type: {}", s))),
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An aggregated, recurring signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    pub id: String,
    pub week: String,
    #[serde(rename = "type")]
    pub pattern_type: PatternType,
    pub pattern: String,
    pub frequency: u32,
    pub recommendation: String,
    #[serde(default)]
    pub source_items: BTreeSet<String>,
    pub last_seen: DateTime<Utc>,
}

/// Deterministic id for a grouping key
pub fn pattern_id(prefix: &str, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(key.as_bytes());
    let hash = hasher.finalize();
    format!("{}_{}", prefix, hex::encode(&hash[..8]))
}

/// ISO 8601 year-week label such as `2026-W42`
///
/// Weeks start on Monday and the year is the ISO week-numbering year, so
/// the label never goes past W53 and days around New Year can belong to
/// the neighbouring year.
pub fn week_label(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Lowercased, truncated criterion used to group failures
pub fn criterion_key(criterion: &str, max_chars: usize) -> String {
    criterion
        .trim()
        .to_lowercase()
        .chars()
        .take(max_chars)
        .collect()
}

struct Group {
    key: String,
    sources: BTreeSet<String>,
    count: u32,
    last_seen: DateTime<Utc>,
}

/// Collects signals into insertion-ordered groups
#[derive(Default)]
struct Grouper {
    groups: Vec<Group>,
    index: HashMap<String, usize>,
}

impl Grouper {
    fn add(&mut self, key: String, source: &str, at: DateTime<Utc>) {
        let idx = match self.index.get(&key) {
            Some(&idx) => idx,
            None => {
                self.groups.push(Group {
                    key: key.clone(),
                    sources: BTreeSet::new(),
                    count: 0,
                    last_seen: at,
                });
                self.index.insert(key, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };

        let group = &mut self.groups[idx];
        group.count += 1;
        group.sources.insert(source.to_string());
        if at > group.last_seen {
            group.last_seen = at;
        }
    }

    fn into_repeats(self, min: usize) -> impl Iterator<Item = Group> {
        self.groups
            .into_iter()
            .filter(move |g| g.count as usize >= min)
    }
}

/// Detects recurring failures and loopbacks
#[derive(Debug, Clone, Default)]
pub struct PatternAggregator {
    config: AggregationConfig,
}

impl PatternAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AggregationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Build candidate patterns from raw signals without touching storage
    pub fn detect(&self, failures: &[FailureSignal], loopbacks: &[LoopbackSignal]) -> Vec<Pattern> {
        let mut patterns = self.detect_failures(failures);
        patterns.extend(self.detect_loopbacks(loopbacks));
        patterns
    }

    fn detect_failures(&self, failures: &[FailureSignal]) -> Vec<Pattern> {
        let mut grouper = Grouper::default();
        for failure in failures {
            let key = criterion_key(&failure.criterion, self.config.criterion_key_length);
            if key.is_empty() {
                continue;
            }
            grouper.add(key, &failure.work_item, failure.timestamp);
        }

        grouper
            .into_repeats(self.config.min_occurrences)
            .map(|g| Pattern {
                id: pattern_id("failure", &g.key),
                week: week_label(g.last_seen),
                pattern_type: PatternType::Failure,
                recommendation: format!("Review verification criteria for: {}", g.key),
                pattern: g.key,
                frequency: g.count,
                source_items: g.sources,
                last_seen: g.last_seen,
            })
            .collect()
    }

    fn detect_loopbacks(&self, loopbacks: &[LoopbackSignal]) -> Vec<Pattern> {
        let mut grouper = Grouper::default();
        for loopback in loopbacks {
            let from = loopback.from_phase.trim().to_lowercase();
            let to = loopback.to_phase.trim().to_lowercase();
            grouper.add(format!("{}->{}", from, to), &loopback.work_item, loopback.timestamp);
        }

        grouper
            .into_repeats(self.config.min_occurrences)
            .map(|g| {
                let (from, to) = g.key.split_once("->").unwrap_or((g.key.as_str(), ""));
                Pattern {
                    id: pattern_id("loopback", &g.key),
                    week: week_label(g.last_seen),
                    pattern_type: PatternType::Loopback,
                    pattern: format!("{} -> {}", from, to),
                    recommendation: format!(
                        "Improve the {} phase to reduce loopbacks from the {} phase",
                        to, from
                    ),
                    frequency: g.count,
                    source_items: g.sources.clone(),
                    last_seen: g.last_seen,
                }
            })
            .collect()
    }

    /// Scan the signal logs and append every pattern not already stored.
    /// Returns only the newly written patterns.
    #[tracing::instrument(skip(self, store), level = "debug")]
    pub async fn analyze(&self, store: &SignalStore) -> Result<Vec<Pattern>> {
        let failures = store.read_failures().await?;
        let loopbacks = store.read_loopbacks().await?;

        let candidates = self.detect(&failures, &loopbacks);
        let candidate_count = candidates.len();
        let written = store.append_new_patterns(candidates).await?;

        tracing::info!(
            failures = failures.len(),
            loopbacks = loopbacks.len(),
            candidates = candidate_count,
            written = written.len(),
            "pattern analysis complete"
        );

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_pattern_id_is_deterministic() {
        let a = pattern_id("failure", "tests pass");
        let b = pattern_id("failure", "tests pass");
        let c = pattern_id("failure", "lint clean");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("failure_"));
        assert_eq!(a.len(), "failure_".len() + 16);
    }

    #[test]
    fn test_week_label() {
        // 2026-01-01 is a Thursday, so it opens ISO week 1
        let jan1 = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(week_label(jan1), "2026-W01");

        // Weeks turn over on Monday
        let jan4 = Utc.with_ymd_and_hms(2026, 1, 4, 23, 0, 0).unwrap();
        assert_eq!(week_label(jan4), "2026-W01");
        let jan5 = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(week_label(jan5), "2026-W02");
    }

    #[test]
    fn test_week_label_around_new_year() {
        let last_day = Utc.with_ymd_and_hms(2028, 12, 31, 12, 0, 0).unwrap();
        assert_eq!(week_label(last_day), "2028-W52");

        // Friday 2027-01-01 still belongs to the last week of 2026
        let new_year = Utc.with_ymd_and_hms(2027, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(week_label(new_year), "2026-W53");
    }

    #[test]
    fn test_criterion_key_truncates_and_lowercases() {
        let long = "A".repeat(80);
        assert_eq!(criterion_key(&long, 50).len(), 50);
        assert_eq!(criterion_key("  Tests Pass ", 50), "tests pass");
    }

    #[test]
    fn test_detect_groups_repeated_failures() {
        let now = Utc::now();
        let failures = vec![
            FailureSignal::new("task-1", "verify", "Tests pass").with_timestamp(now - Duration::hours(2)),
            FailureSignal::new("task-2", "verify", "tests pass").with_timestamp(now),
            FailureSignal::new("task-3", "verify", "lint clean"),
        ];

        let patterns = PatternAggregator::new().detect(&failures, &[]);

        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(pattern.pattern_type, PatternType::Failure);
        assert_eq!(pattern.frequency, 2);
        assert_eq!(pattern.pattern, "tests pass");
        assert_eq!(pattern.last_seen, now);
        assert!(pattern.recommendation.contains("tests pass"));
        assert_eq!(pattern.source_items.len(), 2);
    }

    #[test]
    fn test_detect_groups_loopbacks_by_phase_pair() {
        let loopbacks = vec![
            LoopbackSignal::new("task-1", "Verify", "Build"),
            LoopbackSignal::new("task-2", "verify", "build"),
            LoopbackSignal::new("task-3", "verify", "plan"),
        ];

        let patterns = PatternAggregator::new().detect(&[], &loopbacks);

        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].pattern_type, PatternType::Loopback);
        assert_eq!(patterns[0].pattern, "verify -> build");
        assert_eq!(
            patterns[0].recommendation,
            "Improve the build phase to reduce loopbacks from the verify phase"
        );
    }

    #[test]
    fn test_min_occurrences_is_configurable() {
        let failures = vec![
            FailureSignal::new("task-1", "verify", "tests pass"),
            FailureSignal::new("task-2", "verify", "tests pass"),
        ];
        let aggregator = PatternAggregator::with_config(AggregationConfig {
            min_occurrences: 3,
            ..Default::default()
        });

        assert!(aggregator.detect(&failures, &[]).is_empty());
    }

    #[test]
    fn test_pattern_json_shape() {
        let pattern = PatternAggregator::new()
            .detect(
                &[
                    FailureSignal::new("a", "verify", "x"),
                    FailureSignal::new("b", "verify", "x"),
                ],
                &[],
            )
            .remove(0);
        let json = serde_json::to_value(&pattern).unwrap();

        assert_eq!(json["type"], "failure");
        assert!(json["sourceItems"].is_array());
        assert!(json["lastSeen"].is_string());
    }
}
