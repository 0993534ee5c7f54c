//! Learning extraction from finished executions
//!
//! This module turns one [`ExecutionRecord`] into typed [`Learning`] entries:
//! capability performance, estimation accuracy, blocked and adjusted rows,
//! iteration counts, and clean first-pass successes. Capturing persists each
//! learning under its type's bucket and mirrors pattern learnings into the
//! pattern log straight away.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::config::ExtractionConfig;
use crate::execution::{capability_namespace, EffortLevel, ExecutionRecord, ExecutionRow};
use crate::pattern::{criterion_key, pattern_id, week_label, Pattern, PatternType};
use crate::store::SignalStore;
use crate::{Error, Result};

pub const TAG_CAPABILITY: &str = "capability";
pub const TAG_ESTIMATION: &str = "estimation";
pub const TAG_BLOCKED: &str = "blocked";
pub const TAG_FAILURE: &str = "failure";
pub const TAG_ADJUSTED: &str = "adjusted";
pub const TAG_ITERATION: &str = "iteration";
pub const TAG_LOOPBACK: &str = "loopback";
pub const TAG_SUCCESS: &str = "success";

/// Kind of insight, which also decides where it is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LearningType {
    Capability,
    Phase,
    Estimation,
    Pattern,
    General,
}

impl LearningType {
    pub const ALL: [LearningType; 5] = [
        LearningType::Capability,
        LearningType::Phase,
        LearningType::Estimation,
        LearningType::Pattern,
        LearningType::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Capability => "capability",
            Self::Phase => "phase",
            Self::Estimation => "estimation",
            Self::Pattern => "pattern",
            Self::General => "general",
        }
    }

    /// Storage bucket directory name
    pub fn bucket(&self) -> &'static str {
        match self {
            Self::Capability => "CAPABILITY",
            Self::Phase => "PHASE",
            Self::Estimation => "ESTIMATION",
            Self::Pattern => "PATTERN",
            Self::General => "GENERAL",
        }
    }
}

impl FromStr for LearningType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "capability" => Ok(Self::Capability),
            "phase" => Ok(Self::Phase),
            "estimation" => Ok(Self::Estimation),
            "pattern" => Ok(Self::Pattern),
            "general" => Ok(Self::General),
            _ => Err(Error::Parse(format!("Unknown learning type: {}", s))),
        }
    }
}

impl fmt::Display for LearningType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the execution a learning came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningContext {
    pub request: String,
    pub effort: EffortLevel,
    pub iterations: u32,
    pub total_rows: usize,
    pub completed_rows: usize,
}

impl LearningContext {
    fn from_record(record: &ExecutionRecord) -> Self {
        Self {
            request: record.request.clone(),
            effort: record.effort,
            iterations: record.iterations,
            total_rows: record.total_rows(),
            completed_rows: record.completed_rows(),
        }
    }
}

/// An immutable insight derived from one execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Learning {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub learning_type: LearningType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub title: String,
    pub insight: String,
    pub context: LearningContext,
    pub actionable: bool,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Capability identifiers this learning is about
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl Learning {
    fn new(
        learning_type: LearningType,
        title: impl Into<String>,
        insight: impl Into<String>,
        context: LearningContext,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            id: id[..12].to_string(),
            timestamp,
            learning_type,
            category: None,
            title: title.into(),
            insight: insight.into(),
            context,
            actionable: false,
            tags: BTreeSet::new(),
            capabilities: Vec::new(),
        }
    }

    fn with_category(mut self, category: Option<&str>) -> Self {
        self.category = category.map(String::from);
        self
    }

    fn with_tags<'a>(mut self, tags: impl IntoIterator<Item = &'a str>) -> Self {
        self.tags.extend(tags.into_iter().map(String::from));
        self
    }

    fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    fn actionable(mut self, actionable: bool) -> Self {
        self.actionable = actionable;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// A pattern learning recording something that went wrong
    pub fn is_failure_pattern(&self) -> bool {
        self.learning_type == LearningType::Pattern && self.has_tag(TAG_FAILURE)
    }

    /// A general learning recording a clean success
    pub fn is_success(&self) -> bool {
        self.learning_type == LearningType::General && self.has_tag(TAG_SUCCESS)
    }

    /// Age in fractional days, never negative
    pub fn age_days(&self, now: DateTime<Utc>) -> f64 {
        let seconds = (now - self.timestamp).num_seconds().max(0) as f64;
        seconds / 86_400.0
    }

    /// Pattern learnings are mirrored into the pattern log
    pub fn mirror_pattern(&self) -> Option<Pattern> {
        if self.learning_type != LearningType::Pattern {
            return None;
        }

        let (pattern_type, pattern, recommendation) = if self.has_tag(TAG_BLOCKED) {
            (
                PatternType::Failure,
                self.title.clone(),
                format!("Resolve the blocker before starting: {}", self.title),
            )
        } else {
            (
                PatternType::Loopback,
                self.insight.clone(),
                "Clarify requirements up front to avoid mid-execution adjustments".to_string(),
            )
        };

        // Keyed on the content; adjusted titles only carry a row count
        let key = format!(
            "{}\n{}",
            criterion_key(&self.title, usize::MAX),
            criterion_key(&self.insight, usize::MAX)
        );
        Some(Pattern {
            id: pattern_id("learning", &key),
            week: week_label(self.timestamp),
            pattern_type,
            pattern,
            frequency: 1,
            recommendation,
            source_items: BTreeSet::from([self.context.request.clone()]),
            last_seen: self.timestamp,
        })
    }
}

/// Result of capturing one execution
#[derive(Debug, Clone)]
pub struct CaptureOutcome {
    pub learnings: Vec<Learning>,
    pub learning_paths: Vec<PathBuf>,
    pub mirrored_patterns: Vec<Pattern>,
    pub summary: String,
    pub summary_path: PathBuf,
}

struct CapabilityUsage {
    capability: String,
    usage: usize,
    successes: usize,
}

/// Converts execution records into learnings
#[derive(Debug, Clone, Default)]
pub struct LearningExtractor {
    config: ExtractionConfig,
}

impl LearningExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: ExtractionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Extract learnings stamped with the current time
    pub fn extract(&self, record: &ExecutionRecord) -> Vec<Learning> {
        self.extract_at(record, Utc::now())
    }

    /// Extract learnings in rule order: capabilities, estimation, blocked
    /// rows, adjustments, iterations, general success
    pub fn extract_at(&self, record: &ExecutionRecord, now: DateTime<Utc>) -> Vec<Learning> {
        let context = LearningContext::from_record(record);
        let mut learnings = self.capability_learnings(record, &context, now);
        learnings.push(self.estimation_learning(record, &context, now));
        learnings.extend(self.blocked_learnings(record, &context, now));
        learnings.extend(self.adjusted_learning(record, &context, now));
        learnings.extend(self.iteration_learning(record, &context, now));
        learnings.extend(self.success_learning(record, &context, now));
        learnings
    }

    fn capability_learnings(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Vec<Learning> {
        let mut usages: Vec<CapabilityUsage> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();

        for row in &record.rows {
            let Some(capability) = row.capability.as_deref() else {
                continue;
            };
            let idx = *index.entry(capability).or_insert_with(|| {
                usages.push(CapabilityUsage {
                    capability: capability.to_string(),
                    usage: 0,
                    successes: 0,
                });
                usages.len() - 1
            });
            usages[idx].usage += 1;
            if row.is_success() {
                usages[idx].successes += 1;
            }
        }

        usages
            .into_iter()
            .filter(|u| u.usage >= self.config.min_capability_usage)
            .map(|u| {
                let rate = u.successes as f64 / u.usage as f64;
                let actionable = rate < self.config.capability_success_threshold;
                let insight = if actionable {
                    format!(
                        "{} succeeded in {} of {} rows ({:.0}%); check how it is applied before relying on it",
                        u.capability,
                        u.successes,
                        u.usage,
                        rate * 100.0
                    )
                } else {
                    format!(
                        "{} performed reliably: {} of {} rows succeeded",
                        u.capability, u.successes, u.usage
                    )
                };
                let namespace = capability_namespace(&u.capability);

                Learning::new(
                    LearningType::Capability,
                    format!("Capability {}: {:.0}% success", u.capability, rate * 100.0),
                    insight,
                    context.clone(),
                    now,
                )
                .with_category(Some(namespace))
                .with_tags([TAG_CAPABILITY, namespace, u.capability.as_str()])
                .with_capabilities(vec![u.capability.clone()])
                .actionable(actionable)
            })
            .collect()
    }

    fn estimation_learning(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Learning {
        let completion = record.completion_rate();
        let accurate = record.iterations <= self.config.estimation_max_iterations
            && completion >= self.config.estimation_completion_threshold;

        let (title, insight) = if accurate {
            (
                format!("Effort estimate held at {}", record.effort),
                format!(
                    "{} of {} rows completed in {} iteration(s) at {} effort",
                    context.completed_rows, context.total_rows, record.iterations, record.effort
                ),
            )
        } else {
            (
                format!("Effort estimate missed at {}", record.effort),
                format!(
                    "Only {} of {} rows ({:.0}%) completed after {} iteration(s) at {} effort; plan similar requests at {}",
                    context.completed_rows,
                    context.total_rows,
                    completion * 100.0,
                    record.iterations,
                    record.effort,
                    record.effort.step_up()
                ),
            )
        };

        Learning::new(LearningType::Estimation, title, insight, context.clone(), now)
            .with_tags([
                TAG_ESTIMATION,
                record.effort.as_str(),
                if accurate { "accurate" } else { "inaccurate" },
            ])
            .actionable(!accurate)
    }

    fn blocked_learnings(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Vec<Learning> {
        record
            .rows
            .iter()
            .filter(|row| row.is_blocked())
            .map(|row| {
                let reason = row
                    .blocked_reason
                    .as_deref()
                    .unwrap_or("no reason recorded");
                let namespace = row.capability.as_deref().map(capability_namespace);

                let mut learning = Learning::new(
                    LearningType::Pattern,
                    format!("Blocked: {}", row_label(row)),
                    format!("Row '{}' was blocked: {}", row_label(row), reason),
                    context.clone(),
                    now,
                )
                .with_category(namespace)
                .with_tags([TAG_BLOCKED, TAG_FAILURE])
                .actionable(true);

                if let Some(capability) = &row.capability {
                    learning = learning
                        .with_tags([capability.as_str()])
                        .with_capabilities(vec![capability.clone()]);
                }
                learning
            })
            .collect()
    }

    fn adjusted_learning(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Option<Learning> {
        let reasons: Vec<String> = record
            .rows
            .iter()
            .filter(|row| row.is_adjusted())
            .map(|row| {
                row.adjusted_reason
                    .clone()
                    .unwrap_or_else(|| row_label(row).to_string())
            })
            .collect();

        if reasons.is_empty() {
            return None;
        }

        Some(
            Learning::new(
                LearningType::Pattern,
                format!("{} row(s) adjusted during execution", reasons.len()),
                format!("Adjustments: {}", reasons.join("; ")),
                context.clone(),
                now,
            )
            .with_tags([TAG_ADJUSTED])
            .actionable(true),
        )
    }

    fn iteration_learning(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Option<Learning> {
        if record.iterations <= 1 {
            return None;
        }

        let markers = record.loopback_markers();
        Some(
            Learning::new(
                LearningType::Phase,
                format!("Needed {} iterations", record.iterations),
                format!(
                    "Execution took {} iterations with {} loopback marker(s) in the log",
                    record.iterations, markers
                ),
                context.clone(),
                now,
            )
            .with_tags([TAG_ITERATION, TAG_LOOPBACK])
            .actionable(record.iterations > 2),
        )
    }

    fn success_learning(
        &self,
        record: &ExecutionRecord,
        context: &LearningContext,
        now: DateTime<Utc>,
    ) -> Option<Learning> {
        if record.iterations != 1
            || record.completion_rate() < self.config.success_completion_threshold
        {
            return None;
        }

        let mut capabilities: Vec<String> = Vec::new();
        for capability in record
            .rows
            .iter()
            .filter(|row| row.is_success())
            .filter_map(|row| row.capability.as_ref())
        {
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }

        Some(
            Learning::new(
                LearningType::General,
                "Clean first-pass completion",
                format!(
                    "{} of {} rows completed on the first iteration at {} effort",
                    context.completed_rows, context.total_rows, record.effort
                ),
                context.clone(),
                now,
            )
            .with_tags([TAG_SUCCESS])
            .with_capabilities(capabilities),
        )
    }

    /// Extract, persist, mirror and summarise one execution.
    ///
    /// Fails before writing anything when the record has no rows.
    #[tracing::instrument(skip(self, store, record), level = "debug", fields(request = %record.request))]
    pub async fn capture(&self, store: &SignalStore, record: &ExecutionRecord) -> Result<CaptureOutcome> {
        record.ensure_rows()?;

        let now = Utc::now();
        let learnings = self.extract_at(record, now);

        let mut learning_paths = Vec::with_capacity(learnings.len());
        for learning in &learnings {
            learning_paths.push(store.write_learning(learning).await?);
        }

        let mirrors: Vec<Pattern> = learnings.iter().filter_map(Learning::mirror_pattern).collect();
        let mirrored_patterns = store.append_new_patterns(mirrors).await?;

        let summary = session_summary(record, &learnings, now);
        let session_id = Uuid::new_v4().simple().to_string();
        let summary_path = store
            .write_session_summary(now, &session_id[..12], &summary)
            .await?;

        tracing::info!(
            learnings = learnings.len(),
            actionable = learnings.iter().filter(|l| l.actionable).count(),
            mirrored = mirrored_patterns.len(),
            "captured execution"
        );

        Ok(CaptureOutcome {
            learnings,
            learning_paths,
            mirrored_patterns,
            summary,
            summary_path,
        })
    }
}

fn row_label(row: &ExecutionRow) -> &str {
    if row.criterion.trim().is_empty() {
        row.capability.as_deref().unwrap_or("unnamed row")
    } else {
        &row.criterion
    }
}

/// Plain-text account of a capture
pub fn session_summary(record: &ExecutionRecord, learnings: &[Learning], at: DateTime<Utc>) -> String {
    let mut out = String::new();
    out.push_str(&format!("Session captured {}\n", at.format("%Y-%m-%d %H:%M UTC")));
    out.push_str(&format!("Request: {}\n", record.request));
    out.push_str(&format!(
        "Effort: {} | Iterations: {} | Rows: {}/{} completed ({:.0}%)\n",
        record.effort,
        record.iterations,
        record.completed_rows(),
        record.total_rows(),
        record.completion_rate() * 100.0
    ));
    out.push_str(&format!("\nLearnings ({}):\n", learnings.len()));
    for learning in learnings {
        let marker = if learning.actionable { "!" } else { "-" };
        out.push_str(&format!(
            "  {} [{}] {}\n      {}\n",
            marker, learning.learning_type, learning.title, learning.insight
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{RowStatus, VerificationResult};
    use tempfile::TempDir;

    fn done_rows(n: usize) -> Vec<ExecutionRow> {
        (0..n)
            .map(|i| ExecutionRow::new(format!("criterion {}", i), RowStatus::Done))
            .collect()
    }

    fn of_type(learnings: &[Learning], t: LearningType) -> Vec<&Learning> {
        learnings.iter().filter(|l| l.learning_type == t).collect()
    }

    #[test]
    fn test_all_done_single_iteration_is_clean_success() {
        let record = ExecutionRecord::new("Add login page", EffortLevel::Standard)
            .with_iterations(1)
            .with_rows(done_rows(10));

        let learnings = LearningExtractor::new().extract(&record);

        let general = of_type(&learnings, LearningType::General);
        assert_eq!(general.len(), 1);
        assert!(general[0].is_success());
        assert!(!general[0].actionable);

        let estimation = of_type(&learnings, LearningType::Estimation);
        assert_eq!(estimation.len(), 1);
        assert!(!estimation[0].actionable);
        assert!(estimation[0].has_tag("accurate"));

        assert!(of_type(&learnings, LearningType::Phase).is_empty());
        assert!(of_type(&learnings, LearningType::Pattern).is_empty());
    }

    #[test]
    fn test_capability_success_rate() {
        let rows = vec![
            ExecutionRow::new("a", RowStatus::Done).with_capability("research.web"),
            ExecutionRow::new("b", RowStatus::Blocked).with_capability("research.web"),
            ExecutionRow::new("c", RowStatus::Active)
                .with_capability("research.web")
                .with_verification(VerificationResult::Pass),
            ExecutionRow::new("d", RowStatus::Done).with_capability("dev.rust"),
            ExecutionRow::new("e", RowStatus::Done).with_capability("dev.rust"),
            ExecutionRow::new("f", RowStatus::Done).with_capability("solo.once"),
        ];
        let record = ExecutionRecord::new("Research crates", EffortLevel::Quick).with_rows(rows);

        let learnings = LearningExtractor::new().extract(&record);
        let capabilities = of_type(&learnings, LearningType::Capability);

        // solo.once appears once and is skipped
        assert_eq!(capabilities.len(), 2);
        assert_eq!(capabilities[0].capabilities, vec!["research.web".to_string()]);
        assert_eq!(capabilities[0].category.as_deref(), Some("research"));
        assert!(capabilities[0].actionable); // 2/3 < 80%
        assert!(capabilities[0].title.contains("67%"));
        assert_eq!(capabilities[1].category.as_deref(), Some("dev"));
        assert!(!capabilities[1].actionable);
    }

    #[test]
    fn test_estimation_inaccurate_on_many_iterations() {
        let record = ExecutionRecord::new("Migrate storage", EffortLevel::Standard)
            .with_iterations(3)
            .with_rows(done_rows(4));

        let learnings = LearningExtractor::new().extract(&record);
        let estimation = of_type(&learnings, LearningType::Estimation);

        assert_eq!(estimation.len(), 1);
        assert!(estimation[0].actionable);
        assert!(estimation[0].insight.contains("thorough"));
    }

    #[test]
    fn test_blocked_and_adjusted_rows() {
        let rows = vec![
            ExecutionRow::new("deploy to staging", RowStatus::Blocked)
                .with_capability("ops.deploy")
                .with_blocked_reason("missing credentials"),
            ExecutionRow::new("write docs", RowStatus::Active)
                .with_verification(VerificationResult::Blocked),
            ExecutionRow::new("scope api", RowStatus::Adjusted).with_adjusted_reason("split into two"),
            ExecutionRow::new("rename module", RowStatus::Adjusted),
            ExecutionRow::new("tests", RowStatus::Done),
        ];
        let record = ExecutionRecord::new("Ship release", EffortLevel::Thorough).with_rows(rows);

        let learnings = LearningExtractor::new().extract(&record);
        let patterns = of_type(&learnings, LearningType::Pattern);

        assert_eq!(patterns.len(), 3);
        assert!(patterns.iter().all(|l| l.actionable));

        let blocked: Vec<_> = patterns.iter().filter(|l| l.has_tag(TAG_BLOCKED)).collect();
        assert_eq!(blocked.len(), 2);
        assert!(blocked[0].is_failure_pattern());
        assert_eq!(blocked[0].category.as_deref(), Some("ops"));
        assert!(blocked[0].insight.contains("missing credentials"));

        let adjusted = patterns.iter().find(|l| l.has_tag(TAG_ADJUSTED)).unwrap();
        assert!(adjusted.insight.contains("split into two"));
        assert!(adjusted.insight.contains("rename module"));
    }

    #[test]
    fn test_iteration_learning() {
        let record = ExecutionRecord::new("Fix flaky test", EffortLevel::Quick)
            .with_iterations(2)
            .with_rows(done_rows(2))
            .with_log(vec!["LOOPBACK verify -> build".to_string()]);

        let learnings = LearningExtractor::new().extract(&record);
        let phase = of_type(&learnings, LearningType::Phase);

        assert_eq!(phase.len(), 1);
        assert!(!phase[0].actionable);
        assert!(phase[0].insight.contains("1 loopback marker"));
        // Two iterations never count as a clean success
        assert!(of_type(&learnings, LearningType::General).is_empty());
    }

    #[test]
    fn test_mirror_pattern_only_for_pattern_learnings() {
        let rows = vec![ExecutionRow::new("deploy", RowStatus::Blocked)];
        let record = ExecutionRecord::new("Ship", EffortLevel::Standard).with_rows(rows);
        let learnings = LearningExtractor::new().extract(&record);

        let mirrors: Vec<_> = learnings.iter().filter_map(Learning::mirror_pattern).collect();
        assert_eq!(mirrors.len(), 1);
        assert_eq!(mirrors[0].pattern_type, PatternType::Failure);
        assert_eq!(mirrors[0].frequency, 1);
    }

    #[test]
    fn test_learning_round_trip() {
        let record = ExecutionRecord::new("Add feature", EffortLevel::Quick).with_rows(done_rows(1));
        let learning = LearningExtractor::new().extract(&record).remove(0);

        let json = serde_json::to_string(&learning).unwrap();
        let back: Learning = serde_json::from_str(&json).unwrap();
        assert_eq!(back, learning);
        assert!(json.contains("\"type\":\"estimation\""));
    }

    #[tokio::test]
    async fn test_capture_persists_by_bucket() {
        let temp = TempDir::new().unwrap();
        let store = SignalStore::new(temp.path());
        let rows = vec![
            ExecutionRow::new("deploy", RowStatus::Blocked).with_blocked_reason("no access"),
            ExecutionRow::new("build", RowStatus::Done),
        ];
        let record = ExecutionRecord::new("Ship", EffortLevel::Standard).with_rows(rows);

        let outcome = LearningExtractor::new().capture(&store, &record).await.unwrap();

        assert_eq!(outcome.learnings.len(), outcome.learning_paths.len());
        assert!(outcome
            .learning_paths
            .iter()
            .any(|p| p.to_string_lossy().contains("/PATTERN/")));
        assert!(outcome.summary_path.exists());
        assert!(outcome.summary.contains("Request: Ship"));
        assert_eq!(outcome.mirrored_patterns.len(), 1);
        assert_eq!(store.read_patterns().await.unwrap().len(), 1);

        let stored = store.read_learnings().await.unwrap();
        assert_eq!(stored.len(), outcome.learnings.len());
    }

    #[tokio::test]
    async fn test_each_distinct_adjustment_is_mirrored() {
        let temp = TempDir::new().unwrap();
        let store = SignalStore::new(temp.path());
        let extractor = LearningExtractor::new();
        let adjusted = |reason: &str| {
            ExecutionRecord::new("Write docs", EffortLevel::Standard).with_rows(vec![
                ExecutionRow::new("docs", RowStatus::Adjusted).with_adjusted_reason(reason),
            ])
        };

        let first = extractor.capture(&store, &adjusted("split endpoint")).await.unwrap();
        let second = extractor.capture(&store, &adjusted("dropped diagrams")).await.unwrap();
        let repeat = extractor.capture(&store, &adjusted("dropped diagrams")).await.unwrap();

        assert_eq!(first.mirrored_patterns.len(), 1);
        assert_eq!(second.mirrored_patterns.len(), 1);
        assert!(repeat.mirrored_patterns.is_empty());

        let patterns = store.read_patterns().await.unwrap();
        assert_eq!(patterns.len(), 2);
        assert!(patterns.iter().all(|p| p.pattern_type == PatternType::Loopback));
        assert!(patterns[1].pattern.contains("dropped diagrams"));
    }

    #[tokio::test]
    async fn test_capture_rejects_empty_record() {
        let temp = TempDir::new().unwrap();
        let store = SignalStore::new(temp.path());
        let record = ExecutionRecord::new("Nothing", EffortLevel::Standard);

        let err = LearningExtractor::new().capture(&store, &record).await.unwrap_err();
        assert!(matches!(err, Error::EmptyExecutionRecord));
        assert!(!store.learning_dir().exists());
    }
}
