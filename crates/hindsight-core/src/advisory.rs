//! Pre-flight advice for a new request
//!
//! The synthesizer reads the store once, ranks learnings against the
//! request, and combines them with recent failures, recorded patterns and the
//! running stats into a [`PreFlightReport`]. It never writes. An empty store
//! yields a sparse but complete report.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::config::HindsightConfig;
use crate::execution::EffortLevel;
use crate::learning::{Learning, LearningType};
use crate::pattern::{criterion_key, Pattern, PatternType};
use crate::relevance::{overlap_ratio, significant_words, RelevanceScorer, ScoredLearning};
use crate::signal::{AlgorithmStats, AlgorithmStreak, FailureSignal};
use crate::store::SignalStore;
use crate::Result;

/// Confidence given to "avoid" recommendations
pub const AVOID_CONFIDENCE: f64 = 0.8;
/// Confidence given to "prefer" recommendations
pub const PREFER_CONFIDENCE: f64 = 0.7;
/// Success patterns turned into "prefer" recommendations
const PREFER_COUNT: usize = 2;

/// Pattern frequency at which a pattern warning is high severity
const HIGH_FREQUENCY: u32 = 5;
/// Pattern frequency at which a pattern warning is medium severity
const MEDIUM_FREQUENCY: u32 = 3;

/// Severity of a risk warning
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// Severity of a recorded pattern from how often it was seen
    pub fn from_frequency(frequency: u32) -> Self {
        if frequency >= HIGH_FREQUENCY {
            Self::High
        } else if frequency >= MEDIUM_FREQUENCY {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Where a risk warning came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskSource {
    /// A criterion that failed repeatedly inside the risk window
    RecentFailure { criterion: String },
    /// A recorded pattern
    Pattern { pattern_id: String, pattern_type: PatternType },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskWarning {
    pub severity: Severity,
    pub source: RiskSource,
    pub message: String,
    pub frequency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Something that went well before
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessPattern {
    pub learning_id: String,
    pub title: String,
    pub insight: String,
    pub capabilities: Vec<String>,
}

impl SuccessPattern {
    fn from_learning(learning: &Learning) -> Self {
        Self {
            learning_id: learning.id.clone(),
            title: learning.title.clone(),
            insight: learning.insight.clone(),
            capabilities: learning.capabilities.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Avoid,
    Consider,
    Prefer,
}

impl RecommendationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avoid => "avoid",
            Self::Consider => "consider",
            Self::Prefer => "prefer",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recommendation {
    pub kind: RecommendationKind,
    pub message: String,
    pub confidence: f64,
}

/// Advice assembled before a new unit of work starts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreFlightReport {
    pub request: String,
    pub generated_at: DateTime<Utc>,
    pub risk_warnings: Vec<RiskWarning>,
    pub success_patterns: Vec<SuccessPattern>,
    pub recommendations: Vec<Recommendation>,
    pub relevant_learnings: Vec<ScoredLearning>,
    pub suggested_effort: EffortLevel,
    pub suggested_capabilities: Vec<String>,
    pub current_streak: u64,
    pub best_streak: u64,
    pub recent_success_rate: f64,
    pub total_tasks: u64,
}

/// Everything the synthesizer reads from the store, loaded in one pass
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub learnings: Vec<Learning>,
    pub patterns: Vec<Pattern>,
    pub failures: Vec<FailureSignal>,
    pub stats: AlgorithmStats,
    pub streak: AlgorithmStreak,
}

impl StoreSnapshot {
    pub async fn load(store: &SignalStore) -> Result<Self> {
        Ok(Self {
            learnings: store.read_learnings().await?,
            patterns: store.read_patterns().await?,
            failures: store.read_failures().await?,
            stats: store.read_stats().await?,
            streak: store.read_streak().await?,
        })
    }
}

/// Builds pre-flight reports
#[derive(Debug, Clone, Default)]
pub struct AdvisorySynthesizer {
    config: HindsightConfig,
    scorer: RelevanceScorer,
}

impl AdvisorySynthesizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: HindsightConfig) -> Self {
        let scorer = RelevanceScorer::with_config(config.scoring.clone());
        Self { config, scorer }
    }

    /// Read the store and advise on `request`
    #[tracing::instrument(skip(self, store), level = "debug")]
    pub async fn advise(&self, store: &SignalStore, request: &str) -> Result<PreFlightReport> {
        let snapshot = StoreSnapshot::load(store).await?;
        Ok(self.synthesize(request, &snapshot, Utc::now()))
    }

    /// Pure report construction from a snapshot
    pub fn synthesize(&self, request: &str, snapshot: &StoreSnapshot, now: DateTime<Utc>) -> PreFlightReport {
        let ranked = self.scorer.rank_all(request, &snapshot.learnings, now);

        let risk_warnings = self.risk_warnings(&snapshot.failures, &snapshot.patterns, now);
        let success_patterns = self.success_patterns(&ranked);
        let mut relevant_learnings = ranked.clone();
        relevant_learnings.truncate(self.scorer.config().top_k);

        let recommendations = self.recommendations(&risk_warnings, &relevant_learnings, &success_patterns);
        let suggested_effort = self.suggest_effort(request, &snapshot.learnings);
        let suggested_capabilities = self.suggest_capabilities(&success_patterns, &ranked);

        tracing::debug!(
            learnings = snapshot.learnings.len(),
            warnings = risk_warnings.len(),
            recommendations = recommendations.len(),
            effort = %suggested_effort,
            "synthesized pre-flight report"
        );

        PreFlightReport {
            request: request.to_string(),
            generated_at: now,
            risk_warnings,
            success_patterns,
            recommendations,
            relevant_learnings,
            suggested_effort,
            suggested_capabilities,
            current_streak: snapshot.streak.current,
            best_streak: snapshot.streak.best,
            recent_success_rate: snapshot.stats.success_rate(),
            total_tasks: snapshot.stats.total_tasks,
        }
    }

    /// Repeated recent failures plus recorded failure and loopback patterns,
    /// most severe first
    pub fn risk_warnings(
        &self,
        failures: &[FailureSignal],
        patterns: &[Pattern],
        now: DateTime<Utc>,
    ) -> Vec<RiskWarning> {
        let advisory = &self.config.advisory;
        let key_length = self.config.aggregation.criterion_key_length;
        let cutoff = now - Duration::days(advisory.risk_window_days);

        let mut order: Vec<String> = Vec::new();
        let mut counts: HashMap<String, u32> = HashMap::new();
        for failure in failures.iter().filter(|f| f.timestamp >= cutoff) {
            let key = criterion_key(&failure.criterion, key_length);
            if key.is_empty() {
                continue;
            }
            let count = counts.entry(key.clone()).or_insert(0);
            if *count == 0 {
                order.push(key);
            }
            *count += 1;
        }

        let mut warnings: Vec<RiskWarning> = order
            .into_iter()
            .filter_map(|key| {
                let count = counts.get(&key).copied().unwrap_or(0);
                if (count as usize) < self.config.aggregation.min_occurrences {
                    return None;
                }
                let severity = if count as usize >= advisory.high_severity_repeats {
                    Severity::High
                } else {
                    Severity::Medium
                };
                Some(RiskWarning {
                    severity,
                    message: format!(
                        "'{}' failed {} times in the last {} days",
                        key, count, advisory.risk_window_days
                    ),
                    source: RiskSource::RecentFailure { criterion: key },
                    frequency: count,
                    recommendation: None,
                })
            })
            .collect();

        for pattern in patterns {
            if pattern.pattern_type == PatternType::Success {
                continue;
            }
            let already_warned = warnings.iter().any(|w| {
                matches!(&w.source, RiskSource::RecentFailure { criterion } if *criterion == pattern.pattern)
            });
            if already_warned {
                continue;
            }
            warnings.push(RiskWarning {
                severity: Severity::from_frequency(pattern.frequency),
                source: RiskSource::Pattern {
                    pattern_id: pattern.id.clone(),
                    pattern_type: pattern.pattern_type,
                },
                message: format!(
                    "{} pattern: {} (seen {}x)",
                    pattern.pattern_type, pattern.pattern, pattern.frequency
                ),
                frequency: pattern.frequency,
                recommendation: Some(pattern.recommendation.clone()),
            });
        }

        // Stable: equal severities keep discovery order
        warnings.sort_by(|a, b| b.severity.cmp(&a.severity));
        warnings.truncate(advisory.max_risk_warnings);
        warnings
    }

    /// Reliable capabilities and clean successes, most relevant first
    fn success_patterns(&self, ranked: &[ScoredLearning]) -> Vec<SuccessPattern> {
        ranked
            .iter()
            .map(|s| &s.learning)
            .filter(|l| is_reliable_capability(l) || l.is_success())
            .take(self.config.advisory.max_success_patterns)
            .map(SuccessPattern::from_learning)
            .collect()
    }

    fn recommendations(
        &self,
        warnings: &[RiskWarning],
        relevant: &[ScoredLearning],
        successes: &[SuccessPattern],
    ) -> Vec<Recommendation> {
        let advisory = &self.config.advisory;
        let mut recommendations: Vec<Recommendation> = Vec::new();

        for warning in warnings.iter().filter(|w| w.severity == Severity::High) {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Avoid,
                message: warning
                    .recommendation
                    .clone()
                    .unwrap_or_else(|| format!("Avoid repeating: {}", warning.message)),
                confidence: AVOID_CONFIDENCE,
            });
        }

        for scored in relevant
            .iter()
            .filter(|s| s.learning.actionable && s.score > advisory.consider_score_threshold)
        {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Consider,
                message: scored.learning.insight.clone(),
                confidence: scored.score.min(1.0),
            });
        }

        for success in successes.iter().take(PREFER_COUNT) {
            recommendations.push(Recommendation {
                kind: RecommendationKind::Prefer,
                message: format!("{}: {}", success.title, success.insight),
                confidence: PREFER_CONFIDENCE,
            });
        }

        recommendations.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        recommendations.truncate(advisory.max_recommendations);
        recommendations
    }

    /// Majority effort among similar past requests, shifted by keywords.
    /// Vote ties go to the higher effort level.
    pub fn suggest_effort(&self, request: &str, learnings: &[Learning]) -> EffortLevel {
        let advisory = &self.config.advisory;
        let words = self.scorer.request_words(request);

        let mut votes: HashMap<EffortLevel, usize> = HashMap::new();
        for learning in learnings {
            if overlap_ratio(&words, &learning.context.request) >= advisory.effort_overlap_threshold {
                *votes.entry(learning.context.effort).or_insert(0) += 1;
            }
        }

        let base = votes
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
            .map(|(level, _)| level)
            .unwrap_or_default();

        let tokens = significant_words(request, 0);
        let mentions = |keywords: &[String]| {
            keywords
                .iter()
                .any(|k| tokens.iter().any(|t| keyword_matches(t, k)))
        };
        let complex = mentions(&advisory.complexity_keywords);
        let simple = mentions(&advisory.simplicity_keywords);

        if complex {
            base.step_up()
        } else if simple && request.chars().count() < advisory.short_request_length {
            base.step_down()
        } else {
            base
        }
    }

    fn suggest_capabilities(&self, successes: &[SuccessPattern], ranked: &[ScoredLearning]) -> Vec<String> {
        let from_reliable = ranked
            .iter()
            .map(|s| &s.learning)
            .filter(|l| is_reliable_capability(l))
            .flat_map(|l| l.capabilities.iter());

        let mut capabilities: Vec<String> = Vec::new();
        for capability in successes.iter().flat_map(|s| s.capabilities.iter()).chain(from_reliable) {
            if capabilities.len() >= self.config.advisory.max_capabilities {
                break;
            }
            if !capabilities.contains(capability) {
                capabilities.push(capability.clone());
            }
        }
        capabilities
    }
}

/// Endings accepted after a keyword, so "fixed" and "migration" count but
/// "address" does not count as "add"
const KEYWORD_SUFFIXES: [&str; 12] = [
    "", "s", "es", "d", "ed", "ing", "er", "ers", "ion", "ions", "al", "ally",
];

/// Whether `token` is `keyword` or an inflection of it. A trailing `e` on
/// the keyword may be dropped ("update" matches "updating").
fn keyword_matches(token: &str, keyword: &str) -> bool {
    let keyword = keyword.to_lowercase();
    let inflected = |stem: &str| {
        token
            .strip_prefix(stem)
            .is_some_and(|rest| KEYWORD_SUFFIXES.contains(&rest))
    };
    if inflected(&keyword) {
        return true;
    }
    keyword
        .strip_suffix('e')
        .is_some_and(|stem| !stem.is_empty() && inflected(stem))
}

fn is_reliable_capability(learning: &Learning) -> bool {
    learning.learning_type == LearningType::Capability && !learning.actionable
}

impl fmt::Display for PreFlightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pre-flight check: {}", self.request)?;
        writeln!(
            f,
            "Suggested effort: {} | Streak: {} (best {}) | Success rate: {:.0}% of {} task(s)",
            self.suggested_effort,
            self.current_streak,
            self.best_streak,
            self.recent_success_rate * 100.0,
            self.total_tasks
        )?;

        if !self.suggested_capabilities.is_empty() {
            writeln!(f, "Suggested capabilities: {}", self.suggested_capabilities.join(", "))?;
        }

        if self.risk_warnings.is_empty() {
            writeln!(f, "\nNo known risks.")?;
        } else {
            writeln!(f, "\nRisks:")?;
            for warning in &self.risk_warnings {
                writeln!(f, "  [{}] {}", warning.severity, warning.message)?;
                if let Some(rec) = &warning.recommendation {
                    writeln!(f, "         -> {}", rec)?;
                }
            }
        }

        if !self.recommendations.is_empty() {
            writeln!(f, "\nRecommendations:")?;
            for rec in &self.recommendations {
                writeln!(
                    f,
                    "  {:<8} ({:.2}) {}",
                    rec.kind.as_str(),
                    rec.confidence,
                    rec.message
                )?;
            }
        }

        if !self.success_patterns.is_empty() {
            writeln!(f, "\nWhat worked before:")?;
            for success in &self.success_patterns {
                writeln!(f, "  - {}", success.title)?;
            }
        }

        if self.relevant_learnings.is_empty() {
            writeln!(f, "\nNo past learnings yet.")?;
        } else {
            writeln!(f, "\nRelevant learnings:")?;
            for scored in &self.relevant_learnings {
                writeln!(
                    f,
                    "  {:.2}  [{}] {}",
                    scored.score, scored.learning.learning_type, scored.learning.title
                )?;
                if !scored.reasons.is_empty() {
                    writeln!(f, "        {}", scored.reasons.join(", "))?;
                }
            }
        }
        Ok(())
    }
}
