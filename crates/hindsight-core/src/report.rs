//! Store-wide summary for `report`/`stats`

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::pattern::{Pattern, PatternType};
use crate::signal::{AlgorithmStats, AlgorithmStreak};
use crate::store::SignalStore;
use crate::Result;

/// Patterns listed under "most frequent"
pub const TOP_PATTERNS: usize = 5;

/// Record counts per log
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogCounts {
    pub failures: usize,
    pub loopbacks: usize,
    pub ratings: usize,
    pub completions: usize,
    pub patterns: usize,
    pub learnings: usize,
}

/// Pattern counts for one week
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeekRollup {
    pub week: String,
    pub patterns: usize,
    /// Sum of pattern frequencies
    pub occurrences: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreSummary {
    pub generated_at: DateTime<Utc>,
    pub counts: LogCounts,
    pub stats: AlgorithmStats,
    pub streak: AlgorithmStreak,
    pub success_rate: f64,
    pub patterns_by_type: BTreeMap<String, usize>,
    /// Oldest week first
    pub weeks: Vec<WeekRollup>,
    pub top_patterns: Vec<Pattern>,
}

impl StoreSummary {
    /// Read every log and both singletons
    #[tracing::instrument(skip(store), level = "debug")]
    pub async fn load(store: &SignalStore) -> Result<Self> {
        let patterns = store.read_patterns().await?;
        let counts = LogCounts {
            failures: store.read_failures().await?.len(),
            loopbacks: store.read_loopbacks().await?.len(),
            ratings: store.read_ratings().await?.len(),
            completions: store.read_completions().await?.len(),
            patterns: patterns.len(),
            learnings: store.read_learnings().await?.len(),
        };
        let stats = store.read_stats().await?;
        let streak = store.read_streak().await?;

        Ok(Self::build(counts, stats, streak, patterns, Utc::now()))
    }

    pub fn build(
        counts: LogCounts,
        stats: AlgorithmStats,
        streak: AlgorithmStreak,
        patterns: Vec<Pattern>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut patterns_by_type: BTreeMap<String, usize> = BTreeMap::new();
        let mut weeks: BTreeMap<String, WeekRollup> = BTreeMap::new();
        for pattern in &patterns {
            *patterns_by_type
                .entry(pattern.pattern_type.to_string())
                .or_insert(0) += 1;

            let rollup = weeks.entry(pattern.week.clone()).or_insert_with(|| WeekRollup {
                week: pattern.week.clone(),
                ..Default::default()
            });
            rollup.patterns += 1;
            rollup.occurrences += pattern.frequency as u64;
        }

        let mut top_patterns = patterns;
        top_patterns.sort_by(|a, b| {
            b.frequency
                .cmp(&a.frequency)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
        });
        top_patterns.truncate(TOP_PATTERNS);

        Self {
            generated_at: now,
            success_rate: stats.success_rate(),
            counts,
            stats,
            streak,
            patterns_by_type,
            weeks: weeks.into_values().collect(),
            top_patterns,
        }
    }

    pub fn pattern_count(&self, pattern_type: PatternType) -> usize {
        self.patterns_by_type
            .get(pattern_type.as_str())
            .copied()
            .unwrap_or(0)
    }
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = &self.counts;
        writeln!(f, "Signals")?;
        writeln!(
            f,
            "  failures: {}  loopbacks: {}  ratings: {}  completions: {}",
            c.failures, c.loopbacks, c.ratings, c.completions
        )?;
        writeln!(f, "  learnings: {}  patterns: {}", c.learnings, c.patterns)?;

        let s = &self.stats;
        writeln!(f, "\nStats")?;
        writeln!(
            f,
            "  tasks: {} ({} succeeded), success rate {:.0}%",
            s.total_tasks,
            s.completed_tasks,
            self.success_rate * 100.0
        )?;
        writeln!(f, "  failure events: {}", s.failed_tasks)?;
        writeln!(
            f,
            "  avg iterations: {:.2}  loopbacks: {}  avg rating: {:.2} over {}",
            s.avg_iterations, s.total_loopbacks, s.avg_rating, s.rating_count
        )?;
        writeln!(
            f,
            "  streak: {} (best {})",
            self.streak.current, self.streak.best
        )?;

        if self.top_patterns.is_empty() {
            writeln!(f, "\nNo patterns detected yet.")?;
            return Ok(());
        }

        writeln!(f, "\nPatterns by type")?;
        for (pattern_type, count) in &self.patterns_by_type {
            writeln!(f, "  {:<9} {}", pattern_type, count)?;
        }

        writeln!(f, "\nPatterns by week")?;
        for week in &self.weeks {
            writeln!(
                f,
                "  {}  {} pattern(s), {} occurrence(s)",
                week.week, week.patterns, week.occurrences
            )?;
        }

        writeln!(f, "\nMost frequent")?;
        for pattern in &self.top_patterns {
            writeln!(
                f,
                "  {:>3}x [{}] {}",
                pattern.frequency, pattern.pattern_type, pattern.pattern
            )?;
            writeln!(f, "        {}", pattern.recommendation)?;
        }
        Ok(())
    }
}
