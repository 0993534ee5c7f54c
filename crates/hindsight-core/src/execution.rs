//! Execution records handed over by the task tracker
//!
//! An [`ExecutionRecord`] is the read-only account of one finished unit of
//! work: the request, the effort it was planned at, how many iterations it
//! took, and the status of every tracked row.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::{Error, Result};

/// Characters that end a capability's namespace prefix
const NAMESPACE_SEPARATORS: [char; 3] = ['.', ':', '/'];

/// Log lines containing this (case-insensitively) mark a loopback
pub const LOOPBACK_MARKER: &str = "loopback";

/// Five-point effort scale, lowest first
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EffortLevel {
    #[serde(alias = "TRIVIAL", alias = "Trivial")]
    Trivial,
    #[serde(alias = "QUICK", alias = "Quick")]
    Quick,
    #[default]
    #[serde(alias = "STANDARD", alias = "Standard")]
    Standard,
    #[serde(alias = "THOROUGH", alias = "Thorough")]
    Thorough,
    #[serde(alias = "DETERMINED", alias = "Determined")]
    Determined,
}

impl EffortLevel {
    pub const ALL: [EffortLevel; 5] = [
        EffortLevel::Trivial,
        EffortLevel::Quick,
        EffortLevel::Standard,
        EffortLevel::Thorough,
        EffortLevel::Determined,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "trivial",
            Self::Quick => "quick",
            Self::Standard => "standard",
            Self::Thorough => "thorough",
            Self::Determined => "determined",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|l| *l == self).unwrap_or(2)
    }

    /// One level higher, saturating at the top of the scale
    pub fn step_up(self) -> Self {
        Self::ALL[(self.index() + 1).min(Self::ALL.len() - 1)]
    }

    /// One level lower, saturating at the bottom of the scale
    pub fn step_down(self) -> Self {
        Self::ALL[self.index().saturating_sub(1)]
    }
}

impl FromStr for EffortLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trivial" => Ok(Self::Trivial),
            "quick" => Ok(Self::Quick),
            "standard" => Ok(Self::Standard),
            "thorough" => Ok(Self::Thorough),
            "determined" => Ok(Self::Determined),
            _ => Err(Error::Parse(format!("Unknown effort level: {}", s))),
        }
    }
}

impl fmt::Display for EffortLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Tracker status of a single row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    #[serde(alias = "PENDING")]
    Pending,
    #[serde(alias = "ACTIVE")]
    Active,
    #[serde(alias = "DONE")]
    Done,
    #[serde(alias = "ADJUSTED")]
    Adjusted,
    #[serde(alias = "BLOCKED")]
    Blocked,
}

/// Outcome of verifying a row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationResult {
    #[serde(alias = "PASS")]
    Pass,
    #[serde(alias = "FAIL")]
    Fail,
    #[serde(alias = "BLOCKED")]
    Blocked,
}

/// One tracked row of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRow {
    #[serde(default)]
    pub criterion: String,
    pub status: RowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjusted_reason: Option<String>,
}

impl ExecutionRow {
    pub fn new(criterion: impl Into<String>, status: RowStatus) -> Self {
        Self {
            criterion: criterion.into(),
            status,
            capability: None,
            verification: None,
            blocked_reason: None,
            adjusted_reason: None,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capability = Some(capability.into());
        self
    }

    pub fn with_verification(mut self, verification: VerificationResult) -> Self {
        self.verification = Some(verification);
        self
    }

    pub fn with_blocked_reason(mut self, reason: impl Into<String>) -> Self {
        self.blocked_reason = Some(reason.into());
        self
    }

    pub fn with_adjusted_reason(mut self, reason: impl Into<String>) -> Self {
        self.adjusted_reason = Some(reason.into());
        self
    }

    /// Done, or verified as passing
    pub fn is_success(&self) -> bool {
        self.status == RowStatus::Done || self.verification == Some(VerificationResult::Pass)
    }

    pub fn is_blocked(&self) -> bool {
        self.status == RowStatus::Blocked
            || self.verification == Some(VerificationResult::Blocked)
    }

    pub fn is_adjusted(&self) -> bool {
        self.status == RowStatus::Adjusted
    }
}

/// The record of one completed unit of work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub request: String,
    #[serde(default)]
    pub effort: EffortLevel,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub rows: Vec<ExecutionRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_item: Option<String>,
    /// Free-form execution log
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub log: Vec<String>,
}

fn default_iterations() -> u32 {
    1
}

impl ExecutionRecord {
    pub fn new(request: impl Into<String>, effort: EffortLevel) -> Self {
        Self {
            request: request.into(),
            effort,
            iterations: default_iterations(),
            rows: Vec::new(),
            work_item: None,
            log: Vec::new(),
        }
    }

    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }

    pub fn with_rows(mut self, rows: Vec<ExecutionRow>) -> Self {
        self.rows = rows;
        self
    }

    pub fn with_log(mut self, log: Vec<String>) -> Self {
        self.log = log;
        self
    }

    /// Read a record from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::MissingExecutionRecord(path.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };
        let record: Self = serde_json::from_str(&content)?;
        record.ensure_rows()?;
        Ok(record)
    }

    /// A record without rows carries nothing to learn from
    pub fn ensure_rows(&self) -> Result<()> {
        if self.rows.is_empty() {
            return Err(Error::EmptyExecutionRecord);
        }
        Ok(())
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn completed_rows(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| r.status == RowStatus::Done)
            .count()
    }

    pub fn completion_rate(&self) -> f64 {
        if self.rows.is_empty() {
            0.0
        } else {
            self.completed_rows() as f64 / self.total_rows() as f64
        }
    }

    /// Number of log lines that mark a loopback
    pub fn loopback_markers(&self) -> usize {
        self.log
            .iter()
            .filter(|line| line.to_lowercase().contains(LOOPBACK_MARKER))
            .count()
    }
}

/// Text before the first namespace separator (`research.web` → `research`)
pub fn capability_namespace(capability: &str) -> &str {
    capability
        .split(NAMESPACE_SEPARATORS)
        .next()
        .unwrap_or(capability)
}
