use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered verdict labels, worst last. The numeric rank is what gets
/// exported to metrics consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    #[serde(rename = "GOOD")]
    Good,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "NONCRIT_NC")]
    NoncritNc,
    #[serde(rename = "CRIT_NC")]
    CritNc,
    #[serde(rename = "BAD")]
    Bad,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Good,
        Severity::Warning,
        Severity::NoncritNc,
        Severity::CritNc,
        Severity::Bad,
    ];

    pub fn rank(self) -> u8 {
        match self {
            Self::Good => 0,
            Self::Warning => 1,
            Self::NoncritNc => 2,
            Self::CritNc => 3,
            Self::Bad => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Good => "GOOD",
            Self::Warning => "WARNING",
            Self::NoncritNc => "NONCRIT_NC",
            Self::CritNc => "CRIT_NC",
            Self::Bad => "BAD",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One test verdict for one artifact. `comparable == false` means value and
/// threshold must not feed any numeric aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub test_name: String,
    pub result: Severity,
    pub comparable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
}

/// A test outcome with the provenance injected while merging per-task
/// documents into the global summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotatedOutcome {
    #[serde(flatten)]
    pub outcome: TestOutcome,
    pub name: String,
    pub type_global: String,
    pub type_specific: String,
    pub rel_path_plot: String,
}

impl AsRef<TestOutcome> for TestOutcome {
    fn as_ref(&self) -> &TestOutcome {
        self
    }
}

impl AsRef<TestOutcome> for AnnotatedOutcome {
    fn as_ref(&self) -> &TestOutcome {
        &self.outcome
    }
}

/// Per-task document written by the comparison routine as `Summary.json`.
pub type RawResultDocument = BTreeMap<String, Vec<TestOutcome>>;

/// Run-wide merged document, persisted once as `SummaryGlobal.json`.
pub type GlobalSummary = BTreeMap<String, Vec<AnnotatedOutcome>>;

/// Top-level directory configuration: group name to sub-group rules.
pub type DirectoryConfig = BTreeMap<String, BTreeMap<String, GroupRule>>;

/// A sub-group rule is either a plain glob pattern resolved against both
/// trees, or a metric-extraction rule building synthetic histograms from
/// matched text logs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupRule {
    Glob(String),
    Metrics(MetricRule),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRule {
    pub pattern: String,
    pub fields: Vec<MetricField>,
    #[serde(default)]
    pub combine_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricField {
    pub name: String,
    pub regex: String,
    pub field: usize,
}

/// Single-bin stand-in for a true histogram, summing one extracted metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticHistogram {
    pub name: String,
    pub entries: u64,
    pub sum: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticHistogramFile {
    pub histograms: Vec<SyntheticHistogram>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeReport {
    pub directories: Vec<String>,
    pub files: BTreeMap<String, Vec<u64>>,
    pub threshold: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub group: String,
    pub files: usize,
    pub status: String,
    pub log_path: String,
}

/// Per-run record of dispatched tasks and recovered problems, persisted as
/// `run_report.json` so partial failures are discoverable without reading
/// per-task logs.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub manifest_version: u32,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_sha256: Option<String>,
    pub tasks: Vec<TaskRecord>,
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            manifest_version: 1,
            generated_at: crate::util::now_utc_string(),
            config_sha256: None,
            tasks: Vec::new(),
            warnings: Vec::new(),
        }
    }
}
