use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};

use crate::model::{AnnotatedOutcome, GlobalSummary, RawResultDocument, Severity, TestOutcome};
use crate::util::read_json;

pub const SUMMARY_FILE: &str = "Summary.json";
pub const GLOBAL_SUMMARY_FILE: &str = "SummaryGlobal.json";

/// The synthetic per-artifact overall verdict emitted by the comparison
/// routine; classification keys on it exclusively.
pub const TEST_SUMMARY: &str = "test_summary";

/// Every per-task `Summary.json` under `root`, in sorted path order. The
/// order decides merge collisions, so it must be deterministic.
pub fn discover_summaries(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_summaries(root, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_summaries(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_summaries(&path, out)?;
        } else if entry.file_name() == SUMMARY_FILE {
            out.push(path);
        }
    }

    Ok(())
}

/// Merge all per-task documents under `output_root` into the run's global
/// summary, injecting provenance per outcome. Artifact-name collisions are
/// resolved last-writer-wins in sorted path order. Unreadable documents are
/// skipped and reported as warnings.
pub fn aggregate(output_root: &Path) -> Result<(GlobalSummary, Vec<String>)> {
    let mut merged = GlobalSummary::new();
    let mut warnings = Vec::new();

    for path in discover_summaries(output_root)? {
        let document: RawResultDocument = match read_json(&path) {
            Ok(document) => document,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "skipping unreadable summary");
                warnings.push(format!("unreadable summary {}: {err:#}", path.display()));
                continue;
            }
        };

        let parent = path.parent().unwrap_or(output_root);
        let relative = parent.strip_prefix(output_root).unwrap_or(Path::new(""));
        let type_specific = if relative.as_os_str().is_empty() {
            ".".to_string()
        } else {
            relative
                .to_str()
                .with_context(|| format!("invalid UTF-8 path: {}", relative.display()))?
                .to_string()
        };
        let type_global = type_specific
            .split('/')
            .next()
            .unwrap_or(".")
            .to_string();

        for (name, outcomes) in document {
            let annotated: Vec<AnnotatedOutcome> = outcomes
                .into_iter()
                .map(|outcome| AnnotatedOutcome {
                    outcome,
                    name: name.clone(),
                    type_global: type_global.clone(),
                    type_specific: type_specific.clone(),
                    rel_path_plot: format!("{type_specific}/overlayPlots/{name}.png"),
                })
                .collect();
            merged.insert(name, annotated);
        }
    }

    info!(artifacts = merged.len(), "merged global summary");
    Ok((merged, warnings))
}

/// Bucket artifact names by the severity of their `test_summary` outcome.
/// Every severity level is present in the result; artifacts without a
/// `test_summary` outcome appear in no bucket.
pub fn classify<O: AsRef<TestOutcome>>(
    document: &BTreeMap<String, Vec<O>>,
) -> BTreeMap<Severity, BTreeSet<String>> {
    let mut buckets: BTreeMap<Severity, BTreeSet<String>> = Severity::ALL
        .iter()
        .map(|severity| (*severity, BTreeSet::new()))
        .collect();

    for (name, outcomes) in document {
        for outcome in outcomes {
            let outcome = outcome.as_ref();
            if outcome.test_name != TEST_SUMMARY {
                continue;
            }
            if let Some(bucket) = buckets.get_mut(&outcome.result) {
                bucket.insert(name.clone());
            }
        }
    }

    buckets
}

pub fn print_severity_counts(buckets: &BTreeMap<Severity, BTreeSet<String>>) {
    let total: usize = buckets.values().map(BTreeSet::len).sum();
    println!("\n#####\nNumber of compared artifacts: {total}, out of which severity is");
    for severity in Severity::ALL {
        let count = buckets.get(&severity).map_or(0, BTreeSet::len);
        println!("Severity {severity}: {count}");
    }
    println!("#####\n");
}

#[derive(Debug, Clone)]
pub struct SeverityDiff {
    pub severity: Severity,
    pub only_first: BTreeSet<String>,
    pub only_second: BTreeSet<String>,
}

/// Per severity level, the artifacts bucketed there in exactly one of the
/// two runs. Artifacts at the same severity in both runs are never reported.
pub fn diff_classified(
    first: &BTreeMap<Severity, BTreeSet<String>>,
    second: &BTreeMap<Severity, BTreeSet<String>>,
) -> Vec<SeverityDiff> {
    Severity::ALL
        .iter()
        .map(|severity| {
            let a = first.get(severity).cloned().unwrap_or_default();
            let b = second.get(severity).cloned().unwrap_or_default();
            let intersection: BTreeSet<String> = a.intersection(&b).cloned().collect();
            SeverityDiff {
                severity: *severity,
                only_first: a.difference(&intersection).cloned().collect(),
                only_second: b.difference(&intersection).cloned().collect(),
            }
        })
        .collect()
}

/// Threshold seed lines for a subsequent run: one `name,test,value` row per
/// comparable outcome; non-comparable outcomes contribute nothing.
pub fn rebuild_thresholds<O: AsRef<TestOutcome>>(document: &BTreeMap<String, Vec<O>>) -> String {
    let mut out = String::new();

    for (name, outcomes) in document {
        for outcome in outcomes {
            let outcome = outcome.as_ref();
            if !outcome.comparable {
                continue;
            }
            let Some(value) = outcome.value else {
                continue;
            };
            out.push_str(&format!("{name},{},{value}\n", outcome.test_name));
        }
    }

    out
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TestSeries {
    pub histograms: Vec<String>,
    pub values: Vec<Option<f64>>,
    pub thresholds: Vec<Option<f64>>,
}

/// Per-test value/threshold series over all comparable outcomes. A test with
/// only non-comparable outcomes still gets an (empty) entry.
pub fn extract_test_series<O: AsRef<TestOutcome>>(
    document: &BTreeMap<String, Vec<O>>,
) -> BTreeMap<String, TestSeries> {
    let mut map: BTreeMap<String, TestSeries> = BTreeMap::new();

    for (name, outcomes) in document {
        for outcome in outcomes {
            let outcome = outcome.as_ref();
            let series = map.entry(outcome.test_name.clone()).or_default();
            if !outcome.comparable {
                continue;
            }
            series.histograms.push(name.clone());
            series.values.push(outcome.value);
            series.thresholds.push(outcome.threshold);
        }
    }

    map
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueComparison {
    pub test_name: String,
    pub histograms: Vec<String>,
    pub values: [Vec<Option<f64>>; 2],
    pub thresholds: [Vec<Option<f64>>; 2],
}

/// Align the two runs' series per test over the artifacts common to both,
/// in the first run's order. Tests present in only one run are skipped.
pub fn build_value_comparisons(
    first: &BTreeMap<String, TestSeries>,
    second: &BTreeMap<String, TestSeries>,
) -> Vec<ValueComparison> {
    let mut comparisons = Vec::new();

    for (test_name, series_a) in first {
        let Some(series_b) = second.get(test_name) else {
            continue;
        };

        let mut histograms = Vec::new();
        let mut values = [Vec::new(), Vec::new()];
        let mut thresholds = [Vec::new(), Vec::new()];

        for (i, histogram) in series_a.histograms.iter().enumerate() {
            let Some(j) = series_b.histograms.iter().position(|h| h == histogram) else {
                continue;
            };
            histograms.push(histogram.clone());
            values[0].push(series_a.values[i]);
            values[1].push(series_b.values[j]);
            thresholds[0].push(series_a.thresholds[i]);
            thresholds[1].push(series_b.thresholds[j]);
        }

        comparisons.push(ValueComparison {
            test_name: test_name.clone(),
            histograms,
            values,
            thresholds,
        });
    }

    comparisons
}
