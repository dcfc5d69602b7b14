use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{info, warn};

use crate::matcher::find_mutual_files;
use crate::model::{
    DirectoryConfig, GroupRule, MetricField, MetricRule, RunReport, SyntheticHistogram,
    SyntheticHistogramFile, TaskRecord,
};
use crate::runner::{ComparisonRunner, ComparisonTask, TaskStatus};
use crate::util::{absolute_path, ensure_directory, write_json_pretty};

/// Drives the config fan-out and records every task into the run report.
/// Task failures are demoted to warnings; the run proceeds.
pub struct Dispatcher<'a> {
    runner: &'a dyn ComparisonRunner,
}

impl<'a> Dispatcher<'a> {
    pub fn new(runner: &'a dyn ComparisonRunner) -> Self {
        Self { runner }
    }

    /// One task comparing two explicit file sets, used for plain-file input.
    pub fn dispatch_files(
        &self,
        group: &str,
        files1: &[PathBuf],
        files2: &[PathBuf],
        output_dir: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let mut absolute1 = Vec::with_capacity(files1.len());
        for file in files1 {
            absolute1.push(absolute_path(file)?);
        }
        let mut absolute2 = Vec::with_capacity(files2.len());
        for file in files2 {
            absolute2.push(absolute_path(file)?);
        }

        self.run_task(group.to_string(), absolute1, absolute2, output_dir, report);
        Ok(())
    }

    /// Fan out over every enabled config group: resolve the mutual file set
    /// per sub-group and dispatch into `output_root/<group>/<name>`.
    pub fn dispatch_config(
        &self,
        dir1: &Path,
        dir2: &Path,
        config: &DirectoryConfig,
        active_groups: &[String],
        output_root: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let trees = vec![dir1.to_path_buf(), dir2.to_path_buf()];

        for group in active_groups {
            let Some(rules) = config.get(group) else {
                continue;
            };

            for (name, rule) in rules {
                let label = format!("{group}/{name}");
                let output_dir = output_root.join(group).join(name);
                let pattern = match rule {
                    GroupRule::Glob(pattern) => pattern,
                    GroupRule::Metrics(metric_rule) => &metric_rule.pattern,
                };

                let mutual = find_mutual_files(&trees, pattern, None)?;
                if mutual.is_empty() {
                    warn!(group = %label, pattern = %pattern, "nothing found for search pattern");
                    report
                        .warnings
                        .push(format!("no mutual files for pattern {pattern} in group {label}"));
                    continue;
                }

                match rule {
                    GroupRule::Glob(_) => {
                        let files1: Vec<PathBuf> = mutual.iter().map(|f| dir1.join(f)).collect();
                        let files2: Vec<PathBuf> = mutual.iter().map(|f| dir2.join(f)).collect();
                        self.dispatch_files(&label, &files1, &files2, &output_dir, report)?;
                    }
                    GroupRule::Metrics(metric_rule) => {
                        self.dispatch_metric_rule(
                            dir1,
                            dir2,
                            &mutual,
                            metric_rule,
                            &label,
                            &output_dir,
                            report,
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Bucket matched log files, sum the extracted metric fields per side
    /// into synthetic single-bin histogram containers, then dispatch each
    /// bucket as an ordinary task.
    fn dispatch_metric_rule(
        &self,
        dir1: &Path,
        dir2: &Path,
        mutual: &[String],
        rule: &MetricRule,
        label: &str,
        output_dir: &Path,
        report: &mut RunReport,
    ) -> Result<()> {
        let fields = compile_metric_fields(&rule.fields)?;

        for (bucket_name, bucket) in bucket_files(mutual, &rule.combine_patterns) {
            let bucket_label = format!("{label}/{bucket_name}_dir");
            let bucket_dir = output_dir.join(format!("{bucket_name}_dir"));

            let built = build_synthetic_pair(dir1, dir2, &bucket, &fields, &bucket_dir);
            let (file1, file2) = match built {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(group = %bucket_label, error = %err, "failed to build synthetic histograms");
                    report.warnings.push(format!(
                        "failed to build synthetic histograms for {bucket_label}: {err:#}"
                    ));
                    continue;
                }
            };

            self.run_task(bucket_label, vec![file1], vec![file2], &bucket_dir, report);
        }

        Ok(())
    }

    fn run_task(
        &self,
        group: String,
        files1: Vec<PathBuf>,
        files2: Vec<PathBuf>,
        output_dir: &Path,
        report: &mut RunReport,
    ) {
        let files = files1.len();
        let task = ComparisonTask {
            files1,
            files2,
            output_dir: output_dir.to_path_buf(),
        };
        let log_path = task.log_path().display().to_string();
        info!(group = %group, files, "dispatching comparison task");

        let status = match self.runner.run(&task) {
            Ok(status) => status,
            Err(err) => {
                warn!(group = %group, error = %err, "comparison task could not be run");
                report
                    .warnings
                    .push(format!("task {group} could not be run: {err:#}"));
                report.tasks.push(TaskRecord {
                    group,
                    files,
                    status: "spawn-error".to_string(),
                    log_path,
                });
                return;
            }
        };

        match status {
            TaskStatus::Completed => {
                if !task.summary_path().exists() {
                    warn!(group = %group, "comparison completed but produced no Summary.json");
                    report
                        .warnings
                        .push(format!("task {group} produced no Summary.json"));
                }
            }
            TaskStatus::Failed(code) => {
                warn!(group = %group, code = ?code, "comparison exited non-zero, see task log");
                report
                    .warnings
                    .push(format!("task {group} exited non-zero (code {code:?})"));
            }
            TaskStatus::TimedOut => {
                warn!(group = %group, "comparison timed out and was killed");
                report.warnings.push(format!("task {group} timed out"));
            }
        }

        report.tasks.push(TaskRecord {
            group,
            files,
            status: status.as_str().to_string(),
            log_path,
        });
    }
}

/// Top-level config keys that stay active after applying the enable list and
/// then the disable list; disable wins.
pub fn select_groups(config: &DirectoryConfig, enable: &[String], disable: &[String]) -> Vec<String> {
    config
        .keys()
        .filter(|key| enable.is_empty() || enable.contains(key))
        .filter(|key| !disable.contains(key))
        .cloned()
        .collect()
}

/// Group files by combine-pattern substring; without combine patterns every
/// file becomes its own bucket. Buckets that match nothing are dropped.
pub fn bucket_files(files: &[String], combine_patterns: &[String]) -> Vec<(String, Vec<String>)> {
    if combine_patterns.is_empty() {
        return files
            .iter()
            .map(|file| (file.clone(), vec![file.clone()]))
            .collect();
    }

    let mut buckets = Vec::new();
    for pattern in combine_patterns {
        let matched: Vec<String> = files
            .iter()
            .filter(|file| file.contains(pattern.as_str()))
            .cloned()
            .collect();
        if !matched.is_empty() {
            buckets.push((pattern.clone(), matched));
        }
    }
    buckets
}

struct CompiledField {
    name: String,
    regex: Regex,
    field: usize,
}

fn compile_metric_fields(fields: &[MetricField]) -> Result<Vec<CompiledField>> {
    let mut compiled = Vec::with_capacity(fields.len());
    for field in fields {
        compiled.push(CompiledField {
            name: field.name.clone(),
            regex: Regex::new(&field.regex)
                .with_context(|| format!("failed to compile metric regex: {}", field.regex))?,
            field: field.field,
        });
    }
    Ok(compiled)
}

fn build_synthetic_pair(
    dir1: &Path,
    dir2: &Path,
    bucket: &[String],
    fields: &[CompiledField],
    bucket_dir: &Path,
) -> Result<(PathBuf, PathBuf)> {
    ensure_directory(bucket_dir)?;

    let side1: Vec<PathBuf> = bucket.iter().map(|f| dir1.join(f)).collect();
    let side2: Vec<PathBuf> = bucket.iter().map(|f| dir2.join(f)).collect();

    let file1 = bucket_dir.join("file1.json");
    let file2 = bucket_dir.join("file2.json");
    write_json_pretty(
        &file1,
        &SyntheticHistogramFile {
            histograms: sum_metric_fields(&side1, fields)?,
        },
    )?;
    write_json_pretty(
        &file2,
        &SyntheticHistogramFile {
            histograms: sum_metric_fields(&side2, fields)?,
        },
    )?;

    Ok((absolute_path(&file1)?, absolute_path(&file2)?))
}

/// Sum each matched whitespace-separated numeric field over all given log
/// files, one synthetic histogram per declared field name.
fn sum_metric_fields(files: &[PathBuf], fields: &[CompiledField]) -> Result<Vec<SyntheticHistogram>> {
    let mut sums = vec![0.0_f64; fields.len()];
    let mut entries = vec![0_u64; fields.len()];

    for path in files {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        for line in content.lines() {
            for (i, field) in fields.iter().enumerate() {
                if !field.regex.is_match(line) {
                    continue;
                }
                let token = line
                    .split_whitespace()
                    .nth(field.field)
                    .with_context(|| {
                        format!("line has no field {} in {}: {line}", field.field, path.display())
                    })?;
                let value: f64 = token.parse().with_context(|| {
                    format!("non-numeric field {token} in {}: {line}", path.display())
                })?;
                sums[i] += value;
                entries[i] += 1;
            }
        }
    }

    Ok(fields
        .iter()
        .zip(sums.iter().zip(entries.iter()))
        .map(|(field, (sum, count))| SyntheticHistogram {
            name: field.name.clone(),
            entries: *count,
            sum: *sum,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::sync::Mutex;

    use anyhow::Result;
    use tempfile::TempDir;

    use super::{Dispatcher, bucket_files, compile_metric_fields, select_groups, sum_metric_fields};
    use crate::model::{DirectoryConfig, GroupRule, MetricField, RunReport};
    use crate::runner::{ComparisonRunner, ComparisonTask, TaskStatus};

    struct RecordingRunner {
        tasks: Mutex<Vec<ComparisonTask>>,
        status: TaskStatus,
        write_summary: bool,
    }

    impl RecordingRunner {
        fn new(status: TaskStatus, write_summary: bool) -> Self {
            Self {
                tasks: Mutex::new(Vec::new()),
                status,
                write_summary,
            }
        }
    }

    impl ComparisonRunner for RecordingRunner {
        fn run(&self, task: &ComparisonTask) -> Result<TaskStatus> {
            crate::util::ensure_directory(&task.output_dir)?;
            if self.write_summary {
                fs::write(task.summary_path(), b"{}")?;
            }
            self.tasks.lock().unwrap().push(task.clone());
            Ok(self.status)
        }
    }

    fn glob_config(group: &str, name: &str, pattern: &str) -> DirectoryConfig {
        let mut rules = BTreeMap::new();
        rules.insert(name.to_string(), GroupRule::Glob(pattern.to_string()));
        let mut config = BTreeMap::new();
        config.insert(group.to_string(), rules);
        config
    }

    #[test]
    fn disable_takes_precedence_over_enable() {
        let mut config = glob_config("hits", "all", "*.root");
        config.extend(glob_config("kine", "all", "*.root"));
        config.extend(glob_config("qc", "all", "*.root"));

        let enable = vec!["hits".to_string(), "qc".to_string()];
        let disable = vec!["qc".to_string()];
        assert_eq!(select_groups(&config, &enable, &disable), vec!["hits"]);

        assert_eq!(
            select_groups(&config, &[], &[]),
            vec!["hits", "kine", "qc"]
        );
    }

    #[test]
    fn files_bucket_per_file_without_combine_patterns() {
        let files = vec!["tf1/reco.log".to_string(), "tf2/reco.log".to_string()];
        let buckets = bucket_files(&files, &[]);
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].0, "tf1/reco.log");
        assert_eq!(buckets[0].1, vec!["tf1/reco.log".to_string()]);
    }

    #[test]
    fn combine_patterns_merge_matching_files_and_drop_empty_buckets() {
        let files = vec![
            "tf1/reco.log".to_string(),
            "tf2/reco.log".to_string(),
            "digi.log".to_string(),
        ];
        let patterns = vec!["reco".to_string(), "unmatched".to_string()];
        let buckets = bucket_files(&files, &patterns);

        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].0, "reco");
        assert_eq!(
            buckets[0].1,
            vec!["tf1/reco.log".to_string(), "tf2/reco.log".to_string()]
        );
    }

    #[test]
    fn metric_sums_accumulate_over_files_and_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("one.log"),
            "walltime step 1.5\nother line\nwalltime step 2.0\n",
        )
        .unwrap();
        fs::write(dir.path().join("two.log"), "walltime step 3.5\n").unwrap();

        let fields = compile_metric_fields(&[MetricField {
            name: "walltime".to_string(),
            regex: "^walltime".to_string(),
            field: 2,
        }])
        .unwrap();

        let files = vec![dir.path().join("one.log"), dir.path().join("two.log")];
        let histograms = sum_metric_fields(&files, &fields).unwrap();

        assert_eq!(histograms.len(), 1);
        assert_eq!(histograms[0].name, "walltime");
        assert_eq!(histograms[0].entries, 3);
        assert!((histograms[0].sum - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn config_dispatch_creates_one_task_per_sub_group() {
        let tree1 = TempDir::new().unwrap();
        let tree2 = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for tree in [tree1.path(), tree2.path()] {
            fs::create_dir_all(tree.join("sub")).unwrap();
            fs::write(tree.join("sub/hits.root"), b"x").unwrap();
        }

        let config = glob_config("hits", "all", "*.root");
        let runner = RecordingRunner::new(TaskStatus::Completed, true);
        let dispatcher = Dispatcher::new(&runner);
        let mut report = RunReport::new();

        dispatcher
            .dispatch_config(
                tree1.path(),
                tree2.path(),
                &config,
                &["hits".to_string()],
                output.path(),
                &mut report,
            )
            .unwrap();

        let tasks = runner.tasks.lock().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].output_dir, output.path().join("hits").join("all"));
        assert_eq!(tasks[0].files1.len(), 1);
        assert!(tasks[0].files1[0].is_absolute());

        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].group, "hits/all");
        assert_eq!(report.tasks[0].status, "completed");
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn empty_pattern_is_a_warning_not_an_error() {
        let tree1 = TempDir::new().unwrap();
        let tree2 = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        let config = glob_config("hits", "all", "*.root");
        let runner = RecordingRunner::new(TaskStatus::Completed, true);
        let dispatcher = Dispatcher::new(&runner);
        let mut report = RunReport::new();

        dispatcher
            .dispatch_config(
                tree1.path(),
                tree2.path(),
                &config,
                &["hits".to_string()],
                output.path(),
                &mut report,
            )
            .unwrap();

        assert!(runner.tasks.lock().unwrap().is_empty());
        assert!(report.tasks.is_empty());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn missing_summary_after_completion_is_recorded_as_gap() {
        let tree1 = TempDir::new().unwrap();
        let tree2 = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        for tree in [tree1.path(), tree2.path()] {
            fs::write(tree.join("hits.root"), b"x").unwrap();
        }

        let config = glob_config("hits", "all", "*.root");
        let runner = RecordingRunner::new(TaskStatus::Completed, false);
        let dispatcher = Dispatcher::new(&runner);
        let mut report = RunReport::new();

        dispatcher
            .dispatch_config(
                tree1.path(),
                tree2.path(),
                &config,
                &["hits".to_string()],
                output.path(),
                &mut report,
            )
            .unwrap();

        assert_eq!(report.tasks.len(), 1);
        assert_eq!(report.tasks[0].status, "completed");
        assert!(report.warnings[0].contains("no Summary.json"));
    }
}
