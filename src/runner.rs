use std::fs::File;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::info;

/// Unit of dispatch: two index-aligned absolute file lists and an output
/// directory owned exclusively by this task.
#[derive(Debug, Clone)]
pub struct ComparisonTask {
    pub files1: Vec<PathBuf>,
    pub files2: Vec<PathBuf>,
    pub output_dir: PathBuf,
}

impl ComparisonTask {
    pub fn log_path(&self) -> PathBuf {
        self.output_dir.join("rel_val.log")
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("Summary.json")
    }
}

/// All run parameters the comparison routine consumes. Constructed once from
/// CLI arguments; nothing is read from the process environment.
#[derive(Debug, Clone)]
pub struct RelValSettings {
    pub test_mask: u8,
    pub chi2_threshold: f64,
    pub rel_mean_diff_threshold: f64,
    pub rel_entries_diff_threshold: f64,
    pub select_critical: bool,
    pub no_plots: bool,
    pub thresholds_file: Option<PathBuf>,
    pub task_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Failed(Option<i32>),
    TimedOut,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed-out",
        }
    }
}

/// Capability for running one comparison task. The production implementation
/// shells out; tests substitute their own.
pub trait ComparisonRunner {
    fn run(&self, task: &ComparisonTask) -> Result<TaskStatus>;
}

/// Invokes the external comparison executable once per task, captures
/// combined stdout/stderr to `rel_val.log` in the task's output directory
/// and never treats a non-zero exit as fatal.
pub struct SubprocessRunner {
    executable: PathBuf,
    settings: RelValSettings,
}

impl SubprocessRunner {
    pub fn new(executable: PathBuf, settings: RelValSettings) -> Self {
        Self {
            executable,
            settings,
        }
    }
}

impl ComparisonRunner for SubprocessRunner {
    fn run(&self, task: &ComparisonTask) -> Result<TaskStatus> {
        crate::util::ensure_directory(&task.output_dir)?;

        let log_path = task.log_path();
        let log_file = File::create(&log_path)
            .with_context(|| format!("failed to create log file: {}", log_path.display()))?;
        let log_for_stderr = log_file
            .try_clone()
            .with_context(|| format!("failed to clone log handle: {}", log_path.display()))?;

        let args = build_comparison_args(task, &self.settings)?;
        info!(
            executable = %self.executable.display(),
            log = %log_path.display(),
            "running comparison"
        );

        let mut child = Command::new(&self.executable)
            .args(&args)
            .current_dir(&task.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(log_for_stderr))
            .spawn()
            .with_context(|| format!("failed to spawn {}", self.executable.display()))?;

        let status = match self.settings.task_timeout {
            Some(timeout) => wait_with_timeout(&mut child, timeout)?,
            None => Some(child.wait().context("failed to wait for comparison process")?),
        };

        match status {
            None => Ok(TaskStatus::TimedOut),
            Some(status) if status.success() => Ok(TaskStatus::Completed),
            Some(status) => Ok(TaskStatus::Failed(status.code())),
        }
    }
}

/// Argument layout consumed by the comparison executable: the two
/// comma-joined path lists, the test bitmask, the three thresholds, the two
/// boolean flags and optionally a prior-threshold file.
pub fn build_comparison_args(task: &ComparisonTask, settings: &RelValSettings) -> Result<Vec<String>> {
    let mut args = vec![
        join_paths(&task.files1)?,
        join_paths(&task.files2)?,
        settings.test_mask.to_string(),
        settings.chi2_threshold.to_string(),
        settings.rel_mean_diff_threshold.to_string(),
        settings.rel_entries_diff_threshold.to_string(),
        bool_flag(settings.select_critical),
        bool_flag(settings.no_plots),
    ];

    if let Some(thresholds) = &settings.thresholds_file {
        args.push(
            thresholds
                .to_str()
                .with_context(|| format!("invalid UTF-8 path: {}", thresholds.display()))?
                .to_string(),
        );
    }

    Ok(args)
}

fn bool_flag(value: bool) -> String {
    if value { "true" } else { "false" }.to_string()
}

fn join_paths(paths: &[PathBuf]) -> Result<String> {
    let mut joined = Vec::with_capacity(paths.len());
    for path in paths {
        joined.push(
            path.to_str()
                .with_context(|| format!("invalid UTF-8 path: {}", path.display()))?,
        );
    }
    Ok(joined.join(","))
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    let deadline = Instant::now() + timeout;

    loop {
        if let Some(status) = child
            .try_wait()
            .context("failed to poll comparison process")?
        {
            return Ok(Some(status));
        }

        if Instant::now() >= deadline {
            child
                .kill()
                .context("failed to kill timed-out comparison process")?;
            child
                .wait()
                .context("failed to reap timed-out comparison process")?;
            return Ok(None);
        }

        thread::sleep(Duration::from_millis(50));
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::process::Command;
    use std::time::Duration;

    use super::{ComparisonTask, RelValSettings, build_comparison_args, wait_with_timeout};

    fn settings() -> RelValSettings {
        RelValSettings {
            test_mask: 7,
            chi2_threshold: 1.5,
            rel_mean_diff_threshold: 1.5,
            rel_entries_diff_threshold: 0.01,
            select_critical: false,
            no_plots: true,
            thresholds_file: None,
            task_timeout: None,
        }
    }

    #[test]
    fn comparison_args_join_paths_and_encode_flags() {
        let task = ComparisonTask {
            files1: vec![PathBuf::from("/a/x.root"), PathBuf::from("/a/y.root")],
            files2: vec![PathBuf::from("/b/x.root"), PathBuf::from("/b/y.root")],
            output_dir: PathBuf::from("/out"),
        };

        let args = build_comparison_args(&task, &settings()).unwrap();
        assert_eq!(
            args,
            vec![
                "/a/x.root,/a/y.root",
                "/b/x.root,/b/y.root",
                "7",
                "1.5",
                "1.5",
                "0.01",
                "false",
                "true",
            ]
        );
    }

    #[test]
    fn threshold_file_is_appended_when_present() {
        let task = ComparisonTask {
            files1: vec![PathBuf::from("/a/x.root")],
            files2: vec![PathBuf::from("/b/x.root")],
            output_dir: PathBuf::from("/out"),
        };
        let mut settings = settings();
        settings.thresholds_file = Some(PathBuf::from("/out/use_thresholds.dat"));

        let args = build_comparison_args(&task, &settings).unwrap();
        assert_eq!(args.last().map(String::as_str), Some("/out/use_thresholds.dat"));
        assert_eq!(args.len(), 9);
    }

    #[test]
    fn wait_with_timeout_reaps_fast_processes() {
        let mut child = Command::new("true").spawn().unwrap();
        let status = wait_with_timeout(&mut child, Duration::from_secs(5)).unwrap();
        assert!(status.is_some_and(|s| s.success()));
    }

    #[test]
    fn wait_with_timeout_kills_hanging_processes() {
        let mut child = Command::new("sleep").arg("10").spawn().unwrap();
        let status = wait_with_timeout(&mut child, Duration::from_millis(100)).unwrap();
        assert!(status.is_none());
    }
}
