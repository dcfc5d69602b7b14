use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tracing::{info, warn};

use crate::cli::RelValArgs;
use crate::dispatch::{Dispatcher, select_groups};
use crate::matcher::is_sim_dir;
use crate::model::{DirectoryConfig, RawResultDocument, RunReport};
use crate::runner::{RelValSettings, SubprocessRunner};
use crate::sizes;
use crate::summary::{self, GLOBAL_SUMMARY_FILE};
use crate::util::{absolute_path, ensure_directory, read_json, sha256_file, write_json_pretty};

enum InputMode {
    Files,
    Directories(PathBuf, PathBuf),
}

pub fn run(args: RelValArgs) -> Result<()> {
    ensure_directory(&args.output)?;

    let thresholds_file = match &args.use_values_as_thresholds {
        Some(prior) => Some(write_threshold_seed(prior, &args.output)?),
        None => None,
    };

    let settings = RelValSettings {
        test_mask: test_mask(
            args.with_test_chi2,
            args.with_test_bincont,
            args.with_test_numentries,
        ),
        chi2_threshold: args.chi2_threshold,
        rel_mean_diff_threshold: args.rel_mean_diff_threshold,
        rel_entries_diff_threshold: args.rel_entries_diff_threshold,
        select_critical: args.select_critical,
        no_plots: args.no_plots,
        thresholds_file,
        task_timeout: args.task_timeout.map(Duration::from_secs),
    };

    let runner = SubprocessRunner::new(args.comparison_exec.clone(), settings);
    let dispatcher = Dispatcher::new(&runner);
    let mut report = RunReport::new();

    match detect_input_mode(&args.input1, &args.input2)? {
        InputMode::Files => {
            dispatcher.dispatch_files(".", &args.input1, &args.input2, &args.output, &mut report)?;
        }
        InputMode::Directories(dir1, dir2) => {
            let Some(config_path) = &args.dir_config else {
                bail!("comparing two directories requires --dir-config");
            };

            let size_report =
                sizes::audit(&[dir1.clone(), dir2.clone()], args.file_size_threshold)?;
            write_json_pretty(&args.output.join("file_sizes.json"), &size_report)?;

            let config: DirectoryConfig = read_json(config_path)?;
            report.config_sha256 = Some(sha256_file(config_path)?);

            let active = select_groups(&config, &args.dir_config_enable, &args.dir_config_disable);
            if active.is_empty() {
                warn!("all config groups disabled, nothing to dispatch");
            } else {
                dispatcher.dispatch_config(
                    &dir1,
                    &dir2,
                    &config,
                    &active,
                    &args.output,
                    &mut report,
                )?;
            }
        }
    }

    let (merged, warnings) = summary::aggregate(&args.output)?;
    report.warnings.extend(warnings);
    write_json_pretty(&args.output.join(GLOBAL_SUMMARY_FILE), &merged)?;

    summary::print_severity_counts(&summary::classify(&merged));

    write_json_pretty(&args.output.join("run_report.json"), &report)?;
    info!(
        tasks = report.tasks.len(),
        warnings = report.warnings.len(),
        output = %args.output.display(),
        "release validation finished"
    );

    Ok(())
}

/// Bit 0 chi-squared, bit 1 bin-content, bit 2 num-entries; selecting no
/// test means all of them.
fn test_mask(chi2: bool, bincont: bool, numentries: bool) -> u8 {
    let mask = u8::from(chi2) + 2 * u8::from(bincont) + 4 * u8::from(numentries);
    if mask == 0 { 7 } else { mask }
}

fn detect_input_mode(input1: &[PathBuf], input2: &[PathBuf]) -> Result<InputMode> {
    if is_sim_dir(&input1[0]) && is_sim_dir(&input2[0]) {
        return Ok(InputMode::Directories(input1[0].clone(), input2[0].clone()));
    }

    if input1.iter().chain(input2).all(|path| path.is_file()) {
        return Ok(InputMode::Files);
    }

    bail!("inputs must be either two sets of artifact files or two simulation directories");
}

fn write_threshold_seed(prior_summary: &Path, output: &Path) -> Result<PathBuf> {
    let document: RawResultDocument = read_json(prior_summary)?;
    let path = output.join("use_thresholds.dat");
    std::fs::write(&path, summary::rebuild_thresholds(&document))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "seeded thresholds from previous run");
    absolute_path(&path)
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{InputMode, detect_input_mode, test_mask, write_threshold_seed};

    #[test]
    fn unselected_tests_default_to_all_three() {
        assert_eq!(test_mask(false, false, false), 7);
        assert_eq!(test_mask(true, false, false), 1);
        assert_eq!(test_mask(false, true, true), 6);
        assert_eq!(test_mask(true, true, true), 7);
    }

    #[test]
    fn two_simulation_directories_select_directory_mode() {
        let dir1 = TempDir::new().unwrap();
        let dir2 = TempDir::new().unwrap();
        fs::write(dir1.path().join("pipeline_metrics"), b"").unwrap();
        fs::write(dir2.path().join("pipeline_action"), b"").unwrap();

        let mode = detect_input_mode(
            &[dir1.path().to_path_buf()],
            &[dir2.path().to_path_buf()],
        )
        .unwrap();
        assert!(matches!(mode, InputMode::Directories(_, _)));
    }

    #[test]
    fn plain_files_select_file_mode_and_mixed_input_is_fatal() {
        let dir = TempDir::new().unwrap();
        let file1 = dir.path().join("a.root");
        let file2 = dir.path().join("b.root");
        fs::write(&file1, b"x").unwrap();
        fs::write(&file2, b"y").unwrap();

        let mode = detect_input_mode(&[file1.clone()], &[file2]).unwrap();
        assert!(matches!(mode, InputMode::Files));

        let missing = PathBuf::from("/nonexistent/artifact.root");
        assert!(detect_input_mode(&[file1], &[missing]).is_err());
    }

    #[test]
    fn threshold_seed_contains_only_comparable_values() {
        let dir = TempDir::new().unwrap();
        let prior = dir.path().join("SummaryGlobal.json");
        fs::write(
            &prior,
            r#"{"H1":[
                {"test_name":"chi2","result":"GOOD","comparable":true,"value":1.2},
                {"test_name":"bincont","result":"GOOD","comparable":false}
            ]}"#,
        )
        .unwrap();

        let seed = write_threshold_seed(&prior, dir.path()).unwrap();
        assert_eq!(fs::read_to_string(seed).unwrap(), "H1,chi2,1.2\n");
    }
}
