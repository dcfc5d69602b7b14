use anyhow::{Result, bail};
use tracing::info;

use crate::cli::CompareArgs;
use crate::matcher::find_mutual_files;
use crate::model::RawResultDocument;
use crate::summary::{
    self, GLOBAL_SUMMARY_FILE, SUMMARY_FILE, build_value_comparisons, extract_test_series,
};
use crate::util::{read_json, write_json_pretty};

pub fn run(args: CompareArgs) -> Result<()> {
    let mut difference = args.difference;
    let mut compare_values = args.compare_values;
    if !difference && !compare_values {
        difference = true;
        compare_values = true;
    }

    if compare_values {
        export_value_comparisons(&args)?;
    }

    if difference {
        print_severity_differences(&args)?;
    }

    Ok(())
}

/// For every per-task summary present in both runs, export the
/// value/threshold series of their common artifacts per test.
fn export_value_comparisons(args: &CompareArgs) -> Result<()> {
    let trees = vec![args.input1.clone(), args.input2.clone()];
    let mutual = find_mutual_files(&trees, SUMMARY_FILE, None)?;

    for relative in mutual {
        let first: RawResultDocument = read_json(&args.input1.join(&relative))?;
        let second: RawResultDocument = read_json(&args.input2.join(&relative))?;
        let comparisons =
            build_value_comparisons(&extract_test_series(&first), &extract_test_series(&second));

        let out_dir = args.output.join(format!("{}_dir", relative.replace('/', "_")));
        let out_path = out_dir.join("value_comparison.json");
        write_json_pretty(&out_path, &comparisons)?;
        info!(path = %out_path.display(), tests = comparisons.len(), "wrote value comparison");
    }

    Ok(())
}

fn print_severity_differences(args: &CompareArgs) -> Result<()> {
    let mut classified = Vec::with_capacity(2);
    for input in [&args.input1, &args.input2] {
        let path = input.join(GLOBAL_SUMMARY_FILE);
        if !path.is_file() {
            bail!("cannot find expected {}", path.display());
        }
        let document: RawResultDocument = read_json(&path)?;
        let buckets = summary::classify(&document);
        summary::print_severity_counts(&buckets);
        classified.push(buckets);
    }

    println!("Artifacts with different severities between the two runs");
    for diff in summary::diff_classified(&classified[0], &classified[1]) {
        println!("==> SEVERITY {} <==", diff.severity);
        for (index, only) in [&diff.only_first, &diff.only_second].into_iter().enumerate() {
            println!("RUN {} ({} differing)", index + 1, only.len());
            for name in only {
                println!("  {name}");
            }
        }
    }

    Ok(())
}
