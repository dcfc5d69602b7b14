use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::info;

use crate::matcher::find_mutual_files;
use crate::model::SizeReport;

/// Index pairs whose relative size difference exceeds the threshold. The
/// denominator is always the second operand of the pair; that asymmetry is
/// part of the contract.
pub fn exceeding_difference_threshold(sizes: &[u64], threshold: f64) -> Vec<(usize, usize)> {
    let mut flagged = Vec::new();

    for i1 in 0..sizes.len() {
        for i2 in (i1 + 1)..sizes.len() {
            let diff = sizes[i1].abs_diff(sizes[i2]) as f64;
            if diff / sizes[i2] as f64 > threshold {
                flagged.push((i1, i2));
            }
        }
    }

    flagged
}

/// Compare byte sizes of mutual artifact files across the given trees. Every
/// mutual file is echoed to a tabular stdout report; only files with at
/// least one flagged pair enter the returned report.
pub fn audit(trees: &[PathBuf], threshold: f64) -> Result<SizeReport> {
    let mutual = find_mutual_files(trees, "*.root", None)?;
    info!(files = mutual.len(), threshold, "comparing mutual file sizes");

    let mut sizes_per_file: Vec<Vec<u64>> = Vec::with_capacity(mutual.len());
    for file in &mutual {
        let mut sizes = Vec::with_capacity(trees.len());
        for tree in trees {
            let path = tree.join(file);
            let metadata = fs::metadata(&path)
                .with_context(|| format!("failed to stat {}", path.display()))?;
            sizes.push(metadata.len());
        }
        sizes_per_file.push(sizes);
    }

    let mut name_width = mutual.iter().map(String::len).max().unwrap_or(0);
    name_width = name_width.max(4);
    let directories: Vec<String> = trees.iter().map(|t| t.display().to_string()).collect();

    println!("| {} |", directories.join(" | "));

    let mut report = SizeReport {
        directories,
        files: BTreeMap::new(),
        threshold,
    };

    for (file, sizes) in mutual.iter().zip(&sizes_per_file) {
        let mut row = format!("| {file:<name_width$}");
        for size in sizes {
            row.push_str(&format!(" | {size:>12}"));
        }

        let flagged = exceeding_difference_threshold(sizes, threshold);
        if flagged.is_empty() {
            row.push_str(" | OK |");
        } else {
            row.push_str(&format!(
                " |  <==  EXCEEDING threshold of {threshold} at columns {flagged:?} |"
            ));
            report.files.insert(file.clone(), sizes.clone());
        }
        println!("{row}");
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{audit, exceeding_difference_threshold};

    #[test]
    fn boundary_is_strictly_greater_than() {
        // |100 - 200| / 200 == 0.5 exactly: not flagged
        assert!(exceeding_difference_threshold(&[100, 200], 0.5).is_empty());
        // |100 - 201| / 201 > 0.5: flagged
        assert_eq!(
            exceeding_difference_threshold(&[100, 201], 0.5),
            vec![(0, 1)]
        );
    }

    #[test]
    fn denominator_is_always_the_second_operand() {
        // |201 - 100| / 100 = 1.01 flags, while the mirrored pair ratio
        // |100 - 201| / 201 = 0.502 would not flag at this threshold.
        assert_eq!(
            exceeding_difference_threshold(&[201, 100], 0.6),
            vec![(0, 1)]
        );
        assert!(exceeding_difference_threshold(&[100, 201], 0.6).is_empty());
    }

    #[test]
    fn audit_records_only_flagged_files() {
        let tree1 = TempDir::new().unwrap();
        let tree2 = TempDir::new().unwrap();

        fs::write(tree1.path().join("same.root"), vec![0_u8; 100]).unwrap();
        fs::write(tree2.path().join("same.root"), vec![0_u8; 100]).unwrap();
        fs::write(tree1.path().join("diverged.root"), vec![0_u8; 100]).unwrap();
        fs::write(tree2.path().join("diverged.root"), vec![0_u8; 201]).unwrap();

        let trees = vec![tree1.path().to_path_buf(), tree2.path().to_path_buf()];
        let report = audit(&trees, 0.5).unwrap();

        assert_eq!(report.threshold, 0.5);
        assert_eq!(report.files.len(), 1);
        assert_eq!(report.files["diverged.root"], vec![100, 201]);
    }
}
