use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::info;

use crate::cli::InspectArgs;
use crate::model::RawResultDocument;
use crate::summary::{self, GLOBAL_SUMMARY_FILE, SUMMARY_FILE};
use crate::util::read_json;

pub fn run(args: InspectArgs) -> Result<()> {
    let path = resolve_summary_path(&args.path)?;
    info!(path = %path.display(), "inspecting summary");

    // the global summary's provenance fields deserialize away harmlessly
    let document: RawResultDocument = read_json(&path)?;
    summary::print_severity_counts(&summary::classify(&document));

    Ok(())
}

fn resolve_summary_path(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    if path.is_dir() {
        let global = path.join(GLOBAL_SUMMARY_FILE);
        if global.is_file() {
            return Ok(global);
        }
        let summary = path.join(SUMMARY_FILE);
        if summary.is_file() {
            return Ok(summary);
        }
        bail!(
            "can find neither {} nor {}, nothing to work with",
            global.display(),
            summary.display()
        );
    }

    bail!("no such file or directory: {}", path.display());
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::resolve_summary_path;

    #[test]
    fn directory_resolution_prefers_the_global_summary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Summary.json"), b"{}").unwrap();
        assert_eq!(
            resolve_summary_path(dir.path()).unwrap(),
            dir.path().join("Summary.json")
        );

        fs::write(dir.path().join("SummaryGlobal.json"), b"{}").unwrap();
        assert_eq!(
            resolve_summary_path(dir.path()).unwrap(),
            dir.path().join("SummaryGlobal.json")
        );
    }

    #[test]
    fn missing_summaries_are_a_lookup_failure() {
        let dir = TempDir::new().unwrap();
        assert!(resolve_summary_path(dir.path()).is_err());
        assert!(resolve_summary_path(&dir.path().join("missing")).is_err());
    }
}
