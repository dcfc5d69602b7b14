use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use regex::Regex;

/// Compile a glob pattern to an anchored regex over tree-relative paths.
/// `*` and `?` never cross a separator; `**/` matches any depth including
/// none. Patterns are implicitly allowed to match at any depth, mirroring a
/// recursive `**/<pattern>` glob.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let mut expression = String::from("^(?:.*/)?");
    translate_glob(pattern, &mut expression);
    expression.push('$');

    Regex::new(&expression)
        .with_context(|| format!("failed to compile glob pattern: {pattern}"))
}

fn translate_glob(pattern: &str, out: &mut String) {
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                if chars.get(i + 2) == Some(&'/') {
                    out.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    out.push_str(".*");
                    i += 2;
                }
            }
            '*' => {
                out.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                out.push_str("[^/]");
                i += 1;
            }
            other => {
                out.push_str(&regex::escape(&other.to_string()));
                i += 1;
            }
        }
    }
}

/// Whether a path looks like a simulation output directory: it must contain
/// at least one `pipeline*` entry.
pub fn is_sim_dir(path: &Path) -> bool {
    let Ok(entries) = fs::read_dir(path) else {
        return false;
    };

    entries
        .flatten()
        .any(|entry| entry.file_name().to_string_lossy().starts_with("pipeline"))
}

/// Find the files matching `pattern` in every given tree, as sorted
/// tree-relative paths. Optional `grep` substrings narrow the intersection
/// with OR semantics; matches are de-duplicated. An empty result is not an
/// error.
pub fn find_mutual_files(
    trees: &[PathBuf],
    pattern: &str,
    grep: Option<&[String]>,
) -> Result<Vec<String>> {
    let matcher = glob_to_regex(pattern)?;

    let mut per_tree: Vec<BTreeSet<String>> = Vec::with_capacity(trees.len());
    for tree in trees {
        let mut found = Vec::new();
        collect_files(tree, tree, &mut found)?;
        per_tree.push(
            found
                .into_iter()
                .filter(|path| matcher.is_match(path))
                .collect(),
        );
    }

    let Some((first, rest)) = per_tree.split_first() else {
        return Ok(Vec::new());
    };

    let mut intersection = first.clone();
    for other in rest {
        intersection = intersection.intersection(other).cloned().collect();
    }

    if let Some(grep) = grep {
        if !grep.is_empty() {
            intersection.retain(|path| grep.iter().any(|needle| path.contains(needle.as_str())));
        }
    }

    Ok(intersection.into_iter().collect())
}

fn collect_files(dir: &Path, root: &Path, out: &mut Vec<String>) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }

    let entries = fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let path = entry.path();
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?;

        if file_type.is_dir() {
            collect_files(&path, root, out)?;
        } else if file_type.is_file() {
            let relative = path
                .strip_prefix(root)
                .with_context(|| format!("path escapes tree root: {}", path.display()))?;
            let relative = relative
                .to_str()
                .with_context(|| format!("invalid UTF-8 path: {}", path.display()))?;
            out.push(relative.to_string());
        }
    }

    Ok(())
}
