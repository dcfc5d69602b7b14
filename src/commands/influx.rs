use std::fs;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::cli::InfluxArgs;
use crate::model::GlobalSummary;
use crate::summary::GLOBAL_SUMMARY_FILE;
use crate::util::read_json;

const TABLE_NAME: &str = "ReleaseValidation";

pub fn run(args: InfluxArgs) -> Result<()> {
    let summary_path = args.dir.join(GLOBAL_SUMMARY_FILE);
    if !summary_path.is_file() {
        bail!("cannot find expected summary {}", summary_path.display());
    }

    let summary: GlobalSummary = read_json(&summary_path)?;
    let lines = build_lines(
        &summary,
        args.table_suffix.as_deref(),
        &args.tags,
        args.web_storage.as_deref(),
    )?;

    let out_path = args.dir.join("influxDB.dat");
    let mut content = lines.join("\n");
    if !content.is_empty() {
        content.push('\n');
    }
    fs::write(&out_path, content)
        .with_context(|| format!("failed to write {}", out_path.display()))?;
    info!(path = %out_path.display(), lines = lines.len(), "wrote metrics export");

    Ok(())
}

/// One line-protocol row per artifact: measurement plus user tags plus type
/// provenance as tags, the artifact name and per-test severity ranks as
/// fields.
fn build_lines(
    summary: &GlobalSummary,
    table_suffix: Option<&str>,
    tags: &[String],
    web_storage: Option<&str>,
) -> Result<Vec<String>> {
    let mut row_tags = match table_suffix {
        Some(suffix) => format!("{TABLE_NAME}_{suffix}"),
        None => TABLE_NAME.to_string(),
    };
    for tag in tags {
        let (key, value) = parse_tag(tag)?;
        row_tags.push_str(&format!(",{key}={value}"));
    }

    let mut lines = Vec::new();
    for (index, (name, tests)) in summary.iter().enumerate() {
        let Some(first) = tests.first() else {
            continue;
        };

        let mut line = format!(
            "{row_tags},type_global={},type_specific={},id={index}",
            first.type_global, first.type_specific
        );
        if let Some(base) = web_storage {
            line.push_str(&format!(
                ",web_storage={}/{}",
                base.trim_end_matches('/'),
                first.rel_path_plot
            ));
        }
        line.push_str(&format!(" histogram_name=\"{name}\""));
        for test in tests {
            line.push_str(&format!(
                ",{}={}",
                test.outcome.test_name,
                test.outcome.result.rank()
            ));
        }
        lines.push(line);
    }

    Ok(lines)
}

fn parse_tag(tag: &str) -> Result<(String, String)> {
    let parts: Vec<&str> = tag.split('=').collect();
    if parts.len() != 2 {
        bail!("invalid tag format: {tag}, expected key=value");
    }

    let key = parts[0].trim();
    let value = parts[1].trim();
    if key.is_empty() || value.is_empty() {
        bail!("invalid tag format: {tag}, expected key=value");
    }

    Ok((key.to_string(), value.to_string()))
}
