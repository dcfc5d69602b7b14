use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "relval",
    version,
    about = "Release-validation comparison orchestration and reporting"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    RelVal(RelValArgs),
    Inspect(InspectArgs),
    Compare(CompareArgs),
    Influx(InfluxArgs),
}

#[derive(Args, Debug, Clone)]
pub struct RelValArgs {
    /// Either a first set of artifact files or a first simulation directory
    #[arg(short = 'i', long, num_args = 1.., required = true)]
    pub input1: Vec<PathBuf>,

    /// Either a second set of artifact files or a second simulation directory
    #[arg(short = 'j', long, num_args = 1.., required = true)]
    pub input2: Vec<PathBuf>,

    #[arg(long, default_value_t = false)]
    pub with_test_chi2: bool,

    #[arg(long, default_value_t = false)]
    pub with_test_bincont: bool,

    #[arg(long, default_value_t = false)]
    pub with_test_numentries: bool,

    #[arg(long, default_value_t = 1.5)]
    pub chi2_threshold: f64,

    #[arg(long, default_value_t = 1.5)]
    pub rel_mean_diff_threshold: f64,

    #[arg(long, default_value_t = 0.01)]
    pub rel_entries_diff_threshold: f64,

    #[arg(long, default_value_t = false)]
    pub select_critical: bool,

    /// Relative divergence above which mutual file sizes are flagged
    #[arg(long, default_value_t = 0.5)]
    pub file_size_threshold: f64,

    #[arg(long, default_value_t = false)]
    pub no_plots: bool,

    /// Seed per-test thresholds from a previous run's summary JSON
    #[arg(long)]
    pub use_values_as_thresholds: Option<PathBuf>,

    /// Directory configuration JSON, required when comparing two directories
    #[arg(long)]
    pub dir_config: Option<PathBuf>,

    /// Only enable these top-level keys of the directory configuration
    #[arg(long = "dir-config-enable", num_args = 0..)]
    pub dir_config_enable: Vec<String>,

    /// Disable these top-level keys (takes precedence over the enable list)
    #[arg(long = "dir-config-disable", num_args = 0..)]
    pub dir_config_disable: Vec<String>,

    /// External comparison executable invoked once per task
    #[arg(long, default_value = "relval-compare")]
    pub comparison_exec: PathBuf,

    /// Hard-kill a comparison task after this many seconds
    #[arg(long)]
    pub task_timeout: Option<u64>,

    #[arg(short, long, default_value = "rel_val")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// A summary JSON file or a run directory expected to contain one
    pub path: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct CompareArgs {
    /// Output directory of the first previous run
    #[arg(short = 'i', long)]
    pub input1: PathBuf,

    /// Output directory of the second previous run
    #[arg(short = 'j', long)]
    pub input2: PathBuf,

    /// Report artifacts whose severity differs between the two runs
    #[arg(long, default_value_t = false)]
    pub difference: bool,

    /// Export value/threshold series of mutual summaries for comparison
    #[arg(long, default_value_t = false)]
    pub compare_values: bool,

    #[arg(short, long, default_value = "rel_val_comparison")]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct InfluxArgs {
    /// Directory where a release validation run was executed
    #[arg(long)]
    pub dir: PathBuf,

    /// Base URL under which the run's plots are published
    #[arg(long)]
    pub web_storage: Option<String>,

    /// Additional tags as key=value pairs
    #[arg(long, num_args = 0..)]
    pub tags: Vec<String>,

    /// Suffix appended to the measurement name
    #[arg(long)]
    pub table_suffix: Option<String>,
}
