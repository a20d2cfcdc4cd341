//! CLI argument definitions for the aspire build driver.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

#[derive(Parser)]
#[command(
    name = "aspire",
    version,
    about = "Incremental protection pipeline driver",
    long_about = "Run a staged source protection pipeline.\n\n\
                  Stage outputs are named after the annotations they depend on,\n\
                  so unchanged stages are reused across builds."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run every stage of the pipeline.
    Build(BuildArgs),

    /// Show what a build would do without running anything.
    Plan(PlanArgs),

    /// Replace protection directives in a source file with placeholders.
    Extract(ExtractArgs),

    /// Concatenate annotation files.
    Merge(MergeArgs),

    /// Print the annotations a technique filter selects.
    View(ViewArgs),
}

#[derive(Parser)]
pub struct BuildArgs {
    /// Pipeline configuration file.
    #[arg(long = "config", value_name = "TOML", default_value = "aspire.toml")]
    pub config: PathBuf,

    /// Re-run stages even when a complete output folder exists.
    #[arg(long = "force")]
    pub force: bool,

    /// Number of concurrent tool invocations (overrides build.jobs).
    #[arg(long = "jobs", short = 'j', value_name = "N")]
    pub jobs: Option<usize>,

    /// Print the build report as JSON instead of a table.
    #[arg(long = "json")]
    pub json: bool,
}

#[derive(Parser)]
pub struct PlanArgs {
    /// Pipeline configuration file.
    #[arg(long = "config", value_name = "TOML", default_value = "aspire.toml")]
    pub config: PathBuf,

    /// Plan as if no output folder could be reused.
    #[arg(long = "force")]
    pub force: bool,
}

#[derive(Parser)]
pub struct ExtractArgs {
    /// Source file rewritten in place.
    #[arg(value_name = "SOURCE")]
    pub source: PathBuf,

    /// First annotation id to assign.
    #[arg(long = "start-id", value_name = "N", default_value_t = 1)]
    pub start_id: u64,

    /// Where the extracted annotations are written.
    #[arg(long = "json", value_name = "PATH")]
    pub json: PathBuf,
}

#[derive(Parser)]
pub struct MergeArgs {
    /// Annotation files, concatenated in order.
    #[arg(value_name = "INPUT", required = true)]
    pub inputs: Vec<PathBuf>,

    /// Merged annotation file.
    #[arg(long = "output", short = 'o', value_name = "PATH")]
    pub output: PathBuf,
}

#[derive(Parser)]
pub struct ViewArgs {
    /// Annotation file.
    #[arg(value_name = "ANNOTATIONS")]
    pub annotations: PathBuf,

    /// Technique to keep; repeat for several. Keeps every technique when absent.
    #[arg(long = "filter", value_name = "TECHNIQUE")]
    pub filter: Vec<String>,

    /// Drop annotations left without any technique.
    #[arg(long = "filtered-only")]
    pub filtered_only: bool,

    /// Restrict the view to one source file.
    #[arg(long = "file", value_name = "NAME")]
    pub file: Option<String>,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
