//! aspire build driver.

use std::io::{self, IsTerminal};

use clap::{ColorChoice, Parser};
use tracing::level_filters::LevelFilter;

use aspire_cli::cli::{Cli, Command, LogFormatArg, LogLevelArg};
use aspire_cli::commands::{run_build, run_extract, run_merge, run_plan, run_view};
use aspire_cli::logging::{LogConfig, LogFormat, init_logging};

mod summary;

use crate::summary::{print_build_summary, print_plan};

fn main() {
    let cli = Cli::parse();
    cli.color.write_global();
    let log_config = log_config_from_cli(&cli);
    if let Err(error) = init_logging(&log_config) {
        eprintln!("error: failed to initialize logging: {error}");
        std::process::exit(1);
    }
    let result = match &cli.command {
        Command::Build(args) => run_build(args).and_then(|report| {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_build_summary(&report);
            }
            Ok(())
        }),
        Command::Plan(args) => run_plan(args).map(|plan| print_plan(&plan)),
        Command::Extract(args) => run_extract(args).map(|extraction| {
            println!(
                "Extracted {} annotation(s); next id {}",
                extraction.annotations.len(),
                extraction.next_id
            );
        }),
        Command::Merge(args) => run_merge(args).map(|merged| {
            println!("Merged {} annotation(s) into {}", merged.len(), args.output.display());
        }),
        Command::View(args) => run_view(args).map(|json| println!("{json}")),
    };
    let exit_code = match result {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    };
    std::process::exit(exit_code);
}

/// Build logging configuration from CLI flags with consistent precedence.
fn log_config_from_cli(cli: &Cli) -> LogConfig {
    let mut config = LogConfig {
        level_filter: cli.verbosity.tracing_level_filter(),
        ..LogConfig::default()
    };
    config.use_env_filter = !(cli.verbosity.is_present() || cli.log_level.is_some());
    if let Some(level) = cli.log_level {
        config.level_filter = match level {
            LogLevelArg::Error => LevelFilter::ERROR,
            LogLevelArg::Warn => LevelFilter::WARN,
            LogLevelArg::Info => LevelFilter::INFO,
            LogLevelArg::Debug => LevelFilter::DEBUG,
            LogLevelArg::Trace => LevelFilter::TRACE,
        };
    }
    config.format = match cli.log_format {
        LogFormatArg::Pretty => LogFormat::Pretty,
        LogFormatArg::Compact => LogFormat::Compact,
        LogFormatArg::Json => LogFormat::Json,
    };
    config.log_file = cli.log_file.clone();
    config.with_ansi = match cli.color.color {
        ColorChoice::Always => true,
        ColorChoice::Never => false,
        ColorChoice::Auto => cli.log_file.is_none() && io::stderr().is_terminal(),
    };
    config
}
