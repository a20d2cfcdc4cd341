use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, info_span};

use aspire_annotate::{AnnotationSet, Extraction, extract_file, merge_files};
use aspire_pipeline::{
    BuildContext, BuildOptions, BuildPlan, BuildReport, PipelineConfig, ProcessRunner, execute,
    plan,
};

use crate::cli::{BuildArgs, ExtractArgs, MergeArgs, PlanArgs, ViewArgs};

pub fn run_build(args: &BuildArgs) -> Result<BuildReport> {
    let span = info_span!("build", config = %args.config.display());
    let _guard = span.enter();
    let started = Instant::now();
    let options = BuildOptions {
        force: args.force,
        jobs: args.jobs,
    };
    let ctx = load_context(args.config.as_path(), options)?;
    let report = execute(&ctx, &ProcessRunner).context("build failed")?;
    info!(
        stages = report.stages.len(),
        duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "build finished"
    );
    Ok(report)
}

pub fn run_plan(args: &PlanArgs) -> Result<BuildPlan> {
    let options = BuildOptions {
        force: args.force,
        jobs: None,
    };
    let ctx = load_context(args.config.as_path(), options)?;
    Ok(plan(&ctx))
}

pub fn run_extract(args: &ExtractArgs) -> Result<Extraction> {
    extract_file(&args.source, args.start_id, &args.json)
        .with_context(|| format!("extract annotations from {}", args.source.display()))
}

pub fn run_merge(args: &MergeArgs) -> Result<AnnotationSet> {
    merge_files(&args.inputs, &args.output)
        .with_context(|| format!("merge annotations into {}", args.output.display()))
}

/// The filtered view as pretty JSON.
pub fn run_view(args: &ViewArgs) -> Result<String> {
    let set = AnnotationSet::load(&args.annotations).context("load annotations")?;
    let view = match &args.file {
        Some(file) => set.filtered_view_for_file(file, &args.filter, args.filtered_only),
        None => set.filtered_view(&args.filter, args.filtered_only),
    };
    serde_json::to_string_pretty(&view).context("serialize view")
}

fn load_context(path: &std::path::Path, options: BuildOptions) -> Result<BuildContext> {
    let config = PipelineConfig::load(path).context("load pipeline config")?;
    BuildContext::new(config, options).context("prepare build")
}
