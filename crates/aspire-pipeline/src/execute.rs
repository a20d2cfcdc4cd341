//! Stage execution.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use aspire_annotate::{ReconcileReport, reconcile};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, info_span};

use crate::alias::{self, AliasOutcome};
use crate::context::BuildContext;
use crate::error::{PipelineError, Result, StageFailure};
use crate::plan::{
    COMPLETION_STAMP, Disposition, RECONCILED_STAMP, StagePlan, is_hidden, plan, work_items,
};
use crate::runner::ToolRunner;
use crate::stage::{StageDescriptor, ToolSpec};

/// What happened to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    pub name: String,
    pub disposition: Disposition,
    pub suffix: String,
    pub input_dir: PathBuf,
    pub working_dir: PathBuf,
    /// Folder actually written, empty for skipped stages.
    pub output_dir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconcile: Option<ReconcileReport>,
    pub work_items: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub stages: Vec<StageReport>,
}

impl BuildReport {
    pub fn count(&self, disposition: Disposition) -> usize {
        self.stages
            .iter()
            .filter(|stage| stage.disposition == disposition)
            .count()
    }
}

/// Run every stage in order and stop at the first failure.
///
/// Tool invocations of a stage run on a pool of `ctx.jobs()` threads.
pub fn execute(ctx: &BuildContext, runner: &dyn ToolRunner) -> Result<BuildReport> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(ctx.jobs())
        .build()?;
    let build_plan = plan(ctx);

    let mut report = BuildReport::default();
    // Stages whose outputs were written during this build.
    let mut rebuilt: BTreeSet<&str> = BTreeSet::new();
    for (stage, stage_plan) in ctx.config.stages.iter().zip(&build_plan.stages) {
        let span = info_span!("stage", stage = %stage.name);
        let _guard = span.enter();
        let started = Instant::now();
        let mut stage_report = StageReport {
            name: stage_plan.name.clone(),
            disposition: stage_plan.disposition,
            suffix: stage_plan.suffix.clone(),
            input_dir: stage_plan.input_dir.clone(),
            working_dir: stage_plan.working_dir.clone(),
            output_dir: stage_plan
                .primary_output()
                .map(|output| output.actual.clone())
                .unwrap_or_default(),
            reconcile: None,
            work_items: 0,
            duration_ms: 0,
        };
        // Source folders carry no stamp, so they always count as fresh.
        let input_rebuilt = stage_plan
            .upstream
            .as_deref()
            .is_none_or(|upstream| rebuilt.contains(upstream));
        let stage_run = StageRun {
            ctx,
            pool: &pool,
            runner,
            stage,
            plan: stage_plan,
            input_rebuilt,
        };
        stage_run
            .run(&mut stage_report)
            .map_err(|source| PipelineError::stage(&stage.name, source))?;
        if matches!(
            stage_plan.disposition,
            Disposition::Execute | Disposition::Traverse
        ) {
            rebuilt.insert(stage.name.as_str());
        }
        stage_report.duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            suffix = %stage_report.suffix,
            disposition = %stage_report.disposition,
            rewrites = stage_report.reconcile.as_ref().map_or(0, ReconcileReport::rewrites),
            work_items = stage_report.work_items,
            duration_ms = stage_report.duration_ms,
            "stage finished"
        );
        report.stages.push(stage_report);
    }
    Ok(report)
}

struct StageRun<'a> {
    ctx: &'a BuildContext,
    pool: &'a rayon::ThreadPool,
    runner: &'a dyn ToolRunner,
    stage: &'a StageDescriptor,
    plan: &'a StagePlan,
    /// The input folder was written earlier in this build.
    input_rebuilt: bool,
}

impl StageRun<'_> {
    fn run(&self, report: &mut StageReport) -> std::result::Result<(), StageFailure> {
        let stage_plan = self.plan;
        match stage_plan.disposition {
            Disposition::Skip => {
                debug!("stage excluded");
                return Ok(());
            }
            Disposition::Reuse => {
                debug!(output = %report.output_dir.display(), "reusing complete output");
                return publish_outputs(stage_plan);
            }
            Disposition::Traverse | Disposition::Execute => {}
        }

        if !stage_plan.input_dir.is_dir() {
            return Err(StageFailure::io(
                &stage_plan.input_dir,
                io::Error::new(io::ErrorKind::NotFound, "input folder does not exist"),
            ));
        }
        for output in &stage_plan.outputs {
            reset_dir(&output.actual)?;
        }

        if stage_plan.disposition == Disposition::Traverse {
            if let Some(primary) = stage_plan.primary_output() {
                copy_tree(&stage_plan.input_dir, &primary.actual)?;
            }
        } else {
            if stage_plan.annotate {
                report.reconcile = Some(self.annotate()?);
            }
            if let Some(tool) = &self.stage.tool {
                report.work_items = self.run_tool(tool)?;
            }
        }

        if let Some(primary) = stage_plan.primary_output() {
            let stamp = primary.actual.join(COMPLETION_STAMP);
            fs::write(&stamp, &stage_plan.suffix)
                .map_err(|source| StageFailure::io(&stamp, source))?;
        }
        publish_outputs(stage_plan)
    }

    /// Reconcile annotations in the working copy.
    ///
    /// A previous copy is kept only with caching active, when its input was
    /// not rebuilt in this build and its last reconciliation completed after
    /// the input was finished.
    fn annotate(&self) -> std::result::Result<ReconcileReport, StageFailure> {
        let working = &self.plan.working_dir;
        let stamp = working.join(RECONCILED_STAMP);
        let input_stamp = self.plan.input_dir.join(COMPLETION_STAMP);
        let up_to_date = matches!(
            (modified(&input_stamp), modified(&stamp)),
            (Some(input), Some(reconciled)) if input <= reconciled
        );
        let reusable = self.ctx.config.caching_active()
            && !self.ctx.options.force
            && !self.input_rebuilt
            && up_to_date;
        if reusable {
            fs::remove_file(&stamp).map_err(|source| StageFailure::io(&stamp, source))?;
            debug!(working = %working.display(), "reusing working copy");
        } else {
            create_working_copy(&self.plan.input_dir, working)?;
        }
        let options = self.stage.reconcile_options();
        let reconciled = self
            .pool
            .install(|| reconcile(working, &self.ctx.annotations, &options))?;
        fs::write(&stamp, &self.plan.suffix).map_err(|source| StageFailure::io(&stamp, source))?;
        Ok(reconciled)
    }

    /// Run every work item on the pool; the first failure in input order wins.
    fn run_tool(&self, tool: &ToolSpec) -> std::result::Result<usize, StageFailure> {
        let items = work_items(self.plan, tool, &self.stage.extensions)
            .map_err(|source| StageFailure::io(&self.plan.working_dir, source))?;
        let runner = self.runner;
        let results: Vec<_> = self.pool.install(|| {
            items
                .par_iter()
                .map(|item| runner.run(item, tool.timeout))
                .collect()
        });
        for (item, result) in items.iter().zip(results) {
            result.map_err(|source| StageFailure::Tool {
                input: item.input.clone(),
                source,
            })?;
        }
        Ok(items.len())
    }
}

fn publish_outputs(stage_plan: &StagePlan) -> std::result::Result<(), StageFailure> {
    for output in &stage_plan.outputs {
        let outcome = alias::publish(&output.canonical, &output.actual)
            .map_err(|source| StageFailure::io(&output.canonical, source))?;
        if outcome == AliasOutcome::Linked {
            debug!(alias = %output.canonical.display(), "alias updated");
        }
    }
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|meta| meta.modified()).ok()
}

/// Replace whatever sits at `dir` with an empty folder.
fn reset_dir(dir: &Path) -> std::result::Result<(), StageFailure> {
    let io_err = |source| StageFailure::io(dir, source);
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.file_type().is_symlink() => alias::remove_link(dir).map_err(io_err)?,
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(dir).map_err(io_err)?,
        Ok(_) => fs::remove_file(dir).map_err(io_err)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(io_err(e)),
    }
    fs::create_dir_all(dir).map_err(io_err)
}

/// Replace `working` with a fresh copy of `input`.
///
/// The copy is assembled next to its final name and renamed into place, so
/// an interrupted build never leaves a half-populated working folder.
fn create_working_copy(input: &Path, working: &Path) -> std::result::Result<(), StageFailure> {
    let mut partial = working.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);
    for stale in [partial.as_path(), working] {
        if stale.exists() {
            fs::remove_dir_all(stale).map_err(|source| StageFailure::io(stale, source))?;
        }
    }
    fs::create_dir_all(&partial).map_err(|source| StageFailure::io(&partial, source))?;
    copy_tree(input, &partial)?;
    fs::rename(&partial, working).map_err(|source| StageFailure::io(working, source))?;
    debug!(working = %working.display(), "created working copy");
    Ok(())
}

/// Recursively copy visible files of `from` into the existing folder `to`.
pub fn copy_tree(from: &Path, to: &Path) -> std::result::Result<(), StageFailure> {
    let entries = fs::read_dir(from).map_err(|source| StageFailure::io(from, source))?;
    for entry in entries {
        let entry = entry.map_err(|source| StageFailure::io(from, source))?;
        let source_path = entry.path();
        if is_hidden(&source_path) {
            continue;
        }
        let target = to.join(entry.file_name());
        // Follows links so aliased upstream folders copy their contents.
        if source_path.is_dir() {
            fs::create_dir_all(&target).map_err(|source| StageFailure::io(&target, source))?;
            copy_tree(&source_path, &target)?;
        } else {
            fs::copy(&source_path, &target).map_err(|source| StageFailure::io(&target, source))?;
        }
    }
    Ok(())
}
