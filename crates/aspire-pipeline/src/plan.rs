//! Stage planning.
//!
//! For each stage, resolves where it reads from, where it rewrites
//! annotations, where it writes, and whether it runs at all. Planning only
//! reads the filesystem to find reusable outputs.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::Serialize;

use crate::context::BuildContext;
use crate::stage::{StageDescriptor, StageInput, ToolSpec};

/// Stamp marking a stage output folder as complete.
pub const COMPLETION_STAMP: &str = ".stage-complete";

/// Stamp marking a working copy whose annotations were fully reconciled.
pub const RECONCILED_STAMP: &str = ".reconciled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Disposition {
    /// Excluded by configuration; no output folder.
    Skip,
    /// Inputs copied to the output unchanged.
    Traverse,
    /// Annotations applied and the tool invoked.
    Execute,
    /// A complete output folder under the same name already exists.
    Reuse,
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Skip => "skip",
            Self::Traverse => "traverse",
            Self::Execute => "execute",
            Self::Reuse => "reuse",
        };
        f.write_str(label)
    }
}

/// One output folder: the name consumers use and the folder actually written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageOutput {
    pub canonical: PathBuf,
    pub actual: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagePlan {
    pub name: String,
    pub disposition: Disposition,
    pub suffix: String,
    pub input_dir: PathBuf,
    /// Stage producing `input_dir`, after walking back over skipped stages.
    /// `None` when the input is a source folder.
    pub upstream: Option<String>,
    /// Folder the tool reads; differs from `input_dir` when annotations are
    /// applied to a private copy.
    pub working_dir: PathBuf,
    /// Whether annotations are reconciled in `working_dir` before the tool runs.
    pub annotate: bool,
    pub outputs: Vec<StageOutput>,
}

impl StagePlan {
    pub fn primary_output(&self) -> Option<&StageOutput> {
        self.outputs.first()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildPlan {
    pub stages: Vec<StagePlan>,
}

/// A single tool invocation handed to a [`crate::runner::ToolRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub stage: String,
    pub program: String,
    pub args: Vec<String>,
    pub input: PathBuf,
    /// Files the invocation must leave behind.
    pub expected_outputs: Vec<PathBuf>,
}

/// Plan every stage in declaration order.
pub fn plan(ctx: &BuildContext) -> BuildPlan {
    let root = &ctx.config.root;
    let stages = ctx
        .config
        .stages
        .iter()
        .map(|stage| plan_stage(ctx, root, stage))
        .collect();
    BuildPlan { stages }
}

fn plan_stage(ctx: &BuildContext, root: &Path, stage: &StageDescriptor) -> StagePlan {
    let suffix = ctx.suffix(&stage.name);
    let input = resolve_input(ctx, root, &stage.input);
    let outputs: Vec<StageOutput> = stage
        .outputs
        .iter()
        .map(|name| StageOutput {
            canonical: root.join(name),
            actual: root.join(format!("{name}{suffix}")),
        })
        .collect();

    let annotate = !stage.excluded
        && !stage.traverse
        && !stage.filter.is_empty()
        && ctx.applies_annotations()
        && !ctx
            .annotations
            .filtered_view(&stage.filter, true)
            .is_empty();
    let working_dir = if annotate {
        root.join(format!("{}.{}{suffix}", input.name, stage.name))
    } else {
        input.dir.clone()
    };

    let disposition = if stage.excluded {
        Disposition::Skip
    } else if stage.traverse {
        Disposition::Traverse
    } else if ctx.config.caching_active()
        && !ctx.options.force
        && is_complete(&outputs, ctx.config_modified)
    {
        Disposition::Reuse
    } else {
        Disposition::Execute
    };

    StagePlan {
        name: stage.name.clone(),
        disposition,
        suffix,
        input_dir: input.dir,
        upstream: input.stage,
        working_dir,
        annotate,
        outputs: if stage.excluded { Vec::new() } else { outputs },
    }
}

struct ResolvedInput {
    /// Folder name used to derive working copy names.
    name: String,
    dir: PathBuf,
    stage: Option<String>,
}

/// Follow the declared input, walking back over excluded stages.
fn resolve_input(ctx: &BuildContext, root: &Path, input: &StageInput) -> ResolvedInput {
    let mut input = input;
    loop {
        match input {
            StageInput::Source(dir) => {
                let name = dir
                    .file_name()
                    .map_or_else(|| "source".to_string(), |n| n.to_string_lossy().into_owned());
                return ResolvedInput {
                    name,
                    dir: dir.clone(),
                    stage: None,
                };
            }
            StageInput::Stage { stage, output } => {
                let Some(upstream) = ctx.config.stage(stage) else {
                    // Validation guarantees the stage exists.
                    return ResolvedInput {
                        name: output.clone(),
                        dir: root.join(output),
                        stage: None,
                    };
                };
                if upstream.excluded {
                    input = &upstream.input;
                    continue;
                }
                return ResolvedInput {
                    name: output.clone(),
                    dir: root.join(format!("{output}{}", ctx.suffix(stage))),
                    stage: Some(stage.clone()),
                };
            }
        }
    }
}

/// Every output exists and the primary carries a stamp newer than the config.
fn is_complete(outputs: &[StageOutput], config_modified: Option<SystemTime>) -> bool {
    let Some(primary) = outputs.first() else {
        return false;
    };
    if !outputs.iter().all(|output| output.actual.is_dir()) {
        return false;
    }
    let Ok(stamp) = primary.actual.join(COMPLETION_STAMP).metadata() else {
        return false;
    };
    match (config_modified, stamp.modified()) {
        (Some(config), Ok(stamp)) => stamp >= config,
        (Some(_), Err(_)) => false,
        (None, _) => true,
    }
}

/// Files of `dir` that form per-file work items, sorted by name.
///
/// Hidden files are never inputs.
pub fn input_files(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if !entry.file_type()?.is_file() || is_hidden(&path) {
            continue;
        }
        let matches = extensions.is_empty()
            || path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with('.'))
}

/// Tool invocations for a stage whose inputs are ready in the working folder.
pub fn work_items(
    stage: &StagePlan,
    tool: &ToolSpec,
    extensions: &[String],
) -> std::io::Result<Vec<WorkItem>> {
    let Some(primary) = stage.primary_output() else {
        return Ok(Vec::new());
    };
    if !tool.per_file {
        return Ok(vec![WorkItem {
            stage: stage.name.clone(),
            program: tool.program.clone(),
            args: render_args(&tool.args, stage, &stage.working_dir, &primary.actual),
            input: stage.working_dir.clone(),
            expected_outputs: stage.outputs.iter().map(|o| o.actual.clone()).collect(),
        }]);
    }
    let items = input_files(&stage.working_dir, extensions)?
        .into_iter()
        .filter_map(|input| {
            let output = primary.actual.join(input.file_name()?);
            Some(WorkItem {
                stage: stage.name.clone(),
                program: tool.program.clone(),
                args: render_args(&tool.args, stage, &input, &output),
                input,
                expected_outputs: vec![output],
            })
        })
        .collect();
    Ok(items)
}

/// Expand argument templates.
///
/// `{input}` and `{output}` are the work item's input and primary output,
/// `{stage}` the stage name and `{output:<NAME>}` the folder of a named
/// output.
pub fn render_args(args: &[String], stage: &StagePlan, input: &Path, output: &Path) -> Vec<String> {
    args.iter()
        .map(|arg| {
            let mut rendered = arg
                .replace("{input}", &input.to_string_lossy())
                .replace("{output}", &output.to_string_lossy())
                .replace("{stage}", &stage.name);
            for named in &stage.outputs {
                if let Some(name) = named.canonical.file_name() {
                    let key = format!("{{output:{}}}", name.to_string_lossy());
                    rendered = rendered.replace(&key, &named.actual.to_string_lossy());
                }
            }
            rendered
        })
        .collect()
}
