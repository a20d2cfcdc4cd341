#![deny(unsafe_code)]

//! Incremental stage pipeline.
//!
//! Stages run in declaration order. Each stage's output folder carries a
//! suffix derived from the annotations relevant to it and to every stage
//! before it, so unchanged prefixes of the pipeline are reused across
//! builds.

pub mod alias;
pub mod cache_key;
pub mod config;
pub mod context;
pub mod error;
pub mod execute;
pub mod plan;
pub mod runner;
pub mod stage;

pub use crate::alias::{AliasOutcome, publish};
pub use crate::config::PipelineConfig;
pub use crate::context::{BuildContext, BuildOptions};
pub use crate::error::{ConfigError, PipelineError, Result, StageFailure, ToolError};
pub use crate::execute::{BuildReport, StageReport, execute};
pub use crate::plan::{
    BuildPlan, COMPLETION_STAMP, Disposition, RECONCILED_STAMP, StageOutput, StagePlan, WorkItem,
    plan,
};
pub use crate::runner::{ProcessRunner, ToolRunner};
pub use crate::stage::{StageDescriptor, StageInput, ToolSpec, default_filter};
