#![deny(unsafe_code)]

use std::path::PathBuf;

use aspire_annotate::AnnotationError;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {timeout_secs}s")]
    TimedOut { program: String, timeout_secs: u64 },

    #[error("{program} did not produce {path}")]
    MissingOutput { program: String, path: PathBuf },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_string(),
    }
}

/// Why a single stage failed.
#[derive(Debug, thiserror::Error)]
pub enum StageFailure {
    #[error(transparent)]
    Annotations(#[from] AnnotationError),

    #[error("tool failed on {input}: {source}")]
    Tool {
        input: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StageFailure {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to load annotations {path}: {source}")]
    Annotations {
        path: PathBuf,
        #[source]
        source: AnnotationError,
    },

    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: StageFailure,
    },

    #[error("failed to build worker pool: {0}")]
    WorkerPool(#[from] rayon::ThreadPoolBuildError),
}

impl PipelineError {
    pub(crate) fn stage(stage: &str, source: impl Into<StageFailure>) -> Self {
        Self::Stage {
            stage: stage.to_string(),
            source: source.into(),
        }
    }

    /// Name of the stage that failed, if the failure belongs to one.
    pub fn stage_name(&self) -> Option<&str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
