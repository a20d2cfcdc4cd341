#![deny(unsafe_code)]

//! Pipeline configuration file.
//!
//! The TOML layout is deserialized into the raw `*File` structs and then
//! validated once into [`PipelineConfig`], whose stages are fully resolved
//! [`StageDescriptor`]s.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::stage::{StageDescriptor, StageInput, ToolSpec, default_filter};

const DEFAULT_JOBS: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    build: BuildSection,
    #[serde(default, rename = "stage")]
    stages: Vec<StageFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
struct BuildSection {
    root: PathBuf,
    annotations: Vec<PathBuf>,
    caching: bool,
    jobs: usize,
    timeout_secs: u64,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            root: PathBuf::from("build"),
            annotations: Vec::new(),
            caching: true,
            jobs: DEFAULT_JOBS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct StageFile {
    name: String,
    #[serde(default)]
    source: Option<PathBuf>,
    #[serde(default)]
    input: Option<String>,
    outputs: Vec<String>,
    #[serde(default)]
    filter: Option<Vec<String>>,
    #[serde(default)]
    extensions: Vec<String>,
    #[serde(default)]
    excluded: bool,
    #[serde(default)]
    traverse: bool,
    #[serde(default)]
    preprocessed: bool,
    #[serde(default)]
    keep_placeholders: bool,
    #[serde(default)]
    replace_all: bool,
    #[serde(default)]
    tool: Option<ToolFile>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ToolFile {
    program: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    per_file: bool,
    #[serde(default)]
    timeout_secs: Option<u64>,
}

/// Validated pipeline configuration with paths resolved against the config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// The file this configuration was loaded from, if any.
    pub path: Option<PathBuf>,
    /// Folder receiving every stage output.
    pub root: PathBuf,
    pub annotations: Vec<PathBuf>,
    /// Content-addressed output folders. Only effective with annotations.
    pub caching: bool,
    pub jobs: usize,
    /// Stages in execution order.
    pub stages: Vec<StageDescriptor>,
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let mut config = Self::parse(&contents, base).map_err(|error| match error {
            ConfigError::Toml { source, .. } => ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            },
            ConfigError::Invalid { message, .. } => ConfigError::Invalid {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })?;
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse and validate TOML text; relative paths resolve against `base`.
    pub fn parse(contents: &str, base: &Path) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(contents).map_err(|source| ConfigError::Toml {
            path: PathBuf::new(),
            source,
        })?;
        build_config(file, base).map_err(|message| ConfigError::Invalid {
            path: PathBuf::new(),
            message,
        })
    }

    pub fn stage(&self, name: &str) -> Option<&StageDescriptor> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    /// Annotation caching needs both the switch and something to hash.
    pub fn caching_active(&self) -> bool {
        self.caching && !self.annotations.is_empty()
    }
}

fn build_config(file: ConfigFile, base: &Path) -> Result<PipelineConfig, String> {
    let build = file.build;
    if build.jobs == 0 {
        return Err("build.jobs must be at least 1".to_string());
    }
    if build.timeout_secs == 0 {
        return Err("build.timeout_secs must be at least 1".to_string());
    }
    if file.stages.is_empty() {
        return Err("no [[stage]] entries".to_string());
    }

    // Outputs declared so far, by stage name.
    let mut declared: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut all_outputs: BTreeSet<String> = BTreeSet::new();
    let mut stages = Vec::with_capacity(file.stages.len());

    for entry in file.stages {
        let name = entry.name.trim().to_string();
        if name.is_empty() {
            return Err("stage with empty name".to_string());
        }
        if declared.contains_key(&name) {
            return Err(format!("duplicate stage name: {name}"));
        }
        if entry.outputs.is_empty() {
            return Err(format!("stage {name} declares no outputs"));
        }
        for output in &entry.outputs {
            validate_folder_name(&name, output)?;
            if !all_outputs.insert(output.clone()) {
                return Err(format!("stage {name}: output {output} already declared"));
            }
        }

        let input = match (entry.source, entry.input) {
            (Some(_), Some(_)) => {
                return Err(format!("stage {name} sets both source and input"));
            }
            (None, None) => return Err(format!("stage {name} needs a source or an input")),
            (Some(source), None) => StageInput::Source(base.join(source)),
            (None, Some(input)) => resolve_input(&name, &input, &declared)?,
        };

        let tool = entry.tool.map(|tool| ToolSpec {
            program: tool.program,
            args: tool.args,
            per_file: tool.per_file,
            timeout: Duration::from_secs(tool.timeout_secs.unwrap_or(build.timeout_secs)),
        });
        if tool.as_ref().is_some_and(|tool| tool.timeout.is_zero()) {
            return Err(format!("stage {name}: tool timeout must be at least 1 second"));
        }
        if tool.is_none() && !entry.traverse && !entry.excluded {
            return Err(format!("stage {name} has no tool and is not a traverse stage"));
        }

        let filter = entry
            .filter
            .or_else(|| default_filter(&name))
            .unwrap_or_default();
        let extensions = entry
            .extensions
            .into_iter()
            .map(|ext| ext.trim_start_matches('.').to_string())
            .collect();

        declared.insert(name.clone(), entry.outputs.clone());
        stages.push(StageDescriptor {
            name,
            input,
            outputs: entry.outputs,
            filter,
            excluded: entry.excluded,
            traverse: entry.traverse,
            preprocessed: entry.preprocessed,
            keep_placeholders: entry.keep_placeholders,
            replace_all: entry.replace_all,
            extensions,
            tool,
        });
    }

    Ok(PipelineConfig {
        path: None,
        root: base.join(build.root),
        annotations: build
            .annotations
            .into_iter()
            .map(|path| base.join(path))
            .collect(),
        caching: build.caching,
        jobs: build.jobs,
        stages,
    })
}

/// `"<stage>"` reads the primary output, `"<stage>:<output>"` a branch output.
fn resolve_input(
    name: &str,
    input: &str,
    declared: &BTreeMap<String, Vec<String>>,
) -> Result<StageInput, String> {
    let (stage, output) = match input.split_once(':') {
        Some((stage, output)) => (stage.trim(), Some(output.trim())),
        None => (input.trim(), None),
    };
    let Some(outputs) = declared.get(stage) else {
        return Err(format!(
            "stage {name}: input {stage} is not an earlier stage"
        ));
    };
    let output = match output {
        Some(output) if outputs.iter().any(|o| o == output) => output.to_string(),
        Some(output) => {
            return Err(format!(
                "stage {name}: stage {stage} has no output {output}"
            ));
        }
        None => outputs[0].clone(),
    };
    Ok(StageInput::Stage {
        stage: stage.to_string(),
        output,
    })
}

fn validate_folder_name(stage: &str, output: &str) -> Result<(), String> {
    let valid = !output.is_empty()
        && output != "."
        && output != ".."
        && !output.starts_with('.')
        && !output.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(format!("stage {stage}: invalid output folder name {output:?}"))
    }
}
