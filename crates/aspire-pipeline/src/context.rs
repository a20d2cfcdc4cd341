//! Per-invocation build state.

use std::collections::BTreeMap;
use std::time::SystemTime;

use aspire_annotate::{AnnotationError, AnnotationSet};
use tracing::{debug, warn};

use crate::cache_key::{stage_hashes, suffix};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Re-run every stage even when its output folder is complete.
    pub force: bool,
    /// Overrides `build.jobs`.
    pub jobs: Option<usize>,
}

/// Everything stage planning and execution read, fixed for one build.
///
/// Stage hashes are computed once here and never change while the build
/// runs.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub config: PipelineConfig,
    pub annotations: AnnotationSet,
    pub options: BuildOptions,
    /// Modification time of the config file; stage outputs older than this
    /// are rebuilt.
    pub config_modified: Option<SystemTime>,
    hashes: BTreeMap<String, String>,
}

impl BuildContext {
    /// Load the configured annotation files and freeze stage hashes.
    ///
    /// Missing annotation files count as empty; malformed ones are fatal.
    pub fn new(config: PipelineConfig, options: BuildOptions) -> Result<Self> {
        let mut sets = Vec::with_capacity(config.annotations.len());
        for path in &config.annotations {
            match AnnotationSet::load(path) {
                Ok(set) => sets.push(set),
                Err(AnnotationError::NotFound { .. }) => {
                    warn!(path = %path.display(), "annotation file not found, treating as empty");
                }
                Err(source) => {
                    return Err(PipelineError::Annotations {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }
        let config_modified = config
            .path
            .as_deref()
            .and_then(|path| path.metadata().ok())
            .and_then(|meta| meta.modified().ok());
        let mut context = Self::with_annotations(config, AnnotationSet::merge(sets), options);
        context.config_modified = config_modified;
        Ok(context)
    }

    /// Build a context around an already loaded annotation set.
    pub fn with_annotations(
        config: PipelineConfig,
        annotations: AnnotationSet,
        options: BuildOptions,
    ) -> Self {
        let hashes = stage_hashes(&config.stages, &annotations, config.caching_active());
        for (stage, hash) in &hashes {
            debug!(stage = %stage, hash = %hash, "stage hash");
        }
        Self {
            config,
            annotations,
            options,
            config_modified: None,
            hashes,
        }
    }

    pub fn hash(&self, stage: &str) -> &str {
        self.hashes.get(stage).map_or("", String::as_str)
    }

    pub fn suffix(&self, stage: &str) -> String {
        suffix(self.hash(stage))
    }

    pub fn jobs(&self) -> usize {
        self.options.jobs.unwrap_or(self.config.jobs).max(1)
    }

    /// Annotations are applied only when some are configured.
    pub fn applies_annotations(&self) -> bool {
        !self.config.annotations.is_empty() && !self.annotations.is_empty()
    }
}
