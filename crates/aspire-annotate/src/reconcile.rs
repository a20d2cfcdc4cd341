//! Incremental rewriting of directives in a stage's working copy.
//!
//! The previously applied state (`.annotated` next to the working files) is
//! diffed against the current candidates; only new, changed and removed
//! directives are rewritten. Files are rewritten in parallel, each one
//! serially. Nothing is written unless every directive found its anchor, and
//! the applied state is persisted last.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::{IntoParallelRefIterator, ParallelIterator};
use tracing::{debug, info};

use crate::error::{AnnotationError, Result};
use crate::marker::SourceKind;
use crate::model::{Anchor, Annotation, placeholder};
use crate::rewrite::{Target, locate, split_lines};
use crate::store::{AnnotationSet, save_annotations, write_atomic};

/// Applied-state file kept inside a reconciled folder.
pub const APPLIED_STATE_FILE: &str = ".annotated";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Techniques the stage acts on. Empty keeps all.
    pub filter: Vec<String>,
    /// Append the placeholder to every rewritten directive.
    pub keep_placeholders: bool,
    /// Consider annotations without any matching technique as candidates.
    pub replace_all: bool,
    pub preprocessed: bool,
}

/// How a directive changed since the last applied state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Unchanged,
    Changed,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Update {
    pub change: Change,
    pub annotation: Annotation,
}

/// Result of diffing candidates against the applied state.
#[derive(Debug, Clone, Default)]
pub struct Classification {
    /// Directives to rewrite, in ascending id order.
    pub updates: Vec<Update>,
    /// All candidates, carrying forward prior anchors where known.
    pub candidates: Vec<Annotation>,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct ReconcileReport {
    pub new: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub rewritten_files: usize,
    /// Annotations recorded in the new applied state.
    pub applied: usize,
}

impl ReconcileReport {
    pub fn rewrites(&self) -> usize {
        self.new + self.changed + self.removed
    }
}

/// Diff the candidate view against the previously applied annotations.
///
/// Without a prior state every candidate carrying protections is new; with
/// `keep_placeholders` empty candidates are rewritten too. With a prior state,
/// only candidates with protections can be new, and applied entries missing
/// from the candidates are cleared.
pub fn classify(
    candidates: &[Annotation],
    applied: Option<&[Annotation]>,
    keep_placeholders: bool,
) -> Classification {
    let mut classification = Classification::default();
    let Some(applied) = applied else {
        for candidate in candidates {
            if candidate.has_protections() || keep_placeholders {
                classification.updates.push(Update {
                    change: Change::New,
                    annotation: candidate.clone(),
                });
            }
        }
        classification.candidates = candidates.to_vec();
        return classification;
    };

    let prior: BTreeMap<u64, &Annotation> = applied.iter().map(|a| (a.id, a)).collect();
    let mut seen = BTreeSet::new();
    for candidate in candidates {
        seen.insert(candidate.id);
        let mut candidate = candidate.clone();
        match prior.get(&candidate.id) {
            Some(previous) => {
                candidate.inherit_anchor(previous);
                if candidate.filtered == previous.filtered {
                    classification.unchanged += 1;
                } else {
                    classification.updates.push(Update {
                        change: Change::Changed,
                        annotation: candidate.clone(),
                    });
                }
            }
            None if candidate.has_protections() => {
                classification.updates.push(Update {
                    change: Change::New,
                    annotation: candidate.clone(),
                });
            }
            None => {}
        }
        classification.candidates.push(candidate);
    }
    for previous in applied {
        if !seen.contains(&previous.id) && previous.has_protections() {
            let mut removed = previous.clone();
            removed.filtered.clear();
            classification.updates.push(Update {
                change: Change::Removed,
                annotation: removed,
            });
        }
    }
    classification.updates.sort_by_key(|update| update.annotation.id);
    classification
}

/// Text written into the marker for an annotation.
pub fn replacement_content(annotation: &Annotation, keep_placeholders: bool) -> String {
    let mut parts: Vec<String> = annotation.filtered.values().cloned().collect();
    if keep_placeholders || parts.is_empty() {
        parts.push(placeholder(annotation.id));
    }
    parts.join(", ")
}

/// Path of the working copy of an annotation's source file.
pub fn working_file(dir: &Path, annotation: &Annotation, kind: SourceKind) -> Result<PathBuf> {
    let base = Path::new(&annotation.file_name)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AnnotationError::InvalidFileName {
            id: annotation.id,
            file_name: annotation.file_name.clone(),
        })?;
    Ok(dir.join(kind.working_file_name(base)))
}

/// Apply the annotation set to the working files in `dir`.
///
/// Parallel file work runs on the current rayon pool; callers bound it by
/// installing their own pool.
pub fn reconcile(
    dir: &Path,
    set: &AnnotationSet,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let kind = SourceKind::from_preprocessed(options.preprocessed);
    let view = set.filtered_view(&options.filter, !options.replace_all);
    let state_path = dir.join(APPLIED_STATE_FILE);
    let applied = match AnnotationSet::load(&state_path) {
        Ok(applied) => Some(applied),
        Err(AnnotationError::NotFound { .. }) => None,
        Err(error) => return Err(error),
    };

    let classification = classify(
        &view,
        applied.as_ref().map(AnnotationSet::annotations),
        options.keep_placeholders,
    );
    let mut report = ReconcileReport {
        unchanged: classification.unchanged,
        ..ReconcileReport::default()
    };
    for update in &classification.updates {
        match update.change {
            Change::New => report.new += 1,
            Change::Changed => report.changed += 1,
            Change::Removed => report.removed += 1,
            Change::Unchanged => report.unchanged += 1,
        }
    }

    let mut by_file: BTreeMap<PathBuf, Vec<&Annotation>> = BTreeMap::new();
    for update in &classification.updates {
        let path = working_file(dir, &update.annotation, kind)?;
        by_file.entry(path).or_default().push(&update.annotation);
    }
    let groups: Vec<(PathBuf, Vec<&Annotation>)> = by_file.into_iter().collect();

    let results: Vec<Result<RewrittenFile>> = groups
        .par_iter()
        .map(|(path, annotations)| {
            rewrite_file(path, annotations, kind, options.keep_placeholders)
        })
        .collect();
    let rewritten = results.into_iter().collect::<Result<Vec<_>>>()?;

    let mut anchors: BTreeMap<u64, Anchor> = BTreeMap::new();
    for file in &rewritten {
        write_atomic(&file.path, file.text.as_bytes())?;
        anchors.extend(file.anchors.iter().cloned());
    }
    report.rewritten_files = rewritten.len();

    let applied_state: Vec<Annotation> = classification
        .candidates
        .into_iter()
        .filter(Annotation::has_protections)
        .map(|mut annotation| {
            if let Some(anchor) = anchors.remove(&annotation.id) {
                annotation.set_anchor(anchor);
            }
            annotation
        })
        .collect();
    report.applied = applied_state.len();
    save_annotations(&state_path, &applied_state)?;

    info!(
        dir = %dir.display(),
        new = report.new,
        changed = report.changed,
        unchanged = report.unchanged,
        removed = report.removed,
        files = report.rewritten_files,
        "reconciled annotations"
    );
    Ok(report)
}

struct RewrittenFile {
    path: PathBuf,
    text: String,
    anchors: Vec<(u64, Anchor)>,
}

fn rewrite_file(
    path: &Path,
    annotations: &[&Annotation],
    kind: SourceKind,
    keep_placeholders: bool,
) -> Result<RewrittenFile> {
    let text = fs::read_to_string(path).map_err(|e| AnnotationError::io(path, e))?;
    let mut lines = split_lines(&text);
    let mut anchors = Vec::with_capacity(annotations.len());
    for annotation in annotations {
        let content = replacement_content(annotation, keep_placeholders);
        let target = annotation
            .anchor()
            .map_or(Target::Placeholder(annotation.id), Target::Anchor);
        let located =
            locate(&lines, &target, &content, kind).map_err(|source| {
                AnnotationError::Reconciliation {
                    id: annotation.id,
                    file: path.to_path_buf(),
                    source,
                }
            })?;
        debug!(
            id = annotation.id,
            file = %path.display(),
            line = located.anchor.line_number,
            content = %content,
            "rewrote directive"
        );
        lines[located.index] = located.line;
        anchors.push((annotation.id, located.anchor));
    }
    Ok(RewrittenFile {
        path: path.to_path_buf(),
        text: lines.concat(),
        anchors,
    })
}
