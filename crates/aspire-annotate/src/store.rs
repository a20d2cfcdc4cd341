//! Loading, merging and per-stage views of annotation sets.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AnnotationError, Result};
use crate::model::Annotation;
use crate::parser::filter_protections;

/// All annotations of a module, in on-disk order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnnotationSet {
    annotations: Vec<Annotation>,
}

impl AnnotationSet {
    pub fn new(annotations: Vec<Annotation>) -> Self {
        Self { annotations }
    }

    /// Load a persisted annotation list.
    ///
    /// Fails with [`AnnotationError::NotFound`] when the file is absent and
    /// [`AnnotationError::Malformed`] when it does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| AnnotationError::io(path, e))?;
        let annotations: Vec<Annotation> =
            serde_json::from_str(&contents).map_err(|source| AnnotationError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        debug!(path = %path.display(), count = annotations.len(), "loaded annotations");
        Ok(Self { annotations })
    }

    /// Like [`AnnotationSet::load`], but an absent file means no directives apply.
    pub fn load_or_empty(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(AnnotationError::NotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_annotations(path, &self.annotations)
    }

    /// Concatenate sets in order. Ids are not deduplicated.
    pub fn merge(sets: impl IntoIterator<Item = AnnotationSet>) -> Self {
        Self {
            annotations: sets.into_iter().flat_map(|set| set.annotations).collect(),
        }
    }

    /// Annotations with `filtered` recomputed for `filter`, sorted by id.
    ///
    /// An empty filter keeps every technique. With `filtered_only`, annotations
    /// left without any technique are dropped.
    pub fn filtered_view(&self, filter: &[String], filtered_only: bool) -> Vec<Annotation> {
        view(self.annotations.iter(), filter, filtered_only)
    }

    /// [`AnnotationSet::filtered_view`] restricted to one source file.
    pub fn filtered_view_for_file(
        &self,
        file_name: &str,
        filter: &[String],
        filtered_only: bool,
    ) -> Vec<Annotation> {
        view(
            self.annotations.iter().filter(|a| a.file_name == file_name),
            filter,
            filtered_only,
        )
    }

    pub fn annotations(&self) -> &[Annotation] {
        &self.annotations
    }

    pub fn into_vec(self) -> Vec<Annotation> {
        self.annotations
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

impl FromIterator<Annotation> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = Annotation>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn view<'a>(
    annotations: impl Iterator<Item = &'a Annotation>,
    filter: &[String],
    filtered_only: bool,
) -> Vec<Annotation> {
    let mut view: Vec<Annotation> = annotations
        .map(|annotation| {
            let mut annotation = annotation.clone();
            annotation.filtered = filter_protections(&annotation.raw_content, filter);
            annotation
        })
        .filter(|annotation| !filtered_only || annotation.has_protections())
        .collect();
    view.sort_by_key(|annotation| annotation.id);
    view
}

/// Load every input and write their concatenation to `output`.
pub fn merge_files(inputs: &[PathBuf], output: &Path) -> Result<AnnotationSet> {
    let sets = inputs
        .iter()
        .map(|path| AnnotationSet::load(path))
        .collect::<Result<Vec<_>>>()?;
    let merged = AnnotationSet::merge(sets);
    merged.save(output)?;
    debug!(
        inputs = inputs.len(),
        count = merged.len(),
        output = %output.display(),
        "merged annotations"
    );
    Ok(merged)
}

/// Persist an annotation list as pretty JSON.
pub fn save_annotations(path: &Path, annotations: &[Annotation]) -> Result<()> {
    let mut json = serde_json::to_string_pretty(annotations).map_err(|source| {
        AnnotationError::Malformed {
            path: path.to_path_buf(),
            source,
        }
    })?;
    json.push('\n');
    write_atomic(path, json.as_bytes())
}

/// Write through a sibling temp file so readers never see partial content.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&temp, bytes).map_err(|e| AnnotationError::io(&temp, e))?;
    fs::rename(&temp, path).map_err(|e| AnnotationError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> AnnotationSet {
        AnnotationSet::new(vec![
            Annotation::new(3, "b.c", "protection(xor, mask(constant(1))), protection(guard, g)"),
            Annotation::new(1, "a.c", "protection(wbc, key(2))"),
            Annotation::new(2, "a.c", "protection(xor, x), protection(xor, y)"),
        ])
    }

    #[test]
    fn view_is_sorted_by_id() {
        let ids: Vec<u64> = set().filtered_view(&[], false).iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn filtered_only_drops_empty_annotations() {
        let view = set().filtered_view(&["xor".to_string()], true);
        assert_eq!(view.iter().map(|a| a.id).collect::<Vec<_>>(), vec![2, 3]);
        assert_eq!(view[0].filtered["xor"], "protection(xor, x), protection(xor, y)");
        assert_eq!(view[1].filtered["xor"], "protection(xor, mask(constant(1)))");
    }

    #[test]
    fn unfiltered_view_keeps_empty_annotations() {
        let view = set().filtered_view(&["xor".to_string()], false);
        assert_eq!(view.len(), 3);
        assert!(view[0].filtered.is_empty());
    }

    #[test]
    fn view_for_file_restricts_by_name() {
        let view = set().filtered_view_for_file("a.c", &[], true);
        assert_eq!(view.iter().map(|a| a.id).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn merge_concatenates_without_dedup() {
        let merged = AnnotationSet::merge([set(), set()]);
        assert_eq!(merged.len(), 6);
        assert_eq!(merged.annotations()[0].id, 3);
        assert_eq!(merged.annotations()[3].id, 3);
    }
}
