//! Content-addressed folder suffixes.
//!
//! Each stage's hash chains its upstream stage's hash with the annotations
//! relevant to the stage, so a change anywhere upstream moves every
//! dependent stage to a new folder while unrelated stages keep their names.

use std::collections::BTreeMap;

use aspire_annotate::{Annotation, AnnotationSet};
use sha2::{Digest, Sha256};

use crate::stage::{StageDescriptor, StageInput};

/// Hex characters kept from the digest.
const HASH_LEN: usize = 16;

/// Chain `prior` with the `(id, filtered)` content of `view`.
///
/// Entries without any filtered technique are ignored, input order does not
/// matter, and a view with nothing left returns `prior` unchanged.
pub fn derive(prior: &str, view: &[Annotation]) -> String {
    let mut entries: Vec<&Annotation> = view.iter().filter(|a| a.has_protections()).collect();
    if entries.is_empty() {
        return prior.to_string();
    }
    entries.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.filtered.cmp(&b.filtered)));

    let mut hasher = Sha256::new();
    update_field(&mut hasher, prior.as_bytes());
    for annotation in entries {
        hasher.update(annotation.id.to_le_bytes());
        hasher.update((annotation.filtered.len() as u64).to_le_bytes());
        for (technique, parameters) in &annotation.filtered {
            update_field(&mut hasher, technique.as_bytes());
            update_field(&mut hasher, parameters.as_bytes());
        }
    }
    let mut hash = hex::encode(hasher.finalize());
    hash.truncate(HASH_LEN);
    hash
}

/// Folder-name suffix for a stage hash.
pub fn suffix(hash: &str) -> String {
    if hash.is_empty() {
        String::new()
    } else {
        format!("-{hash}")
    }
}

/// Hash of every stage, chained along declared inputs.
///
/// A stage's prior hash is the hash of the stage it reads from, or empty for
/// a source folder, so sibling branches never move each other's suffix.
/// Stages that do not use annotations inherit their prior hash; an excluded
/// stage therefore passes its upstream hash through unchanged. With caching
/// off every hash is empty.
pub fn stage_hashes(
    stages: &[StageDescriptor],
    annotations: &AnnotationSet,
    caching: bool,
) -> BTreeMap<String, String> {
    let mut hashes: BTreeMap<String, String> = BTreeMap::new();
    for stage in stages {
        let prior = match &stage.input {
            StageInput::Source(_) => String::new(),
            StageInput::Stage { stage: upstream, .. } => {
                hashes.get(upstream).cloned().unwrap_or_default()
            }
        };
        let hash = if caching && stage.uses_annotations() {
            let view = annotations.filtered_view(&stage.filter, true);
            derive(&prior, &view)
        } else {
            prior
        };
        hashes.insert(stage.name.clone(), hash);
    }
    hashes
}

fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}
