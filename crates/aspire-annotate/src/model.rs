//! Annotation records as persisted in annotation and applied-state files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Directive content written where a protection has been removed or never applied.
pub fn placeholder(id: u64) -> String {
    format!("protection(placeHolder, id({id}))")
}

/// One directive instance.
///
/// Fields are declared in key order so that serialized records come out
/// sorted, matching files produced by the extraction tooling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    /// Full directive text, e.g. `protection(xor, mask(constant(35)))`.
    #[serde(rename = "annotation content")]
    pub raw_content: String,

    /// Content last written into the source for this directive.
    #[serde(rename = "content", default, skip_serializing_if = "Option::is_none")]
    pub applied_content: Option<String>,

    #[serde(rename = "file name")]
    pub file_name: String,

    /// Technique name to parameter text, restricted to the active stage filter.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub filtered: BTreeMap<String, String>,

    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_hash: Option<String>,

    /// 1-based line of the last rewrite.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<usize>,
}

/// Physical location of the last rewrite of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anchor {
    pub line_number: usize,
    pub line_hash: String,
    pub content: String,
}

impl Annotation {
    pub fn new(id: u64, file_name: impl Into<String>, raw_content: impl Into<String>) -> Self {
        Self {
            raw_content: raw_content.into(),
            applied_content: None,
            file_name: file_name.into(),
            filtered: BTreeMap::new(),
            id,
            line_hash: None,
            line_number: None,
        }
    }

    /// Reconciliation metadata, present only when all three parts were recorded.
    pub fn anchor(&self) -> Option<Anchor> {
        match (&self.line_number, &self.line_hash, &self.applied_content) {
            (Some(line_number), Some(line_hash), Some(content)) => Some(Anchor {
                line_number: *line_number,
                line_hash: line_hash.clone(),
                content: content.clone(),
            }),
            _ => None,
        }
    }

    pub fn set_anchor(&mut self, anchor: Anchor) {
        self.line_number = Some(anchor.line_number);
        self.line_hash = Some(anchor.line_hash);
        self.applied_content = Some(anchor.content);
    }

    /// Copy reconciliation metadata from a previously applied record.
    pub fn inherit_anchor(&mut self, prior: &Annotation) {
        self.line_number = prior.line_number;
        self.line_hash.clone_from(&prior.line_hash);
        self.applied_content.clone_from(&prior.applied_content);
    }

    pub fn clear_anchor(&mut self) {
        self.line_number = None;
        self.line_hash = None;
        self.applied_content = None;
    }

    pub fn has_protections(&self) -> bool {
        !self.filtered.is_empty()
    }
}
