//! Protection annotations: parsing, per-stage views and incremental rewriting
//! of the directives embedded in C sources.

pub mod error;
pub mod extract;
pub mod hash;
pub mod marker;
pub mod model;
pub mod parser;
pub mod reconcile;
pub mod rewrite;
pub mod store;

pub use error::{AnnotationError, Result};
pub use extract::{Extraction, extract_file, extract_placeholders};
pub use marker::SourceKind;
pub use model::{Anchor, Annotation, placeholder};
pub use parser::{Protection, filter_protections, parse};
pub use reconcile::{
    APPLIED_STATE_FILE, Change, ReconcileOptions, ReconcileReport, classify, reconcile,
};
pub use rewrite::{AnchorError, Target, rewrite};
pub use store::{AnnotationSet, merge_files, save_annotations};
