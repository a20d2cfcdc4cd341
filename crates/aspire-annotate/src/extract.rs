//! Placeholder extraction.
//!
//! Turns a source with inline directives into one carrying numbered
//! placeholders plus the annotation list describing what each placeholder
//! stood for. Markers that already hold a placeholder are left alone.

use std::fs;
use std::ops::Range;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::error::{AnnotationError, Result};
use crate::marker::{SourceKind, render_attribute, render_pragma};
use crate::model::{Annotation, placeholder};
use crate::parser::parse;
use crate::rewrite::split_lines;
use crate::store::{save_annotations, write_atomic};

static ATTRIBUTE_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"__attribute__\s*\(\s*\(\s*ASPIRE\s*\(\s*"([^"]*)"\s*\)\s*\)\s*\)"#)
        .expect("Invalid attribute marker regex")
});

static PRAGMA_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"_Pragma\s*\(\s*"\s*ASPIRE\s+begin\s+([^"]*)"\s*\)"#)
        .expect("Invalid pragma marker regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Source text with directives replaced by placeholders.
    pub source: String,
    pub annotations: Vec<Annotation>,
    /// First id not used by this extraction.
    pub next_id: u64,
}

/// Replace the directives of one raw source with placeholders.
///
/// `file_name` is recorded as the annotations' source file. A line holding
/// more than one directive cannot be anchored later and is rejected.
pub fn extract_placeholders(text: &str, file_name: &str, start_id: u64) -> Result<Extraction> {
    let mut next_id = start_id;
    let mut annotations = Vec::new();
    let mut lines = split_lines(text);
    for (index, line) in lines.iter_mut().enumerate() {
        let found = directives(line);
        let directive = match found.as_slice() {
            [] => continue,
            [directive] => directive,
            _ => {
                return Err(AnnotationError::Extraction {
                    path: file_name.into(),
                    line: index + 1,
                    message: format!("{} directives on one line", found.len()),
                });
            }
        };
        let id = next_id;
        let marker = if directive.pragma {
            render_pragma(&placeholder(id), SourceKind::Raw)
        } else {
            render_attribute(&placeholder(id))
        };
        line.replace_range(directive.range.clone(), &marker);
        debug!(file = file_name, line = index + 1, id, content = %directive.content, "extracted directive");
        annotations.push(Annotation::new(id, file_name, directive.content.clone()));
        next_id += 1;
    }
    Ok(Extraction {
        source: lines.concat(),
        annotations,
        next_id,
    })
}

/// Extract placeholders from `source` in place and write the annotation list.
pub fn extract_file(source: &Path, start_id: u64, json_out: &Path) -> Result<Extraction> {
    let text = fs::read_to_string(source).map_err(|e| AnnotationError::io(source, e))?;
    let extraction = extract_placeholders(&text, &source.to_string_lossy(), start_id)?;
    write_atomic(source, extraction.source.as_bytes())?;
    save_annotations(json_out, &extraction.annotations)?;
    Ok(extraction)
}

struct Directive {
    range: Range<usize>,
    content: String,
    pragma: bool,
}

/// Markers on a line whose directive is not already a placeholder.
fn directives(line: &str) -> Vec<Directive> {
    let matches = |regex: &Regex, pragma: bool| {
        regex
            .captures_iter(line)
            .filter(|caps| !is_placeholder(&caps[1]))
            .filter_map(move |caps| {
                caps.get(0).map(|whole| Directive {
                    range: whole.range(),
                    content: directive_content(&caps[1]),
                    pragma,
                })
            })
            .collect::<Vec<_>>()
    };
    let mut found = matches(&*ATTRIBUTE_MARKER, false);
    found.extend(matches(&*PRAGMA_MARKER, true));
    found
}

fn is_placeholder(directive: &str) -> bool {
    parse(directive)
        .iter()
        .any(|protection| protection.technique == "placeHolder")
}

fn directive_content(directive: &str) -> String {
    parse(directive)
        .into_iter()
        .map(|protection| protection.text)
        .collect::<Vec<_>>()
        .join(", ")
}
