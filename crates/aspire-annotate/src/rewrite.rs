//! Line-anchored directive rewriting.
//!
//! A directive is rewritten either where its placeholder sits (first pass) or
//! on the exact line recorded by its anchor, after checking that the line still
//! hashes the same and still carries the previously applied content. Exactly
//! one marker must match.

use std::fmt;

use crate::hash::line_hash;
use crate::marker::{MarkerMatcher, SourceKind};
use crate::model::Anchor;

#[derive(Debug, thiserror::Error)]
pub enum AnchorError {
    #[error("anchor lost: no marker matched {target}")]
    Lost { target: String },

    #[error("anchor ambiguous: {matches} markers matched {target}")]
    Ambiguous { target: String, matches: usize },

    #[error("cannot build marker pattern for {target}: {source}")]
    Pattern {
        target: String,
        #[source]
        source: regex::Error,
    },
}

/// Where a directive is expected to be found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The id-bearing placeholder, anywhere in the file.
    Placeholder(u64),
    /// The recorded line of the last rewrite.
    Anchor(Anchor),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Placeholder(id) => write!(f, "placeholder id({id})"),
            Self::Anchor(anchor) => write!(
                f,
                "line {} ({:?})",
                anchor.line_number, anchor.content
            ),
        }
    }
}

/// A single located replacement: the line index and its new text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub index: usize,
    pub line: String,
    pub anchor: Anchor,
}

/// Rewrite one directive, returning the new lines and the anchor to record.
///
/// Lines keep their terminators; matching and hashing ignore them.
pub fn rewrite(
    lines: &[String],
    target: &Target,
    content: &str,
    kind: SourceKind,
) -> Result<(Vec<String>, Anchor), AnchorError> {
    let located = locate(lines, target, content, kind)?;
    let mut new_lines = lines.to_vec();
    new_lines[located.index] = located.line;
    Ok((new_lines, located.anchor))
}

/// Find the single marker for `target` and compute its replacement line.
pub fn locate(
    lines: &[String],
    target: &Target,
    content: &str,
    kind: SourceKind,
) -> Result<Located, AnchorError> {
    let pattern_error = |source| AnchorError::Pattern {
        target: target.to_string(),
        source,
    };
    let lost = || AnchorError::Lost {
        target: target.to_string(),
    };

    let (index, matcher) = match target {
        Target::Anchor(anchor) => {
            let index = anchor.line_number.checked_sub(1).ok_or_else(lost)?;
            let line = lines.get(index).ok_or_else(lost)?;
            let (body, _) = split_terminator(line);
            if line_hash(body) != anchor.line_hash || !body.contains(anchor.content.as_str()) {
                return Err(lost());
            }
            let matcher =
                MarkerMatcher::for_content(&anchor.content, kind).map_err(pattern_error)?;
            (index, matcher)
        }
        Target::Placeholder(id) => {
            let matcher = MarkerMatcher::for_placeholder(*id, kind).map_err(pattern_error)?;
            let mut hits = lines
                .iter()
                .enumerate()
                .map(|(index, line)| (index, matcher.count(split_terminator(line).0)))
                .filter(|(_, count)| *count > 0);
            let Some((index, _)) = hits.next() else {
                return Err(lost());
            };
            (index, matcher)
        }
    };

    let matches = match target {
        Target::Anchor(_) => matcher.count(split_terminator(&lines[index]).0),
        Target::Placeholder(_) => lines
            .iter()
            .map(|line| matcher.count(split_terminator(line).0))
            .sum(),
    };
    match matches {
        0 => return Err(lost()),
        1 => {}
        matches => {
            return Err(AnchorError::Ambiguous {
                target: target.to_string(),
                matches,
            });
        }
    }

    let (body, terminator) = split_terminator(&lines[index]);
    let new_body = matcher.replace(body, content);
    let anchor = Anchor {
        line_number: index + 1,
        line_hash: line_hash(&new_body),
        content: content.to_string(),
    };
    Ok(Located {
        index,
        line: format!("{new_body}{terminator}"),
        anchor,
    })
}

/// Split source text into lines that keep their terminators.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n').map(str::to_string).collect()
}

fn split_terminator(line: &str) -> (&str, &str) {
    let body = line.trim_end_matches(['\n', '\r']);
    (body, &line[body.len()..])
}
