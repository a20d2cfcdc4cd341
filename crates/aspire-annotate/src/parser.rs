//! Directive content grammar.
//!
//! Content is a comma separated list of `protection(<technique>, <params...>)`
//! terms. Parameters may nest parenthesized sub-terms, so terms are split on
//! commas at bracket depth zero, or where a new `protection(` term begins.

use std::collections::BTreeMap;

const KEYWORD: &str = "protection";

/// One `protection(...)` term of a directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Protection {
    pub technique: String,
    /// The whole term, `protection(` through its matching close paren.
    pub text: String,
}

/// Parse directive content into its protection terms, in order of appearance.
///
/// Characters after a term's matching close paren are dropped. A term whose
/// parentheses never balance is returned as far as it was consumed.
pub fn parse(content: &str) -> Vec<Protection> {
    split_top_level(content)
        .into_iter()
        .filter_map(parse_term)
        .collect()
}

/// Reduce directive content to the techniques a stage asks for.
///
/// An empty filter keeps every technique. Repeated techniques are joined
/// with `", "` in order of appearance.
pub fn filter_protections(content: &str, filter: &[String]) -> BTreeMap<String, String> {
    let mut filtered: BTreeMap<String, String> = BTreeMap::new();
    for protection in parse(content) {
        if !filter.is_empty() && !filter.iter().any(|t| *t == protection.technique) {
            continue;
        }
        filtered
            .entry(protection.technique)
            .and_modify(|text| {
                text.push_str(", ");
                text.push_str(&protection.text);
            })
            .or_insert(protection.text);
    }
    filtered
}

/// Split on commas at depth zero, and before any `, protection(` so that an
/// unbalanced term cannot swallow the terms after it.
fn split_top_level(content: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (index, c) in content.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 || starts_term(&content[index + 1..]) => {
                terms.push(&content[start..index]);
                start = index + 1;
                depth = 0;
            }
            _ => {}
        }
    }
    terms.push(&content[start..]);
    terms
}

fn starts_term(rest: &str) -> bool {
    rest.trim_start()
        .strip_prefix(KEYWORD)
        .is_some_and(|after| after.trim_start().starts_with('('))
}

fn parse_term(term: &str) -> Option<Protection> {
    let term = term.trim_start();
    let args = term.strip_prefix(KEYWORD)?.trim_start().strip_prefix('(')?;
    let technique = args
        .split(['(', ')', ','])
        .next()
        .map(str::trim)
        .filter(|name| !name.is_empty())?;
    Some(Protection {
        technique: technique.to_string(),
        text: match_brackets(term).trim_end().to_string(),
    })
}

/// Cut after the paren closing the first opened one.
fn match_brackets(term: &str) -> &str {
    let mut depth = 0usize;
    for (index, c) in term.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return &term[..=index];
                }
            }
            _ => {}
        }
    }
    term
}
