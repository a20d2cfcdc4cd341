//! Marker syntax carrying directives in C sources.
//!
//! Attribute markers (`__attribute__((ASPIRE("...")))`) appear in both raw and
//! pre-processed files. Pragma markers are written as `_Pragma("ASPIRE begin ...")`
//! operators in raw sources and show up as `#pragma ASPIRE begin ...` lines once
//! the preprocessor has lowered them.

use regex::{NoExpand, Regex};

/// Whether a working file is raw source or preprocessor output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceKind {
    #[default]
    Raw,
    Preprocessed,
}

impl SourceKind {
    pub fn from_preprocessed(preprocessed: bool) -> Self {
        if preprocessed {
            Self::Preprocessed
        } else {
            Self::Raw
        }
    }

    /// Name of the working copy of `base` inside a stage folder.
    pub fn working_file_name(self, base: &str) -> String {
        match self {
            Self::Raw => base.to_string(),
            Self::Preprocessed => format!("{base}.i"),
        }
    }
}

pub fn render_attribute(content: &str) -> String {
    format!("__attribute__((ASPIRE(\"{content}\")))")
}

pub fn render_pragma(content: &str, kind: SourceKind) -> String {
    match kind {
        SourceKind::Raw => format!("_Pragma(\"ASPIRE begin {content}\")"),
        SourceKind::Preprocessed => format!("#pragma ASPIRE begin {content}"),
    }
}

/// Regex fragment matching the placeholder directive of one annotation.
pub fn placeholder_pattern(id: u64) -> String {
    format!(r"protection\s*\(\s*placeHolder\s*,\s*id\s*\(\s*{id}\s*\)\s*\)")
}

/// Compiled matchers for markers whose directive contains a given fragment.
#[derive(Debug)]
pub struct MarkerMatcher {
    attribute: Regex,
    pragma: Regex,
    kind: SourceKind,
}

impl MarkerMatcher {
    /// `fragment` is a regex fragment; escape literal text before passing it.
    pub fn new(fragment: &str, kind: SourceKind) -> Result<Self, regex::Error> {
        let attribute = Regex::new(&format!(
            r#"__attribute__\s*\(\s*\(\s*ASPIRE\s*\(\s*"[^"]*?{fragment}[^"]*"\s*\)\s*\)\s*\)"#
        ))?;
        let pragma = match kind {
            SourceKind::Raw => Regex::new(&format!(
                r#"_Pragma\s*\(\s*"\s*ASPIRE\s+begin\s[^"]*?{fragment}[^"]*"\s*\)"#
            ))?,
            SourceKind::Preprocessed => {
                Regex::new(&format!(r"#\s*pragma\s+ASPIRE\s+begin\s.*?{fragment}.*"))?
            }
        };
        Ok(Self {
            attribute,
            pragma,
            kind,
        })
    }

    pub fn for_placeholder(id: u64, kind: SourceKind) -> Result<Self, regex::Error> {
        Self::new(&placeholder_pattern(id), kind)
    }

    pub fn for_content(content: &str, kind: SourceKind) -> Result<Self, regex::Error> {
        Self::new(&regex::escape(content), kind)
    }

    /// Number of markers in `line` that carry the fragment.
    pub fn count(&self, line: &str) -> usize {
        self.attribute.find_iter(line).count() + self.pragma.find_iter(line).count()
    }

    /// Replace every matching marker in `line` with one carrying `content`.
    pub fn replace(&self, line: &str, content: &str) -> String {
        let attribute = render_attribute(content);
        let pragma = render_pragma(content, self.kind);
        let line = self.attribute.replace_all(line, NoExpand(&attribute));
        self.pragma.replace_all(&line, NoExpand(&pragma)).into_owned()
    }
}
