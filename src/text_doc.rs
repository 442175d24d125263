//! A line-oriented model for scientific text files with comments and `[ section ]` headers.
//! Format readers supply a classifier for the lines this layer doesn't recognize itself, and
//! keep the lines in their original order so that they can be written back verbatim.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::Path,
};

use crate::error::Result;

/// A C-preprocessor style directive line.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    /// `#include "file.itp"`. Holds the path without quotes or angle brackets.
    Include(String),
    IfDef(String),
    IfNDef(String),
    Else,
    EndIf,
    /// `#define NAME [value]`
    Define(String, Option<String>),
}

/// Coarse directive categories: include, conditional-if, conditional-else, conditional-endif
/// and define.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectiveKind {
    Include,
    If,
    Else,
    EndIf,
    Define,
}

impl Directive {
    pub fn kind(&self) -> DirectiveKind {
        match self {
            Self::Include(_) => DirectiveKind::Include,
            Self::IfDef(_) | Self::IfNDef(_) => DirectiveKind::If,
            Self::Else => DirectiveKind::Else,
            Self::EndIf => DirectiveKind::EndIf,
            Self::Define(..) => DirectiveKind::Define,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LineKind {
    Blank,
    Comment,
    /// A `[ name ]` header. Holds the trimmed name.
    Section(String),
    Directive(Directive),
    /// Data, or anything not recognized. Includes unknown `#` directives.
    Plain,
}

#[derive(Clone, Debug)]
pub struct Line {
    /// The raw text, without the line terminator.
    pub text: String,
    pub kind: LineKind,
    /// 1-based, from the text the document was built from.
    pub line_no: usize,
    /// The section this line belongs to, if a header preceded it.
    pub section: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct TextDocument {
    lines: Vec<Line>,
}

impl TextDocument {
    /// Build a document from text. `classify` is called with the comment-stripped, trimmed
    /// content of each line that isn't blank, a comment or a section header, along with its
    /// line number.
    pub fn parse<F>(text: &str, comment: char, classify: F) -> Result<Self>
    where
        F: FnMut(&str, usize) -> Result<LineKind>,
    {
        Self::from_lines(text.lines(), comment, classify)
    }

    pub fn from_lines<I, S, F>(lines: I, comment: char, mut classify: F) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: FnMut(&str, usize) -> Result<LineKind>,
    {
        let mut out = Vec::new();
        let mut section = None;

        for (i, raw) in lines.into_iter().enumerate() {
            let text: String = raw.into();
            let line_no = i + 1;

            let trimmed = text.trim();
            let content = strip_comment(trimmed, comment).trim();

            let kind = if trimmed.is_empty() {
                LineKind::Blank
            } else if trimmed.starts_with(comment) {
                LineKind::Comment
            } else if let Some(name) = section_name(content) {
                section = Some(name.to_owned());
                LineKind::Section(name.to_owned())
            } else {
                classify(content, line_no)?
            };

            out.push(Line {
                text,
                kind,
                line_no,
                section: section.clone(),
            });
        }

        Ok(Self { lines: out })
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn line(&self, i: usize) -> Option<&Line> {
        self.lines.get(i)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Replace the text of line `i`. The line keeps its kind; re-parse to reclassify.
    /// Returns `false` if there is no such line.
    pub fn set_text(&mut self, i: usize, text: impl Into<String>) -> bool {
        match self.lines.get_mut(i) {
            Some(line) => {
                line.text = text.into();
                true
            }
            None => false,
        }
    }

    /// Section names, in order of first appearance.
    pub fn sections(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for line in &self.lines {
            if let LineKind::Section(name) = &line.kind {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
        }
        out
    }

    /// Plain lines belonging to every section with this name.
    pub fn section_lines<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Line> + 'a {
        self.lines.iter().filter(move |l| {
            l.kind == LineKind::Plain && l.section.as_deref() == Some(name)
        })
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            out.push_str(&line.text);
            out.push('\n');
        }
        out
    }

    /// Write lines verbatim, in their original order.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        for line in &self.lines {
            writeln!(f, "{}", line.text)?;
        }
        f.flush()?;
        Ok(())
    }
}

/// The part of a line before the first comment marker.
pub(crate) fn strip_comment(line: &str, comment: char) -> &str {
    match line.find(comment) {
        Some(i) => &line[..i],
        None => line,
    }
}

/// `[ atoms ]` -> `atoms`
pub(crate) fn section_name(content: &str) -> Option<&str> {
    let inner = content.strip_prefix('[')?.strip_suffix(']')?.trim();
    if inner.is_empty() { None } else { Some(inner) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain(_: &str, _: usize) -> Result<LineKind> {
        Ok(LineKind::Plain)
    }

    #[test]
    fn classifies_base_kinds_and_tracks_sections() {
        let text = "; header\n\n[ atoms ]\n  1 C ; carbon\n[bonds]\n1 2\n";
        let doc = TextDocument::parse(text, ';', plain).unwrap();

        assert_eq!(doc.len(), 6);
        assert_eq!(doc.lines()[0].kind, LineKind::Comment);
        assert_eq!(doc.lines()[1].kind, LineKind::Blank);
        assert_eq!(doc.lines()[2].kind, LineKind::Section("atoms".into()));
        assert_eq!(doc.lines()[3].kind, LineKind::Plain);
        assert_eq!(doc.lines()[3].section.as_deref(), Some("atoms"));
        assert_eq!(doc.lines()[5].section.as_deref(), Some("bonds"));
        assert_eq!(doc.sections(), vec!["atoms", "bonds"]);
        assert_eq!(doc.section_lines("bonds").count(), 1);
    }

    #[test]
    fn edits_keep_kind() {
        let mut doc = TextDocument::parse("[ a ]\nx\n", ';', plain).unwrap();
        assert!(doc.set_text(0, "; no longer a header"));
        assert_eq!(doc.lines()[0].kind, LineKind::Section("a".into()));
        assert!(!doc.set_text(9, "nope"));
        assert_eq!(doc.to_text(), "; no longer a header\nx\n");
    }

    #[test]
    fn caller_supplied_directives() {
        let classify = |content: &str, _: usize| {
            Ok(match content.strip_prefix("!inc ") {
                Some(path) => LineKind::Directive(Directive::Include(path.into())),
                None => LineKind::Plain,
            })
        };
        let doc = TextDocument::parse("# note\n!inc base.dat\n1 2\n", '#', classify).unwrap();

        let LineKind::Directive(d) = &doc.lines()[1].kind else {
            panic!("expected a directive, got {:?}", doc.lines()[1].kind);
        };
        assert_eq!(d.kind(), DirectiveKind::Include);
        assert_eq!(doc.lines()[2].kind, LineKind::Plain);
    }

    #[test]
    fn comment_stripping() {
        assert_eq!(strip_comment("1 2 ; c", ';'), "1 2 ");
        assert_eq!(section_name("[ ]"), None);
        assert_eq!(section_name("[ moleculetype ]"), Some("moleculetype"));
    }
}
