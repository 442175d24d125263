//! For GROMACS topology files (`.top`, `.itp`). These use C-preprocessor style directives to
//! include other files, and to switch blocks on and off with macros.
//!
//! Preprocessor support is structural only: directives are recognized and their nesting is
//! checked, but conditionals are not evaluated and macros are not substituted. Unknown
//! directives (`#undef`, `#if`, ...) are left alone as plain lines.

use std::{fs, path::Path, sync::LazyLock};

use regex::Regex;

use crate::{
    error::{Error, Result},
    text_doc::{Line, LineKind, TextDocument},
};

pub use crate::text_doc::{Directive, DirectiveKind};

pub const COMMENT_MARKER: char = ';';
pub const DIRECTIVE_MARKER: char = '#';

static DIRECTIVE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#\s*([A-Za-z_]\w*)\s*(.*)$").unwrap());

/// Classify the comment-stripped content of a line as a known directive, or plain.
fn classify(content: &str, line_no: usize) -> Result<LineKind> {
    if !content.starts_with(DIRECTIVE_MARKER) {
        return Ok(LineKind::Plain);
    }

    let Some(caps) = DIRECTIVE_RE.captures(content) else {
        return Ok(LineKind::Plain);
    };
    let keyword = &caps[1];
    let operand = caps[2].trim();

    let first_operand = |what: &str| {
        operand
            .split_whitespace()
            .next()
            .map(str::to_owned)
            .ok_or_else(|| Error::malformed(line_no, format!("#{what} without a macro name")))
    };

    let directive = match keyword {
        "include" => {
            let path = operand
                .trim_matches(|c| c == '"' || c == '<' || c == '>')
                .trim();
            if path.is_empty() {
                return Err(Error::malformed(line_no, "#include without a file name"));
            }
            Directive::Include(path.to_owned())
        }
        "ifdef" => Directive::IfDef(first_operand("ifdef")?),
        "ifndef" => Directive::IfNDef(first_operand("ifndef")?),
        "else" => Directive::Else,
        "endif" => Directive::EndIf,
        "define" => {
            let name = first_operand("define")?;
            let value = operand[name.len()..].trim();
            Directive::Define(
                name,
                if value.is_empty() {
                    None
                } else {
                    Some(value.to_owned())
                },
            )
        }
        other => {
            log::debug!("Line {line_no}: leaving unknown directive #{other} as a plain line");
            return Ok(LineKind::Plain);
        }
    };

    Ok(LineKind::Directive(directive))
}

/// Every `#ifdef`/`#ifndef` must be closed by exactly one `#endif` at the same depth, with at
/// most one `#else` between them.
fn check_nesting(lines: &[Line]) -> Result<()> {
    // Line of each open conditional, and whether its `#else` has been seen.
    let mut open: Vec<(usize, bool)> = Vec::new();

    for line in lines {
        let LineKind::Directive(d) = &line.kind else {
            continue;
        };

        match d.kind() {
            DirectiveKind::If => open.push((line.line_no, false)),
            DirectiveKind::Else => match open.last_mut() {
                None => {
                    return Err(Error::malformed(
                        line.line_no,
                        "#else without a matching #ifdef or #ifndef",
                    ));
                }
                Some((start, true)) => {
                    return Err(Error::malformed(
                        line.line_no,
                        format!("second #else for the conditional opened at line {start}"),
                    ));
                }
                Some(block) => block.1 = true,
            },
            DirectiveKind::EndIf => {
                if open.pop().is_none() {
                    return Err(Error::malformed(
                        line.line_no,
                        "#endif without a matching #ifdef or #ifndef",
                    ));
                }
            }
            DirectiveKind::Include | DirectiveKind::Define => {}
        }
    }

    if let Some((start, _)) = open.last() {
        return Err(Error::malformed(
            *start,
            format!(
                "conditional is never closed by #endif ({} open at end of file)",
                open.len()
            ),
        ));
    }

    Ok(())
}

#[derive(Clone, Debug, Default)]
pub struct Topology {
    doc: TextDocument,
    /// Cached: set whenever the lines are rebuilt.
    uses_preprocessor: bool,
}

impl Topology {
    /// From the text of a topology or include file.
    pub fn new(text: &str) -> Result<Self> {
        Self::from_doc(TextDocument::parse(text, COMMENT_MARKER, classify)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::new(&text)
    }

    fn from_doc(doc: TextDocument) -> Result<Self> {
        check_nesting(doc.lines())?;

        let uses_preprocessor = doc
            .lines()
            .iter()
            .any(|l| matches!(l.kind, LineKind::Directive(_)));

        Ok(Self {
            doc,
            uses_preprocessor,
        })
    }

    /// Replace every line, e.g. when building a topology from structured data rather than text.
    /// On error, the existing lines are kept.
    pub fn set_data<I, S>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let doc = TextDocument::from_lines(lines, COMMENT_MARKER, classify)?;
        *self = Self::from_doc(doc)?;
        Ok(())
    }

    /// True if any include, conditional or define directive is present.
    pub fn contains_preprocessor_constructs(&self) -> bool {
        self.uses_preprocessor
    }

    /// Re-check conditional nesting against the current line kinds.
    pub fn validate(&self) -> Result<()> {
        check_nesting(self.doc.lines())
    }

    pub fn lines(&self) -> &[Line] {
        self.doc.lines()
    }

    pub fn len(&self) -> usize {
        self.doc.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.is_empty()
    }

    /// Edit a line in place. Its kind is not re-derived until the document is rebuilt.
    pub fn set_text(&mut self, i: usize, text: impl Into<String>) -> bool {
        self.doc.set_text(i, text)
    }

    fn directives(&self) -> impl Iterator<Item = &Directive> {
        self.doc.lines().iter().filter_map(|l| match &l.kind {
            LineKind::Directive(d) => Some(d),
            _ => None,
        })
    }

    /// Included file names, in order.
    pub fn includes(&self) -> Vec<&str> {
        self.directives()
            .filter_map(|d| match d {
                Directive::Include(p) => Some(p.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn defines(&self) -> Vec<(&str, Option<&str>)> {
        self.directives()
            .filter_map(|d| match d {
                Directive::Define(name, val) => Some((name.as_str(), val.as_deref())),
                _ => None,
            })
            .collect()
    }

    /// Macros tested by `#ifdef`/`#ifndef`, in order of appearance, without duplicates.
    pub fn conditional_macros(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        for d in self.directives() {
            if let Directive::IfDef(m) | Directive::IfNDef(m) = d {
                if !out.contains(&m.as_str()) {
                    out.push(m);
                }
            }
        }
        out
    }

    pub fn sections(&self) -> Vec<&str> {
        self.doc.sections()
    }

    /// Data lines of a section such as `atoms` or `moleculetype`. Lines inside conditional
    /// blocks are included regardless of the branch.
    pub fn section_lines<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Line> + 'a {
        self.doc.section_lines(name)
    }

    pub fn to_text(&self) -> String {
        self.doc.to_text()
    }

    /// Write lines verbatim, in their original order.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.doc.write(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOP: &str = r#"; Topology for a small peptide
#include "amber99sb-ildn.ff/forcefield.itp"

[ moleculetype ]
; name  nrexcl
Protein  3

[ atoms ]
     1   N3   1  ALA  N   1  0.1414  14.01
#ifdef POSRES
#include "posre.itp"  ; restraints
#else
# define NO_POSRES
#endif

#ifndef FLEXIBLE
#define HW_BOND 0.09572
#endif
#undef FLEXIBLE
"#;

    #[test]
    fn recognizes_directives() {
        let top = Topology::new(TOP).unwrap();

        assert!(top.contains_preprocessor_constructs());
        assert_eq!(
            top.includes(),
            vec!["amber99sb-ildn.ff/forcefield.itp", "posre.itp"]
        );
        assert_eq!(
            top.defines(),
            vec![("NO_POSRES", None), ("HW_BOND", Some("0.09572"))]
        );
        assert_eq!(top.conditional_macros(), vec!["POSRES", "FLEXIBLE"]);
        assert_eq!(top.sections(), vec!["moleculetype", "atoms"]);
        assert_eq!(top.section_lines("moleculetype").count(), 1);

        let undef = top.lines().last().unwrap();
        assert_eq!(undef.kind, LineKind::Plain);
    }

    #[test]
    fn round_trip_is_verbatim() {
        let top = Topology::new(TOP).unwrap();
        assert_eq!(top.to_text(), TOP);
    }

    #[test]
    fn plain_topology_has_no_constructs() {
        let top = Topology::new("[ atoms ]\n1 C\n#undef X\n#if 0\n").unwrap();
        assert!(!top.contains_preprocessor_constructs());
    }

    #[test]
    fn unclosed_conditional_names_its_line() {
        let err = Topology::new("[ atoms ]\n#ifdef A\n1 C\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 2, .. }));
    }

    #[test]
    fn stray_endif_and_else() {
        let err = Topology::new("1 C\n#endif\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 2, .. }));

        let err = Topology::new("#else\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 1, .. }));

        let err = Topology::new("#ifdef A\n#else\n#else\n#endif\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 3, .. }));
    }

    #[test]
    fn nested_conditionals_balance() {
        let text = "#ifdef A\n#ifndef B\n#endif\n#else\n#ifdef C\n#endif\n#endif\n";
        assert!(Topology::new(text).is_ok());

        let err = Topology::new("#ifdef A\n#ifdef B\n#endif\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 1, .. }));
    }

    #[test]
    fn missing_operands() {
        assert!(Topology::new("#include\n").is_err());
        assert!(Topology::new("#ifdef ; comment only\n#endif\n").is_err());
    }

    #[test]
    fn set_data_recomputes_flag() {
        let mut top = Topology::new("[ atoms ]\n1 C\n").unwrap();
        assert!(!top.contains_preprocessor_constructs());

        top.set_data(vec!["#include \"tip3p.itp\"", "[ molecules ]", "SOL 10"])
            .unwrap();
        assert!(top.contains_preprocessor_constructs());
        assert_eq!(top.includes(), vec!["tip3p.itp"]);

        // A failed rebuild keeps the old lines.
        assert!(top.set_data(vec!["#endif"]).is_err());
        assert_eq!(top.len(), 3);

        top.set_data(Vec::<String>::new()).unwrap();
        assert!(!top.contains_preprocessor_constructs());
        assert!(top.is_empty());
    }

    #[test]
    fn editing_does_not_reclassify() {
        let mut top = Topology::new("#include \"a.itp\"\n").unwrap();
        assert!(top.set_text(0, "; commented out"));
        assert!(matches!(top.lines()[0].kind, LineKind::Directive(_)));
        assert!(top.contains_preprocessor_constructs());
        assert_eq!(top.to_text(), "; commented out\n");
        assert!(top.validate().is_ok());
    }
}
