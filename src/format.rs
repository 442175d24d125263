//! The text formats this crate reads and writes, as a closed set. Each reader implements
//! [`TextFormat`]; [`Document`] wraps whichever one a file turned out to be.

use std::{
    fmt::{self, Display, Formatter},
    fs,
    path::Path,
};

use crate::{
    error::{Error, Result},
    ndx::IndexGroups,
    top::Topology,
    xpm::Xpm,
    xvg::Xvg,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    /// `.top`, `.itp`
    Topology,
    Xvg,
    Xpm,
    Ndx,
}

impl Format {
    /// Infer the format from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "top" | "itp" => Some(Self::Topology),
            "xvg" => Some(Self::Xvg),
            "xpm" => Some(Self::Xpm),
            "ndx" => Some(Self::Ndx),
            _ => None,
        }
    }
}

impl Display for Format {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let val = match self {
            Self::Topology => "topology",
            Self::Xvg => "XVG",
            Self::Xpm => "XPM",
            Self::Ndx => "index",
        };
        write!(f, "{val}")
    }
}

/// Parse, validate and write. Implemented by each format reader.
pub trait TextFormat: Sized {
    const FORMAT: Format;

    fn from_text(text: &str) -> Result<Self>;

    fn to_text(&self) -> Result<String>;

    /// Check the invariants of the format against the current contents.
    fn validate(&self) -> Result<()>;

    fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_text(&text)
    }

    fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_text()?)?;
        Ok(())
    }
}

impl TextFormat for Topology {
    const FORMAT: Format = Format::Topology;

    fn from_text(text: &str) -> Result<Self> {
        Topology::new(text)
    }

    fn to_text(&self) -> Result<String> {
        Ok(Topology::to_text(self))
    }

    fn validate(&self) -> Result<()> {
        Topology::validate(self)
    }
}

impl TextFormat for Xvg {
    const FORMAT: Format = Format::Xvg;

    fn from_text(text: &str) -> Result<Self> {
        Xvg::new(text)
    }

    fn to_text(&self) -> Result<String> {
        Ok(Xvg::to_text(self))
    }

    fn validate(&self) -> Result<()> {
        let n = self.n_rows();
        for col in self.columns() {
            if col.len() != n {
                return Err(Error::DimensionMismatch {
                    what: "column length",
                    declared: n,
                    found: col.len(),
                    line: 0,
                });
            }
        }
        Ok(())
    }
}

impl TextFormat for Xpm {
    const FORMAT: Format = Format::Xpm;

    fn from_text(text: &str) -> Result<Self> {
        Xpm::new(text)
    }

    fn to_text(&self) -> Result<String> {
        Ok(Xpm::to_text(self))
    }

    fn validate(&self) -> Result<()> {
        Xpm::validate(self)
    }
}

impl TextFormat for IndexGroups {
    const FORMAT: Format = Format::Ndx;

    fn from_text(text: &str) -> Result<Self> {
        IndexGroups::from_text(text)
    }

    fn to_text(&self) -> Result<String> {
        IndexGroups::to_text(self, None)
    }

    /// Names are unique by construction.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn save(&self, path: &Path) -> Result<()> {
        IndexGroups::save(self, path)
    }
}

#[derive(Clone, Debug)]
pub enum Document {
    Topology(Topology),
    Xvg(Xvg),
    Xpm(Xpm),
    Ndx(IndexGroups),
}

impl Document {
    pub fn parse(format: Format, text: &str) -> Result<Self> {
        Ok(match format {
            Format::Topology => Self::Topology(Topology::from_text(text)?),
            Format::Xvg => Self::Xvg(Xvg::from_text(text)?),
            Format::Xpm => Self::Xpm(Xpm::from_text(text)?),
            Format::Ndx => Self::Ndx(IndexGroups::from_text(text)?),
        })
    }

    /// Load a file, choosing the format from its extension.
    pub fn load(path: &Path) -> Result<Self> {
        let format =
            Format::from_path(path).ok_or_else(|| Error::UnsupportedFormat(path.to_owned()))?;
        let text = fs::read_to_string(path)?;
        Self::parse(format, &text)
    }

    pub fn format(&self) -> Format {
        match self {
            Self::Topology(_) => Format::Topology,
            Self::Xvg(_) => Format::Xvg,
            Self::Xpm(_) => Format::Xpm,
            Self::Ndx(_) => Format::Ndx,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Topology(d) => TextFormat::validate(d),
            Self::Xvg(d) => TextFormat::validate(d),
            Self::Xpm(d) => TextFormat::validate(d),
            Self::Ndx(d) => TextFormat::validate(d),
        }
    }

    pub fn to_text(&self) -> Result<String> {
        match self {
            Self::Topology(d) => TextFormat::to_text(d),
            Self::Xvg(d) => TextFormat::to_text(d),
            Self::Xpm(d) => TextFormat::to_text(d),
            Self::Ndx(d) => TextFormat::to_text(d),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        match self {
            Self::Topology(d) => TextFormat::save(d, path),
            Self::Xvg(d) => TextFormat::save(d, path),
            Self::Xpm(d) => TextFormat::save(d, path),
            Self::Ndx(d) => TextFormat::save(d, path),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_from_extension() {
        assert_eq!(Format::from_path(Path::new("a/topol.TOP")), Some(Format::Topology));
        assert_eq!(Format::from_path(Path::new("posre.itp")), Some(Format::Topology));
        assert_eq!(Format::from_path(Path::new("rmsd.xvg")), Some(Format::Xvg));
        assert_eq!(Format::from_path(Path::new("ss.xpm")), Some(Format::Xpm));
        assert_eq!(Format::from_path(Path::new("index.ndx")), Some(Format::Ndx));
        assert_eq!(Format::from_path(Path::new("traj.xtc")), None);
        assert_eq!(Format::from_path(Path::new("README")), None);
    }

    #[test]
    fn dispatch_by_format() {
        let doc = Document::parse(Format::Ndx, "[ A ]\n1 2\n").unwrap();
        assert_eq!(doc.format(), Format::Ndx);
        assert!(doc.validate().is_ok());
        assert!(doc.to_text().unwrap().starts_with("[ A ]"));

        let err = Document::parse(Format::Topology, "#endif\n").unwrap_err();
        assert!(matches!(err, Error::MalformedDirective { line: 1, .. }));

        let err = Document::load(Path::new("notes.txt")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }
}
