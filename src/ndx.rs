//! For GROMACS index (`.ndx`) files: named, ordered lists of 1-based atom numbers used as
//! selections by most GROMACS tools.
//!
//! ```text
//! [ Protein ]
//!      1      2      3      4      5      6      7      8      9     10     11     12     13
//! [ SOL ]
//!   2001   2002   2003
//! ```
//!
//! Some tools list the same group name more than once. When loading, the first group with a
//! given name wins and later ones are dropped with a warning. Groups set through
//! [`IndexGroups::define_group`] replace existing ones.

use std::{
    fs,
    io::{self, BufWriter, Write},
    path::Path,
};

use tempfile::NamedTempFile;

use crate::{
    error::{DuplicateNameWarning, Error, NameOrigin, Result},
    format::Format,
    text_doc::section_name,
};

const INDICES_PER_LINE: usize = 15;
const INDEX_WIDTH: usize = 6;

#[cfg_attr(feature = "encode", derive(bincode::Encode, bincode::Decode))]
#[derive(Clone, Debug, PartialEq)]
pub struct IndexGroup {
    pub name: String,
    /// 1-based atom numbers. Order is significant, and repeats are allowed.
    pub indices: Vec<u32>,
}

/// Index groups by name, in insertion order.
#[derive(Clone, Debug, Default)]
pub struct IndexGroups {
    groups: Vec<IndexGroup>,
    warnings: Vec<DuplicateNameWarning>,
}

/// Group headers and their indices, with the header's line number.
fn parse_listing(raw: &str) -> Result<Vec<(usize, IndexGroup)>> {
    let mut out: Vec<(usize, IndexGroup)> = Vec::new();

    for (i, line) in raw.lines().enumerate() {
        let line_no = i + 1;
        let line = line.trim();

        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') {
            let name = section_name(line).ok_or_else(|| {
                Error::parse(Format::Ndx, line_no, format!("invalid group header {line:?}"))
            })?;
            out.push((
                line_no,
                IndexGroup {
                    name: name.to_owned(),
                    indices: Vec::new(),
                },
            ));
            continue;
        }

        let Some((_, group)) = out.last_mut() else {
            return Err(Error::parse(
                Format::Ndx,
                line_no,
                "atom indices before the first group header",
            ));
        };

        for token in line.split_whitespace() {
            let idx = token.parse::<u32>().map_err(|_| {
                Error::parse(Format::Ndx, line_no, format!("invalid atom index {token:?}"))
            })?;
            group.indices.push(idx);
        }
    }

    Ok(out)
}

fn write_groups<'a, W, I>(w: &mut W, groups: I) -> io::Result<()>
where
    W: Write,
    I: IntoIterator<Item = &'a IndexGroup>,
{
    for group in groups {
        writeln!(w, "[ {} ]", group.name)?;
        for chunk in group.indices.chunks(INDICES_PER_LINE) {
            let line: String = chunk
                .iter()
                .map(|i| format!("{i:>width$}", width = INDEX_WIDTH))
                .collect();
            writeln!(w, "{line}")?;
        }
    }
    Ok(())
}

impl IndexGroups {
    pub fn new() -> Self {
        Self::default()
    }

    /// From the text of an index file.
    pub fn from_text(text: &str) -> Result<Self> {
        let mut result = Self::new();
        result.load(text)?;
        Ok(result)
    }

    pub fn read(path: &Path) -> Result<Self> {
        let mut result = Self::new();
        result.load_file(path)?;
        Ok(result)
    }

    /// Add the groups of a raw listing, such as a tool's index output. A group whose name is
    /// already present, whether loaded earlier or defined, is discarded with a warning.
    /// On a parse error, nothing is added.
    pub fn load(&mut self, raw: &str) -> Result<()> {
        for (line, group) in parse_listing(raw)? {
            if self.contains(&group.name) {
                let warning = DuplicateNameWarning {
                    name: group.name,
                    origin: NameOrigin::IndexGroup { line },
                };
                log::warn!("{warning}");
                self.warnings.push(warning);
                continue;
            }
            self.groups.push(group);
        }
        Ok(())
    }

    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = fs::read_to_string(path)?;
        self.load(&text)
    }

    /// Insert a group, replacing any existing group of the same name in place.
    pub fn define_group(&mut self, name: impl Into<String>, indices: Vec<u32>) {
        let name = name.into();
        match self.groups.iter_mut().find(|g| g.name == name) {
            Some(existing) => existing.indices = indices,
            None => self.groups.push(IndexGroup { name, indices }),
        }
    }

    pub fn get(&self, name: &str) -> Option<&IndexGroup> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<IndexGroup> {
        let i = self.groups.iter().position(|g| g.name == name)?;
        Some(self.groups.remove(i))
    }

    pub fn names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name.as_str()).collect()
    }

    pub fn groups(&self) -> &[IndexGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Duplicate names dropped while loading.
    pub fn warnings(&self) -> &[DuplicateNameWarning] {
        &self.warnings
    }

    /// Groups in the requested order, or all of them in store order.
    fn select(&self, names: Option<&[&str]>) -> Result<Vec<&IndexGroup>> {
        match names {
            None => Ok(self.groups.iter().collect()),
            Some(names) => names
                .iter()
                .map(|n| self.get(n).ok_or_else(|| Error::UnknownGroup((*n).to_owned())))
                .collect(),
        }
    }

    pub fn to_text(&self, names: Option<&[&str]>) -> Result<String> {
        let groups = self.select(names)?;
        let mut buf = Vec::new();
        write_groups(&mut buf, groups)?;
        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
    }

    /// Write groups, in the order of `names` if given. Every name is checked before anything
    /// is written. The file is written beside `path` and then renamed over it, so an existing
    /// file is never left half-written.
    pub fn write(&self, path: &Path, names: Option<&[&str]>) -> Result<()> {
        let groups = self.select(names)?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        // Keep the mode of a file being replaced. New files get the usual umask-based mode
        // rather than the temp file's owner-only one.
        let existing = match fs::metadata(path) {
            Ok(meta) => Some(meta.permissions()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        let mut builder = tempfile::Builder::new();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            builder.permissions(fs::Permissions::from_mode(0o666));
        }
        let mut tmp = builder.tempfile_in(dir)?;
        if let Some(perms) = existing {
            tmp.as_file().set_permissions(perms)?;
        }
        {
            let mut w = BufWriter::new(tmp.as_file_mut());
            write_groups(&mut w, groups)?;
            w.flush()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        self.write(path, None)
    }
}

/// Several index files merged into one temporary file, for tools that only accept a single
/// index file. Groups are merged first-wins, in the order the files were given. The file is
/// deleted when this is dropped.
#[derive(Debug)]
pub struct CombinedIndex {
    file: NamedTempFile,
    groups: IndexGroups,
}

impl CombinedIndex {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn groups(&self) -> &IndexGroups {
        &self.groups
    }
}

pub fn combine_files<P: AsRef<Path>>(paths: &[P]) -> Result<CombinedIndex> {
    let mut groups = IndexGroups::new();
    for path in paths {
        groups.load_file(path.as_ref())?;
    }

    let mut file = tempfile::Builder::new()
        .prefix("multi_")
        .suffix(".ndx")
        .tempfile()?;
    {
        let mut w = BufWriter::new(file.as_file_mut());
        write_groups(&mut w, groups.groups())?;
        w.flush()?;
    }

    Ok(CombinedIndex { file, groups })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\
[ System ]
   1    2    3    4
   5    6
[ Protein ]
   1    2    3
[ SOL ]
   4    5    6
[ Protein ]
   9    9
";

    #[test]
    fn first_duplicate_wins_on_load() {
        let groups = IndexGroups::from_text(LISTING).unwrap();

        assert_eq!(groups.names(), vec!["System", "Protein", "SOL"]);
        assert_eq!(groups.get("System").unwrap().indices, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(groups.get("Protein").unwrap().indices, vec![1, 2, 3]);

        assert_eq!(groups.warnings().len(), 1);
        assert_eq!(groups.warnings()[0].name, "Protein");
        assert_eq!(
            groups.warnings()[0].origin,
            NameOrigin::IndexGroup { line: 8 }
        );
    }

    #[test]
    fn defined_groups_survive_load() {
        let mut groups = IndexGroups::new();
        groups.define_group("SOL", vec![100, 101]);
        groups.load(LISTING).unwrap();

        assert_eq!(groups.get("SOL").unwrap().indices, vec![100, 101]);
        assert_eq!(groups.names()[0], "SOL");
        assert_eq!(groups.warnings().len(), 2);
    }

    #[test]
    fn define_group_overwrites_in_place() {
        let mut groups = IndexGroups::from_text(LISTING).unwrap();
        groups.define_group("Protein", vec![7, 7, 3]);

        assert_eq!(groups.names(), vec!["System", "Protein", "SOL"]);
        assert_eq!(groups.get("Protein").unwrap().indices, vec![7, 7, 3]);

        assert_eq!(groups.remove("System").unwrap().indices.len(), 6);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn text_layout_and_order() {
        let mut groups = IndexGroups::new();
        groups.define_group("A", (1..=16).collect());
        groups.define_group("B", vec![]);

        let text = groups.to_text(Some(&["B", "A"][..])).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "[ B ]");
        assert_eq!(lines[1], "[ A ]");
        assert_eq!(lines[2].len(), INDICES_PER_LINE * INDEX_WIDTH);
        assert!(lines[2].starts_with("     1     2"));
        assert_eq!(lines[3], "    16");

        let back = IndexGroups::from_text(&text).unwrap();
        assert_eq!(back.names(), vec!["B", "A"]);
        assert_eq!(back.get("A"), groups.get("A"));
    }

    #[test]
    fn unknown_group() {
        let groups = IndexGroups::from_text(LISTING).unwrap();
        let err = groups.to_text(Some(&["System", "Ligand"][..])).unwrap_err();
        assert!(matches!(err, Error::UnknownGroup(name) if name == "Ligand"));
    }

    #[cfg(unix)]
    #[test]
    fn rewrite_keeps_file_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.ndx");
        fs::write(&path, "[ A ]\n1 2\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).unwrap();

        let mut groups = IndexGroups::read(&path).unwrap();
        groups.define_group("B", vec![3]);
        groups.save(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert_eq!(IndexGroups::read(&path).unwrap().names(), vec!["A", "B"]);
    }

    #[test]
    fn parse_errors_leave_store_unchanged() {
        let mut groups = IndexGroups::from_text("[ A ]\n1 2\n").unwrap();

        let err = groups.load("[ B ]\n1 x\n").unwrap_err();
        assert!(matches!(err, Error::Parse { line: 2, .. }));
        assert_eq!(groups.names(), vec!["A"]);

        assert!(IndexGroups::from_text("1 2 3\n[ A ]\n").is_err());
        assert!(IndexGroups::from_text("[  ]\n").is_err());
    }
}
