//! For reading and writing XVG files: the Grace/XMGR plot tables written by most GROMACS
//! analysis tools. These hold `#` comments, `@` plotting commands (title, axis labels, one
//! legend entry per data set), and whitespace-separated numeric columns.

use std::{
    collections::BTreeMap,
    fmt,
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::error::{Error, Result};

static LEGEND_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)^s\d+\s+legend\s+"?(.*?)"?\s*$"#).unwrap());
static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^([^"]*?)\s*"(.*)"\s*$"#).unwrap());

/// A single table cell. Special float spellings (`nan`, `inf`, `-inf`) are numbers;
/// anything else that doesn't parse as a float is kept as categorical text.
#[derive(Clone, Debug)]
pub enum Value {
    Number(f64),
    Text(String),
}

impl Value {
    fn parse(field: &str) -> Self {
        match field.parse::<f64>() {
            Ok(v) => Self::Number(v),
            Err(_) => Self::Text(field.to_owned()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(v) => Some(*v),
            Self::Text(_) => None,
        }
    }
}

impl PartialEq for Value {
    /// NaN compares equal to NaN, so that tables with missing values compare as expected.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::Text(a), Self::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // `Display` for f64 is the shortest text that parses back to the same value.
            Self::Number(v) => write!(f, "{v}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

/// The value of an `@` command, and whether it was written in quotes.
#[derive(Clone, Debug, PartialEq)]
pub struct MetaEntry {
    pub value: String,
    pub quoted: bool,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct XvgOptions {
    /// Skip data lines whose column count doesn't match, instead of failing.
    pub permissive: bool,
}

#[derive(Clone, Debug, Default)]
pub struct Xvg {
    /// Comment lines, without the leading `#`. Kept so they can be written back.
    pub comments: Vec<String>,
    /// Keyed by lowercase, whitespace-normalized command name, e.g. `xaxis label` or
    /// `legend box on`.
    metadata: BTreeMap<String, MetaEntry>,
    /// One per data set, in the order they appeared.
    legends: Vec<String>,
    columns: Vec<Vec<Value>>,
    /// Column index to period, e.g. 360 for dihedrals in degrees.
    periodic: BTreeMap<usize, f64>,
    skipped_lines: usize,
}

impl Xvg {
    pub fn new(text: &str) -> Result<Self> {
        Self::with_options(text, XvgOptions::default())
    }

    pub fn with_options(text: &str, options: XvgOptions) -> Result<Self> {
        let mut result = Self::default();
        let mut n_cols = None;

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(comment) = line.strip_prefix('#') {
                result.comments.push(comment.to_owned());
                continue;
            }

            if let Some(cmd) = line.strip_prefix('@') {
                result.apply_command(cmd.trim());
                continue;
            }

            if line.starts_with('&') {
                // Data set separator in multi-set files; all sets share one table here.
                log::debug!("Line {line_no}: ignoring set separator");
                continue;
            }

            let fields: Vec<Value> = line.split_whitespace().map(Value::parse).collect();

            let expected = *n_cols.get_or_insert_with(|| {
                result.columns = vec![Vec::new(); fields.len()];
                fields.len()
            });

            if fields.len() != expected {
                if options.permissive {
                    log::warn!(
                        "Skipping line {line_no}: {} columns instead of {expected}",
                        fields.len()
                    );
                    result.skipped_lines += 1;
                    continue;
                }
                return Err(Error::ColumnMismatch {
                    line: line_no,
                    expected,
                    found: fields.len(),
                });
            }

            for (col, v) in result.columns.iter_mut().zip(fields) {
                col.push(v);
            }
        }

        Ok(result)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_options(path, XvgOptions::default())
    }

    pub fn load_with_options(path: &Path, options: XvgOptions) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::with_options(&text, options)
    }

    /// Build a table from columns, e.g. analysis results. Columns must share a length.
    pub fn from_columns(columns: Vec<Vec<Value>>) -> Result<Self> {
        if let Some(first) = columns.first() {
            for col in &columns[1..] {
                if col.len() != first.len() {
                    return Err(Error::DimensionMismatch {
                        what: "column length",
                        declared: first.len(),
                        found: col.len(),
                        line: 0,
                    });
                }
            }
        }

        Ok(Self {
            columns,
            ..Default::default()
        })
    }

    /// Parse the text of one `@` command (without the `@`).
    fn apply_command(&mut self, cmd: &str) {
        if let Some(caps) = LEGEND_RE.captures(cmd) {
            self.legends.push(caps[1].to_owned());
            return;
        }

        if let Some(caps) = QUOTED_RE.captures(cmd) {
            let key = normalize_key(&caps[1]);
            if !key.is_empty() {
                self.metadata.insert(
                    key,
                    MetaEntry {
                        value: caps[2].to_owned(),
                        quoted: true,
                    },
                );
                return;
            }
        }

        let tokens: Vec<&str> = cmd.split_whitespace().collect();
        if tokens.is_empty() {
            return;
        }

        // The trailing numbers are the value: `legend length 2`, `view 0.15, 0.15, 0.75, 0.85`.
        // Commands without one (`legend on`, `TYPE xy`) are kept whole, with an empty value.
        let n_value = tokens.iter().rev().take_while(|t| is_numeric_token(t)).count();
        let key_len = match tokens.len() - n_value {
            0 => tokens.len(),
            n => n,
        };

        self.metadata.insert(
            normalize_key(&tokens[..key_len].join(" ")),
            MetaEntry {
                value: tokens[key_len..].join(" "),
                quoted: false,
            },
        );
    }

    /// Look up a command value, e.g. `title` or `xaxis label`. Case-insensitive.
    ///
    /// Commands stored whole, such as `TYPE xy`, are also found by their leading words:
    /// `meta("type")` gives `xy`.
    pub fn meta(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        if let Some(entry) = self.metadata.get(&key) {
            return Some(&entry.value);
        }

        let prefix = format!("{key} ");
        self.metadata
            .iter()
            .rev()
            .find(|(k, e)| !e.quoted && e.value.is_empty() && k.starts_with(&prefix))
            .map(|(k, _)| &k[prefix.len()..])
    }

    pub fn metadata(&self) -> &BTreeMap<String, MetaEntry> {
        &self.metadata
    }

    /// Set a command value. It's written back quoted.
    pub fn set_meta(&mut self, key: &str, value: impl Into<String>) {
        self.metadata.insert(
            normalize_key(key),
            MetaEntry {
                value: value.into(),
                quoted: true,
            },
        );
    }

    pub fn title(&self) -> Option<&str> {
        self.meta("title")
    }

    pub fn x_label(&self) -> Option<&str> {
        self.meta("xaxis label")
    }

    pub fn y_label(&self) -> Option<&str> {
        self.meta("yaxis label")
    }

    pub fn legends(&self) -> &[String] {
        &self.legends
    }

    pub fn push_legend(&mut self, legend: impl Into<String>) {
        self.legends.push(legend.into());
    }

    /// A name per column: the x-axis label, then each data set's legend. Unlabeled columns
    /// get `x`, `y1`, `y2`...
    pub fn names(&self) -> Vec<String> {
        (0..self.n_columns())
            .map(|i| match i {
                0 => self.x_label().unwrap_or("x").to_owned(),
                _ => self
                    .legends
                    .get(i - 1)
                    .cloned()
                    .unwrap_or_else(|| format!("y{i}")),
            })
            .collect()
    }

    pub fn columns(&self) -> &[Vec<Value>] {
        &self.columns
    }

    pub fn column(&self, i: usize) -> Option<&[Value]> {
        self.columns.get(i).map(Vec::as_slice)
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn n_rows(&self) -> usize {
        self.columns.first().map(Vec::len).unwrap_or(0)
    }

    /// Number of data lines dropped while parsing in permissive mode.
    pub fn skipped_lines(&self) -> usize {
        self.skipped_lines
    }

    /// A column as floats. `None` if it doesn't exist, or holds categorical values.
    pub fn numeric_column(&self, i: usize) -> Option<Vec<f64>> {
        self.columns.get(i)?.iter().map(Value::as_f64).collect()
    }

    pub fn mean(&self, i: usize) -> Option<f64> {
        let vals = self.numeric_column(i)?;
        if vals.is_empty() {
            return None;
        }
        Some(vals.iter().sum::<f64>() / vals.len() as f64)
    }

    /// Population standard deviation.
    pub fn std(&self, i: usize) -> Option<f64> {
        let vals = self.numeric_column(i)?;
        let mean = self.mean(i)?;
        let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / vals.len() as f64;
        Some(var.sqrt())
    }

    /// Smallest value, ignoring NaN.
    pub fn min(&self, i: usize) -> Option<f64> {
        let vals = self.numeric_column(i)?;
        vals.into_iter().filter(|v| !v.is_nan()).reduce(f64::min)
    }

    /// Largest value, ignoring NaN.
    pub fn max(&self, i: usize) -> Option<f64> {
        let vals = self.numeric_column(i)?;
        vals.into_iter().filter(|v| !v.is_nan()).reduce(f64::max)
    }

    /// Mark a column as periodic, e.g. `set_periodic(1, 360.)` for a dihedral in degrees.
    pub fn set_periodic(&mut self, column: usize, period: f64) {
        self.periodic.insert(column, period);
    }

    pub fn periodic(&self, column: usize) -> Option<f64> {
        self.periodic.get(&column).copied()
    }

    /// `[x, y]` points for plotting `column` against column 0. If the column is periodic,
    /// each jump across the period boundary gets an interpolated point on both edges, with a
    /// NaN break between them, so a line plot doesn't streak across the whole range.
    ///
    /// The range is taken as `[-period/2, period/2)` if any value is negative, otherwise
    /// `[0, period)`. Stored data is not changed.
    pub fn periodic_view(&self, column: usize) -> Option<Vec<[f64; 2]>> {
        let xs = self.numeric_column(0)?;
        let ys = self.numeric_column(column)?;

        let Some(period) = self.periodic(column) else {
            return Some(xs.into_iter().zip(ys).map(|(x, y)| [x, y]).collect());
        };

        let lo = if ys.iter().any(|&y| y < 0.) {
            -period / 2.
        } else {
            0.
        };
        let hi = lo + period;

        let mut out = Vec::with_capacity(xs.len());
        for i in 0..xs.len() {
            if i > 0 {
                let (x0, a) = (xs[i - 1], ys[i - 1]);
                let (x1, b) = (xs[i], ys[i]);
                let d = b - a;

                // Edge left, edge entered, and the unwrapped position of `b`.
                let crossing = if d > period / 2. {
                    Some((lo, hi, b - period))
                } else if d < -period / 2. {
                    Some((hi, lo, b + period))
                } else {
                    None
                };

                if let Some((leave, enter, b_unwrapped)) = crossing {
                    let span = b_unwrapped - a;
                    let t = if span.abs() > f64::EPSILON {
                        ((leave - a) / span).clamp(0., 1.)
                    } else {
                        0.5
                    };
                    let xc = x0 + t * (x1 - x0);

                    out.push([xc, leave]);
                    out.push([f64::NAN, f64::NAN]);
                    out.push([xc, enter]);
                }
            }
            out.push([xs[i], ys[i]]);
        }

        Some(out)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();

        for c in &self.comments {
            out.push('#');
            out.push_str(c);
            out.push('\n');
        }

        for (key, entry) in &self.metadata {
            let line = if entry.quoted {
                format!("@    {key} \"{}\"", entry.value)
            } else if entry.value.is_empty() {
                format!("@    {key}")
            } else {
                format!("@    {key} {}", entry.value)
            };
            out.push_str(&line);
            out.push('\n');
        }

        for (i, legend) in self.legends.iter().enumerate() {
            out.push_str(&format!("@ s{i} legend \"{legend}\"\n"));
        }

        for row in 0..self.n_rows() {
            let fields: Vec<String> = self.columns.iter().map(|c| c[row].to_string()).collect();
            out.push_str(&fields.join("  "));
            out.push('\n');
        }

        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        f.write_all(self.to_text().as_bytes())?;
        f.flush()?;
        Ok(())
    }
}

/// A number, possibly with a trailing comma as in `@ world 0, 0, 10, 1`.
fn is_numeric_token(token: &str) -> bool {
    token.trim_end_matches(',').parse::<f64>().is_ok()
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
