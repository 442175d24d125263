//! For reading and writing GROMACS XPM files. These are X PixMaps used as leveled 2D grids,
//! e.g. secondary structure over time (`gmx dssp`), or RMSD and contact matrices. Each pixel is
//! one or more characters, mapped through a legend to a numeric level and a color.
//!
//! Layout:
//! ```text
//! /* title:   "Secondary structure" */
//! static char *gromacs_xpm[] = {
//! "5 3   2 1",                         <- cols rows colors chars-per-pixel
//! "~  c #FFFFFF " /* "Coil" */,        <- legend
//! "E  c #FF0000 " /* "B-Sheet" */,
//! /* x-axis:  0 1 2 3 4 */
//! /* y-axis:  1 2 3 */
//! "~~EE~",                             <- highest y first
//! ...
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    fs::{self, File},
    io::{BufWriter, Write},
    path::Path,
    sync::LazyLock,
};

use regex::Regex;

use crate::{
    error::{Error, Result},
    format::Format,
};

static STRING_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^"([^"]*)""#).unwrap());
static LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"/\*\s*"(.*)"\s*\*/"#).unwrap());
static META_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/\*\s*([A-Za-z][\w\-]*)\s*:\s*(.*?)\s*\*/\s*,?$").unwrap()
});

/// Axis values per comment line when writing.
const AXIS_VALS_PER_LINE: usize = 16;

#[cfg_attr(feature = "encode", derive(bincode::Encode, bincode::Decode))]
#[derive(Clone, Debug, PartialEq)]
pub struct LegendEntry {
    /// The characters that stand for this level in the grid.
    pub symbol: String,
    /// The label as a number if it is one (continuous maps), otherwise the entry's position
    /// in the legend (discrete maps).
    pub level: f64,
    pub label: String,
    /// e.g. `#FF0000`
    pub color: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct Xpm {
    /// Comment fields such as `title`, `legend`, `x-label`, `y-label` and `type`; unquoted.
    pub metadata: BTreeMap<String, String>,
    rows: usize,
    cols: usize,
    chars_per_pixel: usize,
    legend: Vec<LegendEntry>,
    /// Legend indices, `[y][x]`, with y in axis order. (The file lists the highest y first.)
    pixels: Vec<Vec<usize>>,
    x_axis: Vec<f64>,
    y_axis: Vec<f64>,
    synthetic_x_axis: bool,
    synthetic_y_axis: bool,
}

struct Header {
    cols: usize,
    rows: usize,
    colors: usize,
    chars_per_pixel: usize,
    /// Characters per row.
    width: usize,
}

fn parse_header(s: &str, line_no: usize) -> Result<Header> {
    let nums: Vec<usize> = s
        .split_whitespace()
        .map(|t| t.parse())
        .collect::<std::result::Result<_, _>>()
        .map_err(|_| Error::parse(Format::Xpm, line_no, format!("invalid header: {s:?}")))?;

    if nums.len() < 4 {
        return Err(Error::parse(
            Format::Xpm,
            line_no,
            "header must declare columns, rows, colors and characters per pixel",
        ));
    }
    if nums[3] == 0 {
        return Err(Error::parse(Format::Xpm, line_no, "zero characters per pixel"));
    }

    let width = nums[0].checked_mul(nums[3]).ok_or_else(|| {
        Error::parse(Format::Xpm, line_no, format!("row width overflows: {s:?}"))
    })?;

    Ok(Header {
        cols: nums[0],
        rows: nums[1],
        colors: nums[2],
        chars_per_pixel: nums[3],
        width,
    })
}

/// e.g. `"A  c #FFFFFF " /* "0.5" */` -> symbol `A`, color `#FFFFFF`, label `0.5`.
fn parse_legend_entry(
    content: &str,
    line: &str,
    chars_per_pixel: usize,
    position: usize,
    line_no: usize,
) -> Result<LegendEntry> {
    let symbol: String = content.chars().take(chars_per_pixel).collect();
    if symbol.chars().count() != chars_per_pixel {
        return Err(Error::parse(
            Format::Xpm,
            line_no,
            format!("legend entry {content:?} is shorter than a pixel"),
        ));
    }

    let rest: String = content.chars().skip(chars_per_pixel).collect();
    let mut tokens = rest.split_whitespace();
    let color = match tokens.next() {
        Some("c") => tokens.next().map(str::to_owned),
        _ => None,
    };

    let label = LABEL_RE
        .captures(&line[content.len() + 2..])
        .map(|c| c[1].to_owned())
        .unwrap_or_else(|| symbol.clone());

    let level = label.trim().parse::<f64>().unwrap_or(position as f64);

    Ok(LegendEntry {
        symbol,
        level,
        label,
        color,
    })
}

fn parse_axis(values: &str, line_no: usize, out: &mut Vec<f64>) -> Result<()> {
    for v in values.split_whitespace() {
        out.push(v.parse().map_err(|_| {
            Error::parse(Format::Xpm, line_no, format!("invalid axis value {v:?}"))
        })?);
    }
    Ok(())
}

/// Checks an axis against its declared length. Absent axes become `0..n`; `n + 1` values are
/// bin edges, and become midpoints. Returns whether the axis was synthesized.
fn finish_axis(axis: &mut Vec<f64>, n: usize, what: &'static str, line: usize) -> Result<bool> {
    if axis.is_empty() {
        *axis = (0..n).map(|i| i as f64).collect();
        return Ok(true);
    }

    if axis.len() - 1 == n {
        log::debug!("Treating {} {what} values as bin edges", axis.len());
        *axis = axis.windows(2).map(|w| (w[0] + w[1]) / 2.).collect();
    }

    if axis.len() != n {
        return Err(Error::DimensionMismatch {
            what,
            declared: n,
            found: axis.len(),
            line,
        });
    }
    Ok(false)
}

impl Xpm {
    pub fn new(text: &str) -> Result<Self> {
        let mut result = Self::default();

        let mut header: Option<Header> = None;
        let mut symbols: HashMap<String, usize> = HashMap::new();
        // Body rows as they appear in the file: highest y first.
        let mut file_rows: Vec<Vec<usize>> = Vec::new();
        let mut x_axis_line = 0;
        let mut y_axis_line = 0;
        let mut last_line = 0;

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            last_line = line_no;

            if line.starts_with("/*") {
                let Some(caps) = META_RE.captures(line) else {
                    continue;
                };
                let key = caps[1].to_lowercase();
                let value = &caps[2];

                match key.as_str() {
                    "x-axis" => {
                        parse_axis(value, line_no, &mut result.x_axis)?;
                        x_axis_line = line_no;
                    }
                    "y-axis" => {
                        parse_axis(value, line_no, &mut result.y_axis)?;
                        y_axis_line = line_no;
                    }
                    _ => {
                        result
                            .metadata
                            .insert(key, value.trim_matches('"').to_owned());
                    }
                }
                continue;
            }

            let Some(caps) = STRING_RE.captures(line) else {
                continue; // `static char *...`, `};`, blank lines.
            };
            let content = caps.get(1).map(|m| m.as_str()).unwrap_or_default();

            if header.is_none() {
                header = Some(parse_header(content, line_no)?);
                continue;
            }
            let Some(hdr) = header.as_ref() else {
                continue;
            };

            if result.legend.len() < hdr.colors {
                let entry = parse_legend_entry(
                    content,
                    line,
                    hdr.chars_per_pixel,
                    result.legend.len(),
                    line_no,
                )?;
                symbols.insert(entry.symbol.clone(), result.legend.len());
                result.legend.push(entry);
                continue;
            }

            let chars: Vec<char> = content.chars().collect();
            if chars.len() != hdr.width {
                return Err(Error::DimensionMismatch {
                    what: "row width (characters)",
                    declared: hdr.width,
                    found: chars.len(),
                    line: line_no,
                });
            }

            let mut row = Vec::with_capacity(hdr.cols);
            for chunk in chars.chunks(hdr.chars_per_pixel) {
                let symbol: String = chunk.iter().collect();
                let idx = symbols.get(&symbol).ok_or_else(|| {
                    Error::parse(
                        Format::Xpm,
                        line_no,
                        format!("symbol {symbol:?} is not in the legend"),
                    )
                })?;
                row.push(*idx);
            }
            file_rows.push(row);
        }

        let Some(hdr) = header else {
            return Err(Error::parse(Format::Xpm, last_line, "missing XPM header"));
        };

        if result.legend.len() != hdr.colors {
            return Err(Error::DimensionMismatch {
                what: "legend entries",
                declared: hdr.colors,
                found: result.legend.len(),
                line: last_line,
            });
        }

        if file_rows.len() != hdr.rows {
            return Err(Error::DimensionMismatch {
                what: "rows",
                declared: hdr.rows,
                found: file_rows.len(),
                line: last_line,
            });
        }

        // Without rows, nothing in the file bounds the column count.
        if hdr.rows == 0 && hdr.cols > 0 && result.x_axis.is_empty() {
            return Err(Error::parse(
                Format::Xpm,
                last_line,
                format!("{} columns declared, but no rows and no x-axis", hdr.cols),
            ));
        }

        result.synthetic_x_axis = finish_axis(&mut result.x_axis, hdr.cols, "x-axis", x_axis_line)?;
        result.synthetic_y_axis = finish_axis(&mut result.y_axis, hdr.rows, "y-axis", y_axis_line)?;

        file_rows.reverse();
        result.pixels = file_rows;
        result.rows = hdr.rows;
        result.cols = hdr.cols;
        result.chars_per_pixel = hdr.chars_per_pixel;

        Ok(result)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::new(&text)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn chars_per_pixel(&self) -> usize {
        self.chars_per_pixel
    }

    pub fn legend(&self) -> &[LegendEntry] {
        &self.legend
    }

    pub fn lookup_symbol(&self, symbol: &str) -> Option<&LegendEntry> {
        self.legend.iter().find(|e| e.symbol == symbol)
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").map(String::as_str)
    }

    pub fn x_axis(&self) -> &[f64] {
        &self.x_axis
    }

    pub fn y_axis(&self) -> &[f64] {
        &self.y_axis
    }

    /// The x axis wasn't in the file, and is `0..cols`.
    pub fn synthetic_x_axis(&self) -> bool {
        self.synthetic_x_axis
    }

    pub fn synthetic_y_axis(&self) -> bool {
        self.synthetic_y_axis
    }

    pub fn has_synthetic_axes(&self) -> bool {
        self.synthetic_x_axis || self.synthetic_y_axis
    }

    /// Legend entry of a pixel. `y` is in axis order.
    pub fn entry_at(&self, x: usize, y: usize) -> Option<&LegendEntry> {
        let idx = self.pixels.get(y)?.get(x)?;
        self.legend.get(*idx)
    }

    pub fn value(&self, x: usize, y: usize) -> Option<f64> {
        self.entry_at(x, y).map(|e| e.level)
    }

    /// Levels, `[y][x]`, with y in axis order.
    pub fn values(&self) -> Vec<Vec<f64>> {
        self.pixels
            .iter()
            .map(|row| row.iter().map(|&i| self.legend[i].level).collect())
            .collect()
    }

    /// Checks the declared shape against the grid and axes.
    pub fn validate(&self) -> Result<()> {
        if self.pixels.len() != self.rows {
            return Err(Error::DimensionMismatch {
                what: "rows",
                declared: self.rows,
                found: self.pixels.len(),
                line: 0,
            });
        }
        for row in &self.pixels {
            if row.len() != self.cols {
                return Err(Error::DimensionMismatch {
                    what: "columns",
                    declared: self.cols,
                    found: row.len(),
                    line: 0,
                });
            }
        }
        for (axis, n, what) in [
            (&self.x_axis, self.cols, "x-axis"),
            (&self.y_axis, self.rows, "y-axis"),
        ] {
            if axis.len() != n {
                return Err(Error::DimensionMismatch {
                    what,
                    declared: n,
                    found: axis.len(),
                    line: 0,
                });
            }
        }
        Ok(())
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("/* XPM */\n");
        out.push_str("/* This file can be converted to EPS by the GROMACS program xpm2ps */\n");
        for (key, val) in &self.metadata {
            out.push_str(&format!("/* {key}: \"{val}\" */\n"));
        }
        out.push_str("static char *gromacs_xpm[] = {\n");
        out.push_str(&format!(
            "\"{} {}   {} {}\",\n",
            self.cols,
            self.rows,
            self.legend.len(),
            self.chars_per_pixel
        ));

        for e in &self.legend {
            let color = match &e.color {
                Some(c) => format!("c {c} "),
                None => String::new(),
            };
            out.push_str(&format!("\"{}  {color}\" /* \"{}\" */,\n", e.symbol, e.label));
        }

        for (axis, synthetic, name) in [
            (&self.x_axis, self.synthetic_x_axis, "x-axis"),
            (&self.y_axis, self.synthetic_y_axis, "y-axis"),
        ] {
            if synthetic {
                continue;
            }
            for chunk in axis.chunks(AXIS_VALS_PER_LINE) {
                let vals: Vec<String> = chunk.iter().map(|v| v.to_string()).collect();
                out.push_str(&format!("/* {name}:  {} */\n", vals.join(" ")));
            }
        }

        for (i, row) in self.pixels.iter().rev().enumerate() {
            let s: String = row
                .iter()
                .map(|&idx| self.legend[idx].symbol.as_str())
                .collect();
            let sep = if i + 1 == self.pixels.len() { "" } else { "," };
            out.push_str(&format!("\"{s}\"{sep}\n"));
        }
        out.push_str("};\n");

        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut f = BufWriter::new(File::create(path)?);
        f.write_all(self.to_text().as_bytes())?;
        f.flush()?;
        Ok(())
    }
}
