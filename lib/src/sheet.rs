//! The workbook on disk is the only persistent state. It is read in full,
//! changed in memory and written back through a temporary file, so a failed
//! update never leaves a half-written workbook behind.

use std::{
    collections::BTreeMap,
    fs::{self, Permissions},
    io::{self, Write},
    path::Path,
};

use calamine::{open_workbook, Data, Reader, Xlsx};
use rust_decimal::prelude::ToPrimitive;
use rust_xlsxwriter::{Format, Formula, Worksheet};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use crate::{error, types::PriceSample};

pub const DATE_HEADER: &str = "Date";
const CURRENCY_FORMAT: &str = r##""$"#,##0.00"##;
const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATE_TIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";
const DATE_COLUMN_WIDTH: f64 = 12.0;

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Text(String),
    Number(f64),
    /// A recorded price, shown as dollars and cents.
    Price(f64),
    /// An Excel date serial, shown as a date.
    Date(f64),
    Bool(bool),
    /// Formula text without the leading `=`.
    Formula(String),
}

impl Cell {
    fn from_data(data: &Data) -> Option<Self> {
        match data {
            Data::String(s) if s.is_empty() => None,
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => {
                Some(Self::Text(s.clone()))
            }
            Data::Float(f) => Some(Self::Number(*f)),
            Data::Int(i) => Some(Self::Number(*i as f64)),
            Data::Bool(b) => Some(Self::Bool(*b)),
            Data::DateTime(dt) => Some(Self::Date(dt.as_f64())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Date,
    Year(i32),
    Other,
}

impl From<&Cell> for Header {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Text(s) if s == DATE_HEADER => Self::Date,
            Cell::Text(s) => s.trim().parse().map_or(Self::Other, Self::Year),
            Cell::Number(n) if n.fract() == 0.0 => Self::Year(*n as i32),
            _ => Self::Other,
        }
    }
}

/// A named grid addressed by 1-based `(row, column)`, like the sheet itself.
#[derive(Debug, Clone, PartialEq)]
pub struct Sheet {
    name: String,
    cells: BTreeMap<(u32, u16), Cell>,
}

impl Sheet {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cells: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cell(&self, row: u32, col: u16) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    /// Non-empty cells of `row`, left to right.
    pub fn row(&self, row: u32) -> Vec<&Cell> {
        self.cells
            .range((row, 0)..=(row, u16::MAX))
            .map(|(_, cell)| cell)
            .collect()
    }

    /// The last row holding any data, or 0 for an empty sheet.
    pub fn max_row(&self) -> u32 {
        self.cells.keys().map(|(row, _)| *row).max().unwrap_or(0)
    }

    /// The last column holding any data, or 0 for an empty sheet.
    pub fn max_column(&self) -> u16 {
        self.cells.keys().map(|(_, col)| *col).max().unwrap_or(0)
    }

    fn set(&mut self, row: u32, col: u16, cell: Cell) {
        self.cells.insert((row, col), cell);
    }

    fn headers(&self) -> Vec<(u16, Header)> {
        self.cells
            .range((1, 0)..=(1, u16::MAX))
            .map(|(&(_, col), cell)| (col, Header::from(cell)))
            .collect()
    }

    /// Whether this sheet's header row has a Date column, i.e. it holds
    /// recorded prices rather than something the user keeps alongside.
    fn has_date_header(&self) -> bool {
        self.headers().iter().any(|(_, h)| *h == Header::Date)
    }

    /// Numbers under the year columns of a price sheet are prices written by
    /// an earlier run. Sheets without a Date header are left alone.
    fn mark_prices(&mut self) {
        if !self.has_date_header() {
            return;
        }
        let headers = self.headers();
        let year_cols: Vec<u16> = headers
            .iter()
            .filter(|(_, h)| matches!(h, Header::Year(_)))
            .map(|(col, _)| *col)
            .collect();
        for (&(row, col), cell) in self.cells.iter_mut() {
            if row > 1 && year_cols.contains(&col) {
                if let Cell::Number(n) = *cell {
                    *cell = Cell::Price(n);
                }
            }
        }
    }

    /// Write `date` and each sample's price into `row`, adding any year
    /// columns this sheet hasn't seen yet. Existing columns never move.
    pub fn record(
        &mut self,
        row: u32,
        date: &str,
        samples: &[PriceSample],
    ) -> Result<(), error::Sheet> {
        let mut years: Vec<i32> = samples.iter().map(|s| s.year).collect();
        years.sort_unstable();
        years.dedup();

        let headers = self.headers();
        if headers.is_empty() {
            self.set(1, 1, Cell::Text(DATE_HEADER.to_string()));
            for (col, year) in (2..).zip(&years) {
                self.set(1, col, Cell::Number(f64::from(*year)));
            }
        } else {
            let mut next = self.max_column() + 1;
            for year in years {
                if !headers.iter().any(|(_, h)| *h == Header::Year(year)) {
                    debug!(
                        sheet = %self.name,
                        year,
                        col = next,
                        "Adding year column"
                    );
                    self.set(1, next, Cell::Number(f64::from(year)));
                    next += 1;
                }
            }
        }

        let columns = self.headers();
        let date_col = columns
            .iter()
            .find(|(_, h)| *h == Header::Date)
            .map(|(col, _)| *col)
            .ok_or_else(|| {
                error::Sheet::MissingDateColumn(self.name.clone())
            })?;
        self.set(row, date_col, Cell::Text(date.to_string()));

        for sample in samples {
            let col = columns
                .iter()
                .find(|(_, h)| *h == Header::Year(sample.year))
                .map(|(col, _)| *col);
            let price = sample.price.round_dp(2).to_f64();
            if let (Some(col), Some(price)) = (col, price) {
                self.set(row, col, Cell::Price(price));
            }
        }
        Ok(())
    }

    fn write_to(
        &self,
        worksheet: &mut Worksheet,
        formats: &Formats,
    ) -> Result<(), rust_xlsxwriter::XlsxError> {
        let price_sheet = self.has_date_header();
        worksheet.set_name(&self.name)?;
        if price_sheet {
            worksheet.set_column_width(0, DATE_COLUMN_WIDTH)?;
        }
        for (&(row, col), cell) in &self.cells {
            let (row, col) = (row - 1, col - 1);
            let plain = if price_sheet && row == 0 {
                &formats.bold
            } else {
                &formats.plain
            };
            match cell {
                Cell::Text(s) => {
                    worksheet.write_string_with_format(row, col, s, plain)?
                }
                Cell::Number(n) => {
                    worksheet.write_number_with_format(row, col, *n, plain)?
                }
                Cell::Price(n) => worksheet.write_number_with_format(
                    row,
                    col,
                    *n,
                    &formats.currency,
                )?,
                Cell::Date(n) => {
                    let format = if n.fract() == 0.0 {
                        &formats.date
                    } else {
                        &formats.date_time
                    };
                    worksheet.write_number_with_format(row, col, *n, format)?
                }
                Cell::Bool(b) => {
                    worksheet.write_boolean_with_format(row, col, *b, plain)?
                }
                Cell::Formula(f) => worksheet.write_formula_with_format(
                    row,
                    col,
                    Formula::new(format!("={f}")),
                    plain,
                )?,
            };
        }
        Ok(())
    }
}

struct Formats {
    plain: Format,
    bold: Format,
    currency: Format,
    date: Format,
    date_time: Format,
}

impl Formats {
    fn new() -> Self {
        Self {
            plain: Format::new(),
            bold: Format::new().set_bold(),
            currency: Format::new().set_num_format(CURRENCY_FORMAT),
            date: Format::new().set_num_format(DATE_FORMAT),
            date_time: Format::new().set_num_format(DATE_TIME_FORMAT),
        }
    }
}

/// In-memory copy of the whole workbook, sheets kept in file order.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
}

impl Workbook {
    /// Read the workbook at `path`, or start an empty one if there is no
    /// file yet. Formulas are kept as formulas, not their cached values.
    #[instrument(err)]
    pub fn open(path: &Path) -> Result<Self, error::Sheet> {
        if !path.exists() {
            debug!("No workbook yet, starting a new one");
            return Ok(Self::default());
        }
        let mut xlsx: Xlsx<_> = open_workbook(path)?;
        let mut sheets = Vec::new();
        for name in xlsx.sheet_names() {
            let values = xlsx.worksheet_range(&name)?;
            let formulas = xlsx.worksheet_formula(&name)?;
            let mut sheet = Sheet::new(name);
            if let Some((first_row, first_col)) = values.start() {
                for (row, col, data) in values.used_cells() {
                    if let Some(cell) = Cell::from_data(data) {
                        sheet.place(first_row, first_col, row, col, cell);
                    }
                }
            }
            if let Some((first_row, first_col)) = formulas.start() {
                for (row, col, formula) in formulas.used_cells() {
                    let formula = formula.trim_start_matches('=');
                    if !formula.is_empty() {
                        let cell = Cell::Formula(formula.to_string());
                        sheet.place(first_row, first_col, row, col, cell);
                    }
                }
            }
            sheet.mark_prices();
            sheets.push(sheet);
        }
        Ok(Self { sheets })
    }

    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name == name)
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }

    /// Find the sheet called exactly `name`, appending it if missing.
    pub fn sheet_mut(&mut self, name: &str) -> &mut Sheet {
        let index = match self.sheets.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sheets.push(Sheet::new(name));
                self.sheets.len() - 1
            }
        };
        &mut self.sheets[index]
    }

    /// Replace the file at `path` with this workbook. The new contents go to
    /// a temporary file in the same directory first, which is then renamed
    /// over the old one. The old file's permissions carry over.
    #[instrument(skip(self), err)]
    pub fn save(&self, path: &Path) -> Result<(), error::Sheet> {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let formats = Formats::new();
        for sheet in &self.sheets {
            sheet.write_to(workbook.add_worksheet(), &formats)?;
        }
        let buffer = workbook.save_to_buffer()?;

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut file =
            NamedTempFile::new_in(dir).map_err(error::Sheet::FileWrite)?;
        file.write_all(&buffer).map_err(error::Sheet::FileWrite)?;
        if let Some(permissions) =
            permissions_for(path).map_err(error::Sheet::FileWrite)?
        {
            file.as_file()
                .set_permissions(permissions)
                .map_err(error::Sheet::FileWrite)?;
        }
        file.as_file().sync_all().map_err(error::Sheet::FileWrite)?;
        file.persist(path)?;
        Ok(())
    }
}

impl Sheet {
    /// Insert a cell read at `(row, col)` of a range starting at
    /// `(first_row, first_col)`, both 0-based.
    fn place(
        &mut self,
        first_row: u32,
        first_col: u32,
        row: usize,
        col: usize,
        cell: Cell,
    ) {
        let row = first_row + row as u32 + 1;
        if let Ok(col) = u16::try_from(first_col as usize + col + 1) {
            self.set(row, col, cell);
        }
    }
}

/// The permissions a saved workbook should end up with: whatever the
/// existing file has, or the usual `rw-r--r--` for a new one.
fn permissions_for(path: &Path) -> io::Result<Option<Permissions>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata.permissions())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            Ok(new_file_permissions())
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn new_file_permissions() -> Option<Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<Permissions> {
    None
}

/// Record one target's prices for the day: load, update its sheet, save.
/// On error the file on disk is left exactly as it was.
#[instrument(skip(samples), err, fields(num_samples = samples.len()))]
pub fn record(
    path: &Path,
    label: &str,
    row: u32,
    date: &str,
    samples: &[PriceSample],
) -> Result<(), error::Sheet> {
    let mut workbook = Workbook::open(path)?;
    workbook.sheet_mut(label).record(row, date, samples)?;
    workbook.save(path)?;
    info!("Saved prices");
    Ok(())
}

/// Reads the styles a saved workbook applies to single cells, straight from
/// the xlsx parts.
#[cfg(test)]
pub(crate) mod saved {
    use std::{fs::File, io::Read, path::Path};

    #[derive(Debug, PartialEq)]
    pub(crate) struct Style {
        pub num_format: Option<String>,
        pub bold: bool,
    }

    fn part(path: &Path, name: &str) -> String {
        let mut archive =
            zip::ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name(name)
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    /// The xml of the `index`-th sheet, counting from 1 in file order.
    pub(crate) fn sheet_xml(path: &Path, index: usize) -> String {
        part(path, &format!("xl/worksheets/sheet{index}.xml"))
    }

    fn attr<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
        let key = format!(" {name}=\"");
        let start = tag.find(&key)? + key.len();
        let len = tag[start..].find('"')?;
        Some(&tag[start..start + len])
    }

    /// The body of `<tag ...>...</tag>`, without the opening tag.
    fn section<'a>(xml: &'a str, tag: &str) -> &'a str {
        let start = xml.find(&format!("<{tag}")).unwrap_or(xml.len());
        let end = xml.find(&format!("</{tag}>")).unwrap_or(xml.len());
        let body = &xml[start..end.max(start)];
        body.find('>').map_or("", |open| &body[open + 1..])
    }

    pub(crate) fn style(path: &Path, sheet: usize, cell: &str) -> Style {
        let xml = sheet_xml(path, sheet);
        let at = xml
            .find(&format!("<c r=\"{cell}\""))
            .unwrap_or_else(|| panic!("no cell {cell} in sheet {sheet}"));
        let tag = &xml[at + 2..];
        let tag = &tag[..tag.find('>').unwrap()];
        let index: usize = attr(tag, "s").unwrap_or("0").parse().unwrap();

        let styles = part(path, "xl/styles.xml");
        let xf = section(&styles, "cellXfs")
            .split("<xf")
            .skip(1)
            .nth(index)
            .unwrap();
        let num_fmt = attr(xf, "numFmtId").unwrap_or("0");
        let font: usize = attr(xf, "fontId").unwrap_or("0").parse().unwrap();

        let num_format = (num_fmt != "0").then(|| {
            section(&styles, "numFmts")
                .split("<numFmt")
                .skip(1)
                .find(|f| attr(f, "numFmtId") == Some(num_fmt))
                .and_then(|f| attr(f, "formatCode"))
                .map_or_else(
                    || format!("builtin {num_fmt}"),
                    |code| code.replace("&quot;", "\"").replace("&amp;", "&"),
                )
        });
        let bold = section(&styles, "fonts")
            .split("</font>")
            .nth(font)
            .is_some_and(|f| f.contains("<b/>"));
        Style { num_format, bold }
    }
}
