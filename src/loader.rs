use crate::sales::{SalesRecord, SalesTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;
use thiserror::Error;

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d-%m-%Y"];
const DATETIME_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

/// Reasons a sales file could not be loaded
///
/// The display strings are shown inline in place of the dashboard.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Error: CSV file not found. Please check the file path.")]
    NotFound,

    #[error("Error: The CSV file is empty.")]
    Empty,

    #[error("An error occurred while loading the data: missing column `{0}`")]
    MissingColumn(&'static str),

    #[error(
        "An error occurred while loading the data: invalid number {value:?} in column {column} on line {line}"
    )]
    InvalidNumber {
        line: usize,
        column: &'static str,
        value: String,
    },

    #[error("An error occurred while loading the data: {0}")]
    Io(std::io::Error),
}

impl From<std::io::Error> for LoadError {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            LoadError::NotFound
        } else {
            LoadError::Io(e)
        }
    }
}

/// Load the sales table from a CSV file
///
/// The first line is the header; columns are located by name so their order
/// doesn't matter and extra columns are ignored. Dates that fail to parse
/// become `None`, empty numeric cells become `None`.
///
/// # Arguments
/// * `filepath` - Path to the CSV file to load
///
/// # Returns
/// * `Result<SalesTable, LoadError>` - The parsed rows or the reason loading failed
///
/// # Examples
/// ```no_run
/// use wolfzy::loader::load_sales;
///
/// match load_sales("data/comp.csv") {
///     Ok(table) => println!("Loaded {} rows", table.len()),
///     Err(e) => eprintln!("{}", e),
/// }
/// ```
pub fn load_sales(filepath: impl AsRef<Path>) -> Result<SalesTable, LoadError> {
    let file = File::open(filepath)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines().enumerate();

    let header = loop {
        match lines.next() {
            Some((_, line)) => {
                let line = line?;
                if !line.trim().is_empty() {
                    break line;
                }
            }
            None => return Err(LoadError::Empty),
        }
    };

    let columns = ColumnIndex::from_header(&header)?;

    let mut records = Vec::new();
    for (index, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = parse_csv_row(&line);
        records.push(columns.record(&fields, index + 1)?);
    }

    Ok(SalesTable::new(records))
}

/// Positions of the required columns within a row
struct ColumnIndex {
    name: usize,
    country: usize,
    date: usize,
    profits: usize,
    revenue: usize,
    branches: usize,
}

impl ColumnIndex {
    fn from_header(header: &str) -> Result<Self, LoadError> {
        let names: Vec<String> = parse_csv_row(header.trim_start_matches('\u{feff}'))
            .into_iter()
            .map(|h| h.trim().to_string())
            .collect();

        let find = |wanted: &'static str| {
            names
                .iter()
                .position(|h| h == wanted)
                .ok_or(LoadError::MissingColumn(wanted))
        };

        Ok(Self {
            name: find("Name")?,
            country: find("Country")?,
            date: find("Date")?,
            profits: find("Profits")?,
            revenue: find("Revenue")?,
            branches: find("Branches")?,
        })
    }

    fn record(&self, fields: &[String], line: usize) -> Result<SalesRecord, LoadError> {
        let field = |i: usize| fields.get(i).map(|s| s.trim()).unwrap_or("");

        Ok(SalesRecord {
            name: field(self.name).to_string(),
            country: field(self.country).to_string(),
            date: parse_date(field(self.date)),
            profits: parse_number(field(self.profits), "Profits", line)?,
            revenue: parse_number(field(self.revenue), "Revenue", line)?,
            branches: parse_number(field(self.branches), "Branches", line)?,
        })
    }
}

/// Parse a calendar date, returning `None` for anything unrecognised
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

// Empty cells are missing values; `$` and thousands separators are tolerated
fn parse_number(
    value: &str,
    column: &'static str,
    line: usize,
) -> Result<Option<f64>, LoadError> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();

    if cleaned.is_empty() || cleaned.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }

    cleaned
        .parse::<f64>()
        .map(Some)
        .map_err(|_| LoadError::InvalidNumber {
            line,
            column,
            value: value.to_string(),
        })
}

// Parse a CSV row into a vector of strings
fn parse_csv_row(line: &str) -> Vec<String> {
    let mut result = Vec::new();
    let mut current_field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    // Doubled quote inside a quoted field is a literal quote
                    current_field.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                result.push(std::mem::take(&mut current_field));
            }
            _ => current_field.push(c),
        }
    }

    // Add the last field
    result.push(current_field);
    result
}

/// Keeps the parsed sales table and reparses only when the file changes
///
/// The cache key is the file's modification time.
pub struct SalesCache {
    path: PathBuf,
    slot: Mutex<Option<(SystemTime, Arc<SalesTable>)>>,
}

impl SalesCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            slot: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current table, reloading it if the file's mtime moved
    ///
    /// # Errors
    /// * Any `LoadError` from reading the file; a failed load leaves the
    ///   previous cache entry untouched
    pub fn get(&self) -> Result<Arc<SalesTable>, LoadError> {
        let modified = std::fs::metadata(&self.path)?.modified()?;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((cached_at, table)) = slot.as_ref() {
            if *cached_at == modified {
                return Ok(Arc::clone(table));
            }
        }

        log::debug!("parsing sales data from {}", self.path.display());
        let table = Arc::new(load_sales(&self.path)?);
        log::info!("loaded {} sales rows from {}", table.len(), self.path.display());
        *slot = Some((modified, Arc::clone(&table)));
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;

    const SAMPLE: &str = "\
Name,Country,Date,Profits,Revenue,Branches
Acme,India,2020-01-15,100.5,1000,3
\"Globex, Inc.\",Canada,2021/07/01,\"2,500\",9000,5
Initech,USA,garbage,300,3000,
";

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), contents).unwrap();
        file
    }

    #[test]
    fn loads_rows_and_coerces_bad_dates() {
        let file = write_csv(SAMPLE);
        let table = load_sales(file.path()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.records[0].name, "Acme");
        assert_eq!(table.records[0].profits, Some(100.5));
        assert_eq!(table.records[1].name, "Globex, Inc.");
        assert_eq!(table.records[1].profits, Some(2500.0));
        assert_eq!(
            table.records[1].date,
            NaiveDate::from_ymd_opt(2021, 7, 1)
        );
        assert_eq!(table.records[2].date, None);
        assert_eq!(table.records[2].branches, None);
    }

    #[test]
    fn columns_are_found_by_name() {
        let file = write_csv("Revenue,Extra,Branches,Date,Country,Profits,Name\n10,x,1,2022-02-02,UK,5,Wolf\n");
        let record = &load_sales(file.path()).unwrap().records[0];

        assert_eq!(record.name, "Wolf");
        assert_eq!(record.country, "UK");
        assert_eq!(record.revenue, Some(10.0));
        assert_eq!(record.profits, Some(5.0));
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_sales(dir.path().join("comp.csv")).unwrap_err();

        assert!(matches!(err, LoadError::NotFound));
        assert_eq!(
            err.to_string(),
            "Error: CSV file not found. Please check the file path."
        );
    }

    #[test]
    fn empty_file_is_reported() {
        let file = write_csv("");
        assert!(matches!(load_sales(file.path()), Err(LoadError::Empty)));

        let blank = write_csv("\n\n");
        assert!(matches!(load_sales(blank.path()), Err(LoadError::Empty)));
    }

    #[test]
    fn header_only_yields_an_empty_table() {
        let file = write_csv("Name,Country,Date,Profits,Revenue,Branches\n");
        assert!(load_sales(file.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_column_is_reported() {
        let file = write_csv("Name,Country,Date,Profits,Revenue\nA,B,2020-01-01,1,2\n");
        assert!(matches!(
            load_sales(file.path()),
            Err(LoadError::MissingColumn("Branches"))
        ));
    }

    #[test]
    fn non_numeric_value_names_the_line() {
        let file = write_csv("Name,Country,Date,Profits,Revenue,Branches\nA,B,2020-01-01,lots,2,3\n");
        match load_sales(file.path()) {
            Err(LoadError::InvalidNumber { line, column, .. }) => {
                assert_eq!(line, 2);
                assert_eq!(column, "Profits");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn date_formats() {
        let expected = NaiveDate::from_ymd_opt(2023, 4, 5);
        assert_eq!(parse_date("2023-04-05"), expected);
        assert_eq!(parse_date("2023/04/05"), expected);
        assert_eq!(parse_date("04/05/2023"), expected);
        assert_eq!(parse_date("05-04-2023"), expected);
        assert_eq!(parse_date("2023-04-05 13:45:00"), expected);
        assert_eq!(parse_date("2023-04-05T13:45:00+02:00"), expected);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("2023-13-40"), None);
    }

    #[test]
    fn csv_row_quoting() {
        assert_eq!(parse_csv_row("a,\"b,c\",d"), vec!["a", "b,c", "d"]);
        assert_eq!(parse_csv_row("\"say \"\"hi\"\"\",x"), vec!["say \"hi\"", "x"]);
        assert_eq!(parse_csv_row("a,,\r"), vec!["a", "", ""]);
    }

    #[test]
    fn cache_reparses_only_when_mtime_changes() {
        let file = write_csv(SAMPLE);
        let cache = SalesCache::new(file.path());

        let first = cache.get().unwrap();
        let second = cache.get().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        fs::write(
            file.path(),
            "Name,Country,Date,Profits,Revenue,Branches\nSolo,UK,2020-01-01,1,1,1\n",
        )
        .unwrap();
        let bumped = SystemTime::now() + Duration::from_secs(60);
        File::options()
            .write(true)
            .open(file.path())
            .unwrap()
            .set_modified(bumped)
            .unwrap();

        let reloaded = cache.get().unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn cache_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SalesCache::new(dir.path().join("missing.csv"));
        assert!(matches!(cache.get(), Err(LoadError::NotFound)));
    }
}
