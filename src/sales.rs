use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One row of the sales CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    /// Company name
    pub name: String,

    /// Country the company operates in
    pub country: String,

    /// Observation date; `None` when the CSV value could not be parsed
    pub date: Option<NaiveDate>,

    pub profits: Option<f64>,
    pub revenue: Option<f64>,
    pub branches: Option<f64>,
}

impl SalesRecord {
    /// Year of the observation, if the date parsed
    pub fn year(&self) -> Option<i32> {
        self.date.map(|d| d.year())
    }
}

/// The parsed sales file, rows kept in file order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SalesTable {
    pub records: Vec<SalesRecord>,
}

impl SalesTable {
    pub fn new(records: Vec<SalesRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct countries in order of first appearance
    pub fn countries(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.records
            .iter()
            .filter(|r| seen.insert(r.country.as_str()))
            .map(|r| r.country.clone())
            .collect()
    }

    /// Smallest and largest year among rows with a valid date
    pub fn year_bounds(&self) -> Option<(i32, i32)> {
        let mut years = self.records.iter().filter_map(SalesRecord::year);
        let first = years.next()?;
        Some(years.fold((first, first), |(lo, hi), y| (lo.min(y), hi.max(y))))
    }
}

/// Filter selections coming from the dashboard controls
///
/// Each `None` means "use the default", i.e. everything present in the data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SalesFilter {
    /// Selected countries
    pub countries: Option<Vec<String>>,

    /// First year of the inclusive range
    pub from: Option<i32>,

    /// Last year of the inclusive range
    pub to: Option<i32>,
}

/// A filter with every default filled in from the table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedFilter {
    pub countries: Vec<String>,
    pub from: i32,
    pub to: i32,
}

impl SalesFilter {
    /// Fill defaults from the data
    ///
    /// A table without a single valid date resolves to the year range
    /// `0..=0`; no row can pass it because every date is null.
    pub fn resolve(&self, table: &SalesTable) -> ResolvedFilter {
        let (min_year, max_year) = table.year_bounds().unwrap_or((0, 0));
        ResolvedFilter {
            countries: self
                .countries
                .clone()
                .unwrap_or_else(|| table.countries()),
            from: self.from.unwrap_or(min_year),
            to: self.to.unwrap_or(max_year),
        }
    }
}

impl ResolvedFilter {
    /// Whether a row passes both the country and the year predicate
    pub fn matches(&self, record: &SalesRecord) -> bool {
        self.countries.iter().any(|c| *c == record.country)
            && record
                .year()
                .is_some_and(|y| self.from <= y && y <= self.to)
    }

    /// Rows of `table` passing the filter, in file order
    pub fn apply<'a>(&self, table: &'a SalesTable) -> Vec<&'a SalesRecord> {
        table.records.iter().filter(|r| self.matches(r)).collect()
    }
}

/// The four KPIs shown above the charts
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    /// Number of distinct company names
    pub total_companies: usize,

    pub total_profits: f64,
    pub total_revenue: f64,

    /// Mean branch count, `None` if there is nothing to average
    pub average_branches: Option<f64>,
}

impl Summary {
    /// Compute the KPIs over a filtered set
    ///
    /// Null values are skipped; sums over nothing are zero.
    pub fn compute(rows: &[&SalesRecord]) -> Self {
        let total_companies = rows
            .iter()
            .map(|r| r.name.as_str())
            .collect::<HashSet<_>>()
            .len();

        // Folded from +0.0: `Sum for f64` yields -0.0 on an empty set
        let total_profits = rows.iter().filter_map(|r| r.profits).fold(0.0, |a, b| a + b);
        let total_revenue = rows.iter().filter_map(|r| r.revenue).fold(0.0, |a, b| a + b);

        let branches: Vec<f64> = rows.iter().filter_map(|r| r.branches).collect();
        let average_branches = if branches.is_empty() {
            None
        } else {
            Some(branches.iter().sum::<f64>() / branches.len() as f64)
        };

        Self {
            total_companies,
            total_profits,
            total_revenue,
            average_branches,
        }
    }

    pub fn profits_display(&self) -> String {
        format_currency(self.total_profits)
    }

    pub fn revenue_display(&self) -> String {
        format_currency(self.total_revenue)
    }

    pub fn average_branches_display(&self) -> String {
        match self.average_branches {
            Some(avg) => format!("{:.2}", avg),
            None => "N/A".to_string(),
        }
    }
}

/// Format an amount as dollars with thousands separators, e.g. `$1,234.50`
///
/// Negative amounts keep the sign after the dollar sign: `$-4,500.50`.
pub fn format_currency(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    // Rounding can turn a tiny negative into "0.00"; don't show "$-0.00"
    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("${sign}{grouped}.{cents}")
}
