//! Chart specifications derived from the filtered sales rows.
//!
//! Every chart is a pure function of the filtered set; rendering lives in
//! [`crate::graph`]. The specs serialise to JSON for the `/api/charts` routes.

use crate::sales::SalesRecord;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Trailing window used by the moving-average panel
pub const MOVING_AVERAGE_WINDOW: usize = 3;

/// Hole size of the branches donut, as a fraction of the radius
pub const DONUT_HOLE: f64 = 0.3;

/// The seven dashboard panels, in tab order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChartKind {
    ProfitsByCountry,
    RevenueVsProfits,
    Branches,
    Correlation,
    Histogram,
    TimeSeries,
    MovingAverage,
}

impl ChartKind {
    pub const ALL: [ChartKind; 7] = [
        ChartKind::ProfitsByCountry,
        ChartKind::RevenueVsProfits,
        ChartKind::Branches,
        ChartKind::Correlation,
        ChartKind::Histogram,
        ChartKind::TimeSeries,
        ChartKind::MovingAverage,
    ];

    /// URL-friendly name used in routes and file names
    pub fn slug(self) -> &'static str {
        match self {
            ChartKind::ProfitsByCountry => "profits-by-country",
            ChartKind::RevenueVsProfits => "revenue-vs-profits",
            ChartKind::Branches => "branches",
            ChartKind::Correlation => "correlation",
            ChartKind::Histogram => "histogram",
            ChartKind::TimeSeries => "time-series",
            ChartKind::MovingAverage => "moving-average",
        }
    }

    /// Label of the dashboard tab
    pub fn tab_label(self) -> &'static str {
        match self {
            ChartKind::ProfitsByCountry => "Profits by Country",
            ChartKind::RevenueVsProfits => "Revenue vs Profits",
            ChartKind::Branches => "Employees by Branches",
            ChartKind::Correlation => "Correlation Heat Map",
            ChartKind::Histogram => "Profits Histogram",
            ChartKind::TimeSeries => "Profits Time Series",
            ChartKind::MovingAverage => "Profits Time Series with Moving Average",
        }
    }

    /// Title drawn on the chart itself
    pub fn title(self) -> &'static str {
        match self {
            ChartKind::ProfitsByCountry => "Total Profits by Country",
            ChartKind::RevenueVsProfits => "Revenue vs Profits",
            ChartKind::Branches => "Employees by Branches",
            ChartKind::Correlation => "Heat Map of Company",
            ChartKind::Histogram => "Profits Histogram",
            ChartKind::TimeSeries => "Profits Time Series",
            ChartKind::MovingAverage => "Profits Time Series with Moving Average",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Unknown chart name in a request
#[derive(Debug, thiserror::Error)]
#[error("unknown chart `{0}`")]
pub struct UnknownChart(pub String);

impl FromStr for ChartKind {
    type Err = UnknownChart;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChartKind::ALL
            .into_iter()
            .find(|kind| kind.slug() == s)
            .ok_or_else(|| UnknownChart(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountryProfits {
    pub country: String,
    pub profits: f64,
}

/// Data for the profits map, one entry per country
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChoroplethSpec {
    pub title: &'static str,
    pub color_scale: &'static str,
    pub locations: Vec<CountryProfits>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterPoint {
    pub name: String,
    pub country: String,
    pub revenue: f64,
    pub profits: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScatterSpec {
    pub title: &'static str,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub points: Vec<ScatterPoint>,
}

impl ScatterSpec {
    /// Countries in order of first appearance, used for colouring
    pub fn countries(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for point in &self.points {
            if !seen.contains(&point.country.as_str()) {
                seen.push(&point.country);
            }
        }
        seen
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonutSlice {
    /// Branch count shown as the slice label
    pub label: String,
    pub branches: f64,
    /// How many rows have that branch count
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DonutSpec {
    pub title: &'static str,
    pub hole: f64,
    pub slices: Vec<DonutSlice>,
}

/// Pairwise correlation of the numeric columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatmapSpec {
    pub title: &'static str,
    pub labels: Vec<&'static str>,
    /// `matrix[i][j]` correlates `labels[i]` with `labels[j]`; `None` when undefined
    pub matrix: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramBin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistogramSpec {
    pub title: &'static str,
    pub x_label: &'static str,
    pub bins: Vec<HistogramBin>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimePoint {
    pub date: NaiveDate,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub name: &'static str,
    pub points: Vec<TimePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeSeriesSpec {
    pub title: &'static str,
    pub y_label: &'static str,
    pub series: Vec<Series>,
}

/// Any of the seven panels
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ChartSpec {
    ProfitsByCountry(ChoroplethSpec),
    RevenueVsProfits(ScatterSpec),
    Branches(DonutSpec),
    Correlation(HeatmapSpec),
    Histogram(HistogramSpec),
    TimeSeries(TimeSeriesSpec),
    MovingAverage(TimeSeriesSpec),
}

/// Build the spec for one panel
pub fn build(kind: ChartKind, rows: &[&SalesRecord]) -> ChartSpec {
    match kind {
        ChartKind::ProfitsByCountry => ChartSpec::ProfitsByCountry(profits_by_country(rows)),
        ChartKind::RevenueVsProfits => ChartSpec::RevenueVsProfits(revenue_vs_profits(rows)),
        ChartKind::Branches => ChartSpec::Branches(branches_donut(rows)),
        ChartKind::Correlation => ChartSpec::Correlation(correlation_heatmap(rows)),
        ChartKind::Histogram => ChartSpec::Histogram(profits_histogram(rows)),
        ChartKind::TimeSeries => ChartSpec::TimeSeries(profits_time_series(rows)),
        ChartKind::MovingAverage => ChartSpec::MovingAverage(profits_moving_average(rows)),
    }
}

/// Sum of profits per country, sorted by country name
pub fn profits_by_country(rows: &[&SalesRecord]) -> ChoroplethSpec {
    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for row in rows {
        *totals.entry(row.country.as_str()).or_insert(0.0) += row.profits.unwrap_or(0.0);
    }

    ChoroplethSpec {
        title: ChartKind::ProfitsByCountry.title(),
        color_scale: "Viridis",
        locations: totals
            .into_iter()
            .map(|(country, profits)| CountryProfits {
                country: country.to_string(),
                profits,
            })
            .collect(),
    }
}

/// Revenue against profits, one point per row with both values
pub fn revenue_vs_profits(rows: &[&SalesRecord]) -> ScatterSpec {
    ScatterSpec {
        title: ChartKind::RevenueVsProfits.title(),
        x_label: "Revenue",
        y_label: "Profits",
        points: rows
            .iter()
            .filter_map(|row| {
                Some(ScatterPoint {
                    name: row.name.clone(),
                    country: row.country.clone(),
                    revenue: row.revenue?,
                    profits: row.profits?,
                })
            })
            .collect(),
    }
}

/// Value counts of the branch column, most frequent first
pub fn branches_donut(rows: &[&SalesRecord]) -> DonutSpec {
    let mut counts: Vec<(f64, usize)> = Vec::new();
    for branches in rows.iter().filter_map(|r| r.branches) {
        match counts.iter_mut().find(|(value, _)| *value == branches) {
            Some((_, count)) => *count += 1,
            None => counts.push((branches, 1)),
        }
    }
    counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.total_cmp(&b.0)));

    DonutSpec {
        title: ChartKind::Branches.title(),
        hole: DONUT_HOLE,
        slices: counts
            .into_iter()
            .map(|(branches, count)| DonutSlice {
                label: format_branches(branches),
                branches,
                count,
            })
            .collect(),
    }
}

fn format_branches(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Pearson correlation between Profits, Revenue and Branches
pub fn correlation_heatmap(rows: &[&SalesRecord]) -> HeatmapSpec {
    let columns: [fn(&SalesRecord) -> Option<f64>; 3] =
        [|r| r.profits, |r| r.revenue, |r| r.branches];

    let matrix = columns
        .iter()
        .map(|a| {
            columns
                .iter()
                .map(|b| {
                    let pairs: Vec<(f64, f64)> = rows
                        .iter()
                        .filter_map(|r| Some((a(*r)?, b(*r)?)))
                        .collect();
                    pearson(&pairs)
                })
                .collect()
        })
        .collect();

    HeatmapSpec {
        title: ChartKind::Correlation.title(),
        labels: vec!["Profits", "Revenue", "Branches"],
        matrix,
    }
}

/// Pearson correlation of paired observations
///
/// `None` with fewer than two pairs or when either side has no variance.
pub fn pearson(pairs: &[(f64, f64)]) -> Option<f64> {
    if pairs.len() < 2 {
        return None;
    }

    let n = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }
    Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

/// Equal-width histogram of profits, bin count from Sturges' rule
pub fn profits_histogram(rows: &[&SalesRecord]) -> HistogramSpec {
    let values: Vec<f64> = rows.iter().filter_map(|r| r.profits).collect();

    HistogramSpec {
        title: ChartKind::Histogram.title(),
        x_label: "Profits",
        bins: histogram(&values),
    }
}

pub fn histogram(values: &[f64]) -> Vec<HistogramBin> {
    let Some(first) = values.first() else {
        return Vec::new();
    };

    let (min, max) = values
        .iter()
        .fold((*first, *first), |(lo, hi), v| (lo.min(*v), hi.max(*v)));

    if min == max {
        return vec![HistogramBin {
            start: min - 0.5,
            end: max + 0.5,
            count: values.len(),
        }];
    }

    let bin_count = (values.len() as f64).log2().ceil() as usize + 1;
    let width = (max - min) / bin_count as f64;

    let mut bins: Vec<HistogramBin> = (0..bin_count)
        .map(|i| HistogramBin {
            start: min + width * i as f64,
            end: if i + 1 == bin_count {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();

    for v in values {
        // The maximum lands in the last (closed) bin
        let idx = (((v - min) / width) as usize).min(bin_count - 1);
        bins[idx].count += 1;
    }
    bins
}

fn profit_points(rows: &[&SalesRecord]) -> Vec<TimePoint> {
    rows.iter()
        .filter_map(|r| {
            Some(TimePoint {
                date: r.date?,
                value: r.profits,
            })
        })
        .collect()
}

/// Profits over time, in filtered row order
pub fn profits_time_series(rows: &[&SalesRecord]) -> TimeSeriesSpec {
    TimeSeriesSpec {
        title: ChartKind::TimeSeries.title(),
        y_label: "Profits",
        series: vec![Series {
            name: "Profits",
            points: profit_points(rows),
        }],
    }
}

/// Profits over time together with their trailing 3-period mean
pub fn profits_moving_average(rows: &[&SalesRecord]) -> TimeSeriesSpec {
    let profits = profit_points(rows);
    let values: Vec<Option<f64>> = profits.iter().map(|p| p.value).collect();
    let averaged = rolling_mean(&values, MOVING_AVERAGE_WINDOW)
        .into_iter()
        .zip(&profits)
        .map(|(value, p)| TimePoint {
            date: p.date,
            value,
        })
        .collect();

    TimeSeriesSpec {
        title: ChartKind::MovingAverage.title(),
        y_label: "value",
        series: vec![
            Series {
                name: "Profits",
                points: profits,
            },
            Series {
                name: "Profits_ma",
                points: averaged,
            },
        ],
    }
}

/// Trailing rolling mean
///
/// The first `window - 1` entries are `None`, as is any window containing a
/// missing value.
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    (0..values.len())
        .map(|i| {
            if i + 1 < window {
                return None;
            }
            let slice = &values[i + 1 - window..=i];
            let sum = slice.iter().copied().sum::<Option<f64>>()?;
            Some(sum / window as f64)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str, country: &str, day: u32, profits: f64, revenue: f64, branches: f64) -> SalesRecord {
        SalesRecord {
            name: name.to_string(),
            country: country.to_string(),
            date: NaiveDate::from_ymd_opt(2021, 1, day),
            profits: Some(profits),
            revenue: Some(revenue),
            branches: Some(branches),
        }
    }

    fn sample() -> Vec<SalesRecord> {
        vec![
            rec("Acme", "India", 1, 10.0, 100.0, 2.0),
            rec("Globex", "Canada", 2, 20.0, 210.0, 3.0),
            rec("Acme", "India", 3, 30.0, 290.0, 2.0),
            rec("Initech", "USA", 4, 40.0, 410.0, 5.0),
            rec("Hooli", "India", 5, 50.0, 500.0, 2.0),
        ]
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn slugs_round_trip() {
        for kind in ChartKind::ALL {
            assert_eq!(kind.slug().parse::<ChartKind>().unwrap(), kind);
        }
        assert!("pie".parse::<ChartKind>().is_err());
    }

    #[test]
    fn rolling_mean_leaves_first_two_periods_undefined() {
        let values = [Some(1.0), Some(2.0), Some(3.0), Some(4.0), Some(8.0)];
        let ma = rolling_mean(&values, 3);

        assert_eq!(ma[0], None);
        assert_eq!(ma[1], None);
        assert!(close(ma[2].unwrap(), 2.0));
        assert!(close(ma[3].unwrap(), 3.0));
        assert!(close(ma[4].unwrap(), 5.0));
    }

    #[test]
    fn rolling_mean_with_a_gap() {
        let values = [Some(1.0), None, Some(3.0), Some(4.0), Some(5.0)];
        let ma = rolling_mean(&values, 3);

        assert_eq!(ma, vec![None, None, None, None, Some(4.0)]);
        assert_eq!(rolling_mean(&values[..2], 3), vec![None, None]);
        assert!(rolling_mean(&[], 3).is_empty());
    }

    #[test]
    fn moving_average_series_matches_trailing_mean() {
        let data = sample();
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let spec = profits_moving_average(&rows);
        let ma = &spec.series[1];

        assert_eq!(ma.name, "Profits_ma");
        assert_eq!(ma.points.len(), 5);
        assert_eq!(ma.points[0].value, None);
        assert_eq!(ma.points[1].value, None);
        for i in 2..5 {
            let expected = (data[i - 2].profits.unwrap()
                + data[i - 1].profits.unwrap()
                + data[i].profits.unwrap())
                / 3.0;
            assert!(close(ma.points[i].value.unwrap(), expected));
        }
    }

    #[test]
    fn profits_grouped_by_country() {
        let data = sample();
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let spec = profits_by_country(&rows);

        let totals: Vec<(&str, f64)> = spec
            .locations
            .iter()
            .map(|l| (l.country.as_str(), l.profits))
            .collect();
        assert_eq!(totals, vec![("Canada", 20.0), ("India", 90.0), ("USA", 40.0)]);
    }

    #[test]
    fn donut_counts_branch_values() {
        let data = sample();
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let spec = branches_donut(&rows);

        let slices: Vec<(&str, usize)> = spec
            .slices
            .iter()
            .map(|s| (s.label.as_str(), s.count))
            .collect();
        assert_eq!(slices, vec![("2", 3), ("3", 1), ("5", 1)]);
        assert_eq!(spec.hole, 0.3);
    }

    #[test]
    fn correlation_matrix_shape_and_diagonal() {
        let data = sample();
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let spec = correlation_heatmap(&rows);

        assert_eq!(spec.matrix.len(), 3);
        for (i, row) in spec.matrix.iter().enumerate() {
            assert_eq!(row.len(), 3);
            assert!(close(row[i].unwrap(), 1.0));
        }
        // Profits and revenue move together almost perfectly
        assert!(spec.matrix[0][1].unwrap() > 0.99);
        assert_eq!(spec.matrix[0][1], spec.matrix[1][0]);
    }

    #[test]
    fn pearson_edge_cases() {
        assert_eq!(pearson(&[]), None);
        assert_eq!(pearson(&[(1.0, 2.0)]), None);
        assert_eq!(pearson(&[(1.0, 2.0), (1.0, 3.0)]), None);
        assert!(close(pearson(&[(1.0, 3.0), (2.0, 2.0), (3.0, 1.0)]).unwrap(), -1.0));
    }

    #[test]
    fn histogram_counts_every_value() {
        let values = [1.0, 2.0, 2.5, 3.0, 9.0, 10.0];
        let bins = histogram(&values);

        // Sturges: ceil(log2 6) + 1 = 4
        assert_eq!(bins.len(), 4);
        assert_eq!(bins.iter().map(|b| b.count).sum::<usize>(), values.len());
        assert_eq!(bins[0].start, 1.0);
        assert_eq!(bins[3].end, 10.0);
        assert_eq!(bins[3].count, 2);
    }

    #[test]
    fn histogram_of_identical_values_is_one_bin() {
        let bins = histogram(&[5.0, 5.0]);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[0].count, 2);
        assert!(histogram(&[]).is_empty());
    }

    #[test]
    fn scatter_skips_rows_missing_a_coordinate() {
        let mut data = sample();
        data[1].revenue = None;
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let spec = revenue_vs_profits(&rows);

        assert_eq!(spec.points.len(), 4);
        assert_eq!(spec.countries(), vec!["India", "USA"]);
    }

    #[test]
    fn chart_spec_serialises_with_kind_tag() {
        let data = sample();
        let rows: Vec<&SalesRecord> = data.iter().collect();

        let json = serde_json::to_value(build(ChartKind::TimeSeries, &rows)).unwrap();

        assert_eq!(json["kind"], "time-series");
        assert_eq!(json["title"], "Profits Time Series");
        assert_eq!(json["series"][0]["points"][0]["date"], "2021-01-01");
    }
}
