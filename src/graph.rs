#![cfg(feature = "web")]
use crate::charts::{
    ChartSpec, ChoroplethSpec, DonutSpec, HeatmapSpec, HistogramSpec, ScatterSpec, TimeSeriesSpec,
};
use chrono::{Datelike, NaiveDate};
use plotters::prelude::*;
use std::error::Error;
use std::io::Cursor;

/// Errors from drawing or encoding a chart
pub type GraphError = Box<dyn Error + Send + Sync>;

const CAPTION_FONT: (&str, u32) = ("sans-serif", 30);

// Viridis control points, evenly spaced from 0.0 to 1.0
const VIRIDIS: [(u8, u8, u8); 5] = [
    (68, 1, 84),
    (59, 82, 139),
    (33, 145, 140),
    (94, 201, 98),
    (253, 231, 37),
];

/// Size of the rendered charts
///
/// Titles are carried by each `ChartSpec`.
#[derive(Clone, Debug)]
pub struct GraphOptions {
    /// Width of the graph in pixels
    pub width: u32,

    /// Height of the graph in pixels
    pub height: u32,
}

impl Default for GraphOptions {
    /// 800x600 pixels
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Render a chart spec to PNG bytes
///
/// # Arguments
/// * `spec` - The chart to draw
/// * `options` - Output size
///
/// # Returns
/// * A Result containing the PNG image data as bytes or an error
///
/// # Examples
/// ```no_run
/// use wolfzy::charts::{self, ChartKind};
/// use wolfzy::graph::{GraphOptions, render_png};
///
/// let spec = charts::build(ChartKind::Histogram, &[]);
/// let png = render_png(&spec, &GraphOptions::default()).unwrap();
/// std::fs::write("histogram.png", png).unwrap();
/// ```
pub fn render_png(spec: &ChartSpec, options: &GraphOptions) -> Result<Vec<u8>, GraphError> {
    let (width, height) = (options.width, options.height);
    let mut buffer = vec![0u8; width as usize * height as usize * 3];

    {
        let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
        root.fill(&WHITE)?;

        match spec {
            ChartSpec::ProfitsByCountry(s) => draw_country_bars(&root, s)?,
            ChartSpec::RevenueVsProfits(s) => draw_scatter(&root, s)?,
            ChartSpec::Branches(s) => draw_donut(&root, s)?,
            ChartSpec::Correlation(s) => draw_heatmap(&root, s)?,
            ChartSpec::Histogram(s) => draw_histogram(&root, s)?,
            ChartSpec::TimeSeries(s) | ChartSpec::MovingAverage(s) => draw_time_series(&root, s)?,
        }

        root.present()?;
    }

    encode_png(buffer, width, height)
}

/// Encode a raw RGB buffer as PNG
pub fn encode_png(buffer: Vec<u8>, width: u32, height: u32) -> Result<Vec<u8>, GraphError> {
    let image = image::RgbImage::from_raw(width, height, buffer)
        .ok_or("bitmap buffer does not match the image size")?;

    let mut png = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image).write_to(&mut png, image::ImageOutputFormat::Png)?;
    Ok(png.into_inner())
}

/// Sample the Viridis scale at `t` in `[0, 1]`
pub fn viridis(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    let lower = (scaled.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = scaled - lower as f64;

    let (r0, g0, b0) = VIRIDIS[lower];
    let (r1, g1, b1) = VIRIDIS[lower + 1];
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * frac).round() as u8;
    RGBColor(lerp(r0, r1), lerp(g0, g1), lerp(b0, b1))
}

// Blue for -1, white for 0, red for +1
fn diverging(value: f64) -> RGBColor {
    let v = value.clamp(-1.0, 1.0);
    let fade = |full: u8| (255.0 - (255.0 - full as f64) * v.abs()).round() as u8;
    if v >= 0.0 {
        RGBColor(fade(178), fade(24), fade(43))
    } else {
        RGBColor(fade(33), fade(102), fade(172))
    }
}

// Axis range padded so single values and flat data still get a visible span
fn padded_range(values: impl Iterator<Item = f64>, include_zero: bool) -> (f64, f64) {
    let (mut lo, mut hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if include_zero {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    let span = hi - lo;
    let pad = if span == 0.0 { 1.0 } else { span * 0.05 };
    (lo - pad, hi + pad)
}

type Area<'a> = DrawingArea<BitMapBackend<'a>, plotters::coord::Shift>;

/// Profits per country, bars coloured on the Viridis scale
///
/// Stands in for the map panel; plotters has no geographic projection.
fn draw_country_bars(root: &Area<'_>, spec: &ChoroplethSpec) -> Result<(), GraphError> {
    let names: Vec<&str> = spec.locations.iter().map(|l| l.country.as_str()).collect();
    let values: Vec<f64> = spec.locations.iter().map(|l| l.profits).collect();
    let (y_min, y_max) = padded_range(values.iter().copied(), true);
    let (v_min, v_max) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title, CAPTION_FONT.into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d((0..names.len().max(1) as i32).into_segmented(), y_min..y_max)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_desc("Country")
        .y_desc("Profits")
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) => names.get(*i as usize).map(|s| s.to_string()).unwrap_or_default(),
            _ => String::new(),
        })
        .draw()?;

    chart.draw_series(values.iter().enumerate().map(|(i, v)| {
        let t = if v_max > v_min { (v - v_min) / (v_max - v_min) } else { 0.5 };
        let mut bar = Rectangle::new(
            [
                (SegmentValue::Exact(i as i32), 0.0),
                (SegmentValue::Exact(i as i32 + 1), *v),
            ],
            viridis(t).filled(),
        );
        bar.set_margin(0, 0, 8, 8);
        bar
    }))?;

    Ok(())
}

/// Revenue against profits, one colour per country
fn draw_scatter(root: &Area<'_>, spec: &ScatterSpec) -> Result<(), GraphError> {
    let (x_min, x_max) = padded_range(spec.points.iter().map(|p| p.revenue), false);
    let (y_min, y_max) = padded_range(spec.points.iter().map(|p| p.profits), false);

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title, CAPTION_FONT.into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label)
        .y_desc(spec.y_label)
        .draw()?;

    let countries = spec.countries();
    for (i, country) in countries.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(
                spec.points
                    .iter()
                    .filter(|p| p.country == *country)
                    .map(|p| Circle::new((p.revenue, p.profits), 5, color.filled())),
            )?
            .label(*country)
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }

    if !countries.is_empty() {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    Ok(())
}

/// Share of rows per branch count, drawn as a ring
fn draw_donut(root: &Area<'_>, spec: &DonutSpec) -> Result<(), GraphError> {
    let area = root.titled(spec.title, CAPTION_FONT.into_font())?;
    let (width, height) = area.dim_in_pixel();
    let center = (width as i32 / 2, height as i32 / 2);
    let radius = width.min(height) as f64 * 0.38;

    let total: usize = spec.slices.iter().map(|s| s.count).sum();
    if total == 0 {
        return Ok(());
    }

    let point_at = |angle: f64, r: f64| {
        (
            center.0 + (r * angle.cos()).round() as i32,
            center.1 + (r * angle.sin()).round() as i32,
        )
    };

    // Start at twelve o'clock and go clockwise
    let mut start = -std::f64::consts::FRAC_PI_2;
    for (i, slice) in spec.slices.iter().enumerate() {
        let sweep = std::f64::consts::TAU * slice.count as f64 / total as f64;
        let steps = ((sweep.to_degrees() / 2.0).ceil() as usize).max(1);

        let mut points = vec![center];
        points.extend((0..=steps).map(|s| point_at(start + sweep * s as f64 / steps as f64, radius)));
        let color = Palette99::pick(i).to_rgba();
        area.draw(&Polygon::new(points, color.filled()))?;

        let mid = start + sweep / 2.0;
        let percent = 100.0 * slice.count as f64 / total as f64;
        area.draw(&Text::new(
            format!("{} ({:.1}%)", slice.label, percent),
            point_at(mid, radius * 1.12),
            ("sans-serif", 16).into_font(),
        ))?;

        start += sweep;
    }

    let hole = (radius * spec.hole).round() as i32;
    area.draw(&Circle::new(center, hole, WHITE.filled()))?;

    Ok(())
}

/// Correlation matrix as coloured cells with the coefficient printed inside
fn draw_heatmap(root: &Area<'_>, spec: &HeatmapSpec) -> Result<(), GraphError> {
    let n = spec.labels.len().max(1) as i32;
    let labels = &spec.labels;

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title, CAPTION_FONT.into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d((0..n).into_segmented(), (0..n).into_segmented())?;

    let label_of = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) => labels.get(*i as usize).map(|s| s.to_string()).unwrap_or_default(),
        _ => String::new(),
    };
    // Rows run top to bottom, so flip the y index
    let flipped = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) => labels
            .get((n - 1 - *i) as usize)
            .map(|s| s.to_string())
            .unwrap_or_default(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_mesh()
        .x_label_formatter(&label_of)
        .y_label_formatter(&flipped)
        .draw()?;

    for (i, row) in spec.matrix.iter().enumerate() {
        for (j, value) in row.iter().enumerate() {
            let (x, y) = (j as i32, n - 1 - i as i32);
            let fill = value.map(diverging).unwrap_or(RGBColor(220, 220, 220));
            chart.draw_series(std::iter::once(Rectangle::new(
                [
                    (SegmentValue::Exact(x), SegmentValue::Exact(y)),
                    (SegmentValue::Exact(x + 1), SegmentValue::Exact(y + 1)),
                ],
                fill.filled(),
            )))?;

            let text = value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "n/a".to_string());
            chart.draw_series(std::iter::once(Text::new(
                text,
                (SegmentValue::CenterOf(x), SegmentValue::CenterOf(y)),
                ("sans-serif", 20).into_font(),
            )))?;
        }
    }

    Ok(())
}

fn draw_histogram(root: &Area<'_>, spec: &HistogramSpec) -> Result<(), GraphError> {
    let (x_min, x_max) = padded_range(
        spec.bins.iter().flat_map(|b| [b.start, b.end]),
        false,
    );
    let max_count = spec.bins.iter().map(|b| b.count).max().unwrap_or(0);

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title, CAPTION_FONT.into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_min..x_max, 0f64..(max_count as f64 + 1.0))?;

    chart
        .configure_mesh()
        .x_desc(spec.x_label)
        .y_desc("count")
        .draw()?;

    chart.draw_series(spec.bins.iter().map(|b| {
        let mut bar = Rectangle::new([(b.start, 0.0), (b.end, b.count as f64)], BLUE.mix(0.7).filled());
        bar.set_margin(0, 0, 1, 1);
        bar
    }))?;

    Ok(())
}

/// One line per series, dates on the x axis
fn draw_time_series(root: &Area<'_>, spec: &TimeSeriesSpec) -> Result<(), GraphError> {
    let day = |d: &NaiveDate| d.num_days_from_ce() as f64;

    let (x_min, x_max) = padded_range(
        spec.series.iter().flat_map(|s| s.points.iter().map(|p| day(&p.date))),
        false,
    );
    let (y_min, y_max) = padded_range(
        spec.series
            .iter()
            .flat_map(|s| s.points.iter().filter_map(|p| p.value)),
        false,
    );

    let mut chart = ChartBuilder::on(root)
        .caption(spec.title, CAPTION_FONT.into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(80)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    chart
        .configure_mesh()
        .x_desc("Date")
        .y_desc(spec.y_label)
        .x_label_formatter(&|x| {
            NaiveDate::from_num_days_from_ce_opt(x.round() as i32)
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        })
        .draw()?;

    for (i, series) in spec.series.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba();
        chart
            .draw_series(LineSeries::new(
                series
                    .points
                    .iter()
                    .filter_map(|p| Some((day(&p.date), p.value?))),
                color.stroke_width(2),
            ))?
            .label(series.name)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2)));
    }

    if spec.series.len() > 1 {
        chart
            .configure_series_labels()
            .background_style(WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;
    }

    Ok(())
}
