#![cfg(not(tarpaulin_include))]
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use wolfzy::charts::{self, ChartKind};
use wolfzy::graph::{self, GraphOptions};
use wolfzy::{SalesFilter, load_sales};

/// Render every dashboard chart for a CSV file into a directory of PNGs
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// CSV file with the sales data
    #[arg(long, default_value = "data/comp.csv")]
    csv: PathBuf,

    /// Directory the PNG files are written to
    #[arg(long, default_value = "charts")]
    out: PathBuf,

    /// Restrict to these countries (repeatable)
    #[arg(long = "country")]
    countries: Vec<String>,

    /// First year of the range
    #[arg(long)]
    from: Option<i32>,

    /// Last year of the range
    #[arg(long)]
    to: Option<i32>,

    #[arg(long, default_value_t = 900)]
    width: u32,

    #[arg(long, default_value_t = 550)]
    height: u32,
}

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let table = load_sales(&args.csv)?;
    let filter = SalesFilter {
        countries: (!args.countries.is_empty()).then(|| args.countries.clone()),
        from: args.from,
        to: args.to,
    }
    .resolve(&table);
    let rows = filter.apply(&table);
    log::info!(
        "{} of {} rows match {:?} in {}..={}",
        rows.len(),
        table.len(),
        filter.countries,
        filter.from,
        filter.to
    );

    fs::create_dir_all(&args.out)?;
    let options = GraphOptions {
        width: args.width,
        height: args.height,
    };

    for kind in ChartKind::ALL {
        let spec = charts::build(kind, &rows);
        let png = graph::render_png(&spec, &options)?;
        let path = args.out.join(format!("{}.png", kind.slug()));
        fs::write(&path, png)?;
        println!("Created {} chart at {}", kind, path.display());
    }

    Ok(())
}
