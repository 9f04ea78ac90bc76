//! `rusle`: run the basin erosion pipeline and post-process its tables.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rusle_core::erosion::SoilLossTable;
use rusle_core::export::{export_to_path, ExportFormat};
use rusle_core::source::CatalogSource;
use rusle_core::{PipelineConfig, RuslePipeline};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "rusle", version, about = "RUSLE soil-erosion estimation per subbasin")]
struct Cli {
    /// Debug-level logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Derive R, K, LS, C and LULC, stack them and write per-subbasin means.
    Run {
        /// Pipeline configuration JSON; built-in defaults when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Catalog directory holding catalog.json.
        #[arg(short = 'd', long, default_value = "data")]
        catalog: PathBuf,

        /// Output table.
        #[arg(short, long, default_value = "output/Subbasin_Factor_Means.csv")]
        output: PathBuf,

        /// Output format: csv or json.
        #[arg(short, long, default_value = "csv", value_parser = parse_format)]
        format: ExportFormat,

        /// Also write the soil-loss table here.
        #[arg(long)]
        soil_loss: Option<PathBuf>,
    },
    /// Append Soil_Erosion = R·K·LS·C to a factor table and print its mean.
    Erosion {
        /// Factor table with R, K, LS and C columns.
        #[arg(short, long, default_value = "Subbasin_Factor_Means.csv")]
        input: PathBuf,

        #[arg(short, long, default_value = "output/Subbasin_Soil_Erosion.csv")]
        output: PathBuf,
    },
    /// Print the default configuration as JSON.
    Defaults,
}

fn parse_format(s: &str) -> std::result::Result<ExportFormat, String> {
    s.parse().map_err(|e: rusle_core::Error| e.to_string())
}

/// Run summary printed to stdout.
#[derive(Serialize)]
struct Summary {
    subbasins: usize,
    pixel_counts: Vec<usize>,
    first_year: i32,
    last_year: i32,
    c_t_min: f64,
    c_t_max: f64,
    c_masked_pixels: usize,
    grid: String,
    elapsed_ms: u64,
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    Ok(())
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn run(
    config: Option<PathBuf>,
    catalog: PathBuf,
    output: PathBuf,
    format: ExportFormat,
    soil_loss: Option<PathBuf>,
) -> Result<()> {
    let cfg = match &config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let source = CatalogSource::open(&catalog)
        .with_context(|| format!("opening catalog {}", catalog.display()))?;

    let result = RuslePipeline::new(&source, cfg)
        .context("invalid pipeline configuration")?
        .run()
        .context("pipeline failed")?;

    ensure_parent(&output)?;
    export_to_path(&result.zonal, &output, format)
        .with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), "factor means written");

    if let Some(path) = soil_loss {
        let mut table = SoilLossTable::from_zonal(&result.zonal);
        let mean = table.add_soil_loss()?;
        ensure_parent(&path)?;
        table.to_path(&path).with_context(|| format!("writing {}", path.display()))?;
        println!("Mean Soil Erosion: {}", mean.map_or("n/a".to_string(), |m| m.to_string()));
    }

    let summary = Summary {
        subbasins: result.zonal.len(),
        pixel_counts: result.zonal.pixel_counts().to_vec(),
        first_year: result.years.start,
        last_year: result.years.end - 1,
        c_t_min: result.c_range.0,
        c_t_max: result.c_range.1,
        c_masked_pixels: result.c_masked,
        grid: result.stack.grid().describe(),
        elapsed_ms: result.elapsed_ms,
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn erosion(input: PathBuf, output: PathBuf) -> Result<()> {
    let mut table = SoilLossTable::from_path(&input)
        .with_context(|| format!("reading {}", input.display()))?;
    let mean = table.add_soil_loss().with_context(|| format!("computing soil loss for {}", input.display()))?;
    ensure_parent(&output)?;
    table.to_path(&output).with_context(|| format!("writing {}", output.display()))?;

    println!("Mean Soil Erosion: {}", mean.map_or("n/a".to_string(), |m| m.to_string()));
    println!("Processed data saved to: {}", output.display());
    Ok(())
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    match cli.command {
        Commands::Run { config, catalog, output, format, soil_loss } => {
            run(config, catalog, output, format, soil_loss)
        }
        Commands::Erosion { input, output } => erosion(input, output),
        Commands::Defaults => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
            Ok(())
        }
    }
}
