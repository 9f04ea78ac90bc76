//! Classified soil-loss map: joins a soil-loss table onto the subbasin
//! polygons, paints the five severity classes into a PNG and writes the
//! matching legend JSON.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use rusle_core::crs::Crs;
use rusle_core::erosion::{SoilLossTable, SOIL_EROSION};
use rusle_core::raster::{Bounds, Grid};
use rusle_core::vector::{AttributeValue, PolygonCollection};
use rusle_core::visual::{
    classify_raster, rasterize_attribute, render_rgba, severity_palette, Legend, SEVERITY_BREAKPOINTS,
    SEVERITY_CLASSES,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "visualize", about = "Render a classified soil-loss map and legend")]
struct Args {
    /// Soil-loss CSV (output of `rusle erosion`).
    #[arg(short, long, default_value = "output/Subbasin_Soil_Erosion.csv")]
    table: PathBuf,

    /// Subbasin polygons as a GeoJSON FeatureCollection.
    #[arg(short, long)]
    basins: PathBuf,

    /// CRS of the GeoJSON coordinates.
    #[arg(long, default_value = "EPSG:4326")]
    crs: String,

    /// Column present in both the table and the polygon attributes.
    #[arg(short, long, default_value = "HYBAS_ID")]
    key: String,

    /// Column to classify.
    #[arg(short, long, default_value = SOIL_EROSION)]
    attribute: String,

    /// Image width in pixels; height follows the basin aspect ratio.
    #[arg(short, long, default_value_t = 1024)]
    width: u32,

    #[arg(short, long, default_value = "output/soil_erosion.png")]
    output: PathBuf,

    #[arg(short, long, default_value = "output/soil_erosion_legend.json")]
    legend: PathBuf,
}

// ── Join ──────────────────────────────────────────────────────────────────────

/// Copy `attribute` from the table onto every polygon whose `key` matches a
/// row. Unmatched polygons get `Null` and stay transparent.
fn join_table(
    polygons: &PolygonCollection,
    table: &SoilLossTable,
    key: &str,
    attribute: &str,
) -> Result<(PolygonCollection, usize)> {
    let keys = table.column(key)?;
    let values = table.numeric_column(attribute)?;
    let by_key: HashMap<&str, Option<f64>> = table
        .rows
        .iter()
        .zip(values)
        .filter_map(|(row, v)| row.get(keys).map(|k| (k.as_str(), v)))
        .collect();

    let mut matched = 0;
    let mut joined = polygons.clone();
    for feature in &mut joined.features {
        let id = feature.get_property(key).map(|v| v.to_string()).unwrap_or_default();
        let value = match by_key.get(id.as_str()) {
            Some(&Some(v)) => {
                matched += 1;
                AttributeValue::Float(v)
            }
            _ => AttributeValue::Null,
        };
        feature.properties.insert(attribute.to_string(), value);
    }
    Ok((joined, matched))
}

/// Image grid `width` pixels wide over `bounds`.
fn render_grid(crs: Crs, bounds: Bounds, width: u32) -> Result<Grid> {
    if !(bounds.width() > 0.0 && bounds.height() > 0.0) {
        bail!("degenerate extent {}×{}", bounds.width(), bounds.height());
    }
    let cell = bounds.width() / width as f64;
    let max_pixels = u64::from(width) * u64::from(width) * 64;
    Ok(Grid::covering_limited(crs, bounds, cell, max_pixels, "map rendering")?)
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    if args.width == 0 {
        bail!("--width must be positive");
    }

    let crs: Crs = args.crs.parse().context("parsing --crs")?;
    let table = SoilLossTable::from_path(&args.table)
        .with_context(|| format!("reading {}", args.table.display()))?;
    let text = fs::read_to_string(&args.basins)
        .with_context(|| format!("reading {}", args.basins.display()))?;
    let polygons = PolygonCollection::from_geojson_str(&text, crs)?;

    let (joined, matched) = join_table(&polygons, &table, &args.key, &args.attribute)?;
    println!("Joined {matched} of {} subbasins on {}", joined.len(), args.key);

    let Some(bounds) = joined.bounds() else {
        bail!("{} has no polygon extent", args.basins.display());
    };
    let grid = render_grid(crs, bounds, args.width)
        .with_context(|| format!("cannot map {}", args.basins.display()))?;
    println!("Rendering {}×{} map…", grid.width, grid.height);

    let raster = rasterize_attribute(&joined, &args.attribute, &grid)?;
    let classes = classify_raster(&raster, &SEVERITY_BREAKPOINTS);
    let rgba = render_rgba(&classes, &severity_palette());

    for (i, class) in SEVERITY_CLASSES.iter().enumerate() {
        let n = classes.iter().filter(|c| **c == Some(i)).count();
        println!("  {:<18} {n} px", class.label);
    }

    for path in [&args.output, &args.legend] {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
        }
    }

    let img = image::RgbaImage::from_raw(grid.width as u32, grid.height as u32, rgba)
        .context("pixel buffer does not match the image size")?;
    img.save(&args.output)
        .with_context(|| format!("failed to save {}", args.output.display()))?;
    println!("Wrote {}", args.output.display());

    fs::write(&args.legend, Legend::severity().to_json()?)
        .with_context(|| format!("failed to save {}", args.legend.display()))?;
    println!("Wrote {}", args.legend.display());
    Ok(())
}
