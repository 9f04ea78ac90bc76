//! Directory-backed source: a `catalog.json` index plus single-band TIFFs
//! and GeoJSON files.
//!
//! ```json
//! {
//!   "rasters": {
//!     "UCSB-CHG/CHIRPS/PENTAD": {
//!       "crs": "EPSG:4326",
//!       "nodata": -9999,
//!       "scenes": [
//!         { "start": "2003-01-01", "end": "2003-01-06",
//!           "origin_x": 77.0, "origin_y": 31.0, "cell_size": 0.05,
//!           "bands": [ { "name": "precipitation", "path": "chirps/20030101.tif" } ] }
//!       ]
//!     }
//!   },
//!   "vectors": {
//!     "WWF/HydroSHEDS/v1/Basins/hybas_12": { "crs": "EPSG:4326", "path": "basins.geojson" }
//!   }
//! }
//! ```
//!
//! TIFF row 0 is the northern edge, matching the top-left grid origin.
//! Scenes are decoded lazily, only after the date filter.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Deserialize;
use tiff::decoder::{Decoder, DecodingResult};
use tracing::{debug, info};

use super::RasterSource;
use crate::collection::{DateRange, RasterCollection, Scene};
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::{Band, Grid, Raster};
use crate::vector::PolygonCollection;

pub const CATALOG_FILE: &str = "catalog.json";

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default)]
    rasters: BTreeMap<String, RasterEntry>,
    #[serde(default)]
    vectors: BTreeMap<String, VectorEntry>,
}

#[derive(Debug, Deserialize)]
struct RasterEntry {
    crs: Crs,
    /// Sentinel converted to NaN on read.
    #[serde(default)]
    nodata: Option<f64>,
    scenes: Vec<SceneEntry>,
}

#[derive(Debug, Deserialize)]
struct SceneEntry {
    #[serde(default)]
    start: Option<NaiveDate>,
    #[serde(default)]
    end: Option<NaiveDate>,
    origin_x: f64,
    origin_y: f64,
    cell_size: f64,
    bands: Vec<BandFile>,
}

#[derive(Debug, Deserialize)]
struct BandFile {
    name: String,
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct VectorEntry {
    crs: Crs,
    path: PathBuf,
}

/// Catalog directory opened from `<root>/catalog.json`.
#[derive(Debug)]
pub struct CatalogSource {
    root: PathBuf,
    catalog: CatalogFile,
}

impl CatalogSource {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let text = fs::read_to_string(root.join(CATALOG_FILE)).map_err(|e| with_path(e, &root.join(CATALOG_FILE)))?;
        let catalog: CatalogFile = serde_json::from_str(&text)?;
        info!(
            root = %root.display(),
            rasters = catalog.rasters.len(),
            vectors = catalog.vectors.len(),
            "catalog opened"
        );
        Ok(Self { root, catalog })
    }

    fn read_scene(&self, entry: &RasterEntry, scene: &SceneEntry) -> Result<Scene> {
        let mut grid: Option<Grid> = None;
        let mut bands = Vec::with_capacity(scene.bands.len());
        for bf in &scene.bands {
            let path = self.root.join(&bf.path);
            let (width, height, data) = read_tiff_band(&path, entry.nodata)?;
            let g = Grid::new(entry.crs, scene.origin_x, scene.origin_y, scene.cell_size, width, height);
            match grid {
                Some(existing) => existing.ensure_same(&g)?,
                None => grid = Some(g),
            }
            bands.push(Band { name: bf.name.clone(), data });
        }
        let grid = grid.ok_or_else(|| Error::InvalidInput("scene lists no bands".into()))?;
        Ok(Scene { start: scene.start, end: scene.end, raster: Raster { grid, bands } })
    }
}

impl RasterSource for CatalogSource {
    fn load(&self, name: &str, range: Option<&DateRange>) -> Result<RasterCollection> {
        let entry = self
            .catalog
            .rasters
            .get(name)
            .ok_or_else(|| Error::SourceUnavailable { name: name.to_string() })?;

        let selected: Vec<&SceneEntry> = entry
            .scenes
            .iter()
            .filter(|s| match (range, s.start) {
                (Some(r), Some(d)) => r.contains(d),
                _ => true,
            })
            .collect();
        if selected.is_empty() {
            let detail = match range {
                Some(r) => format!("no scenes between {} and {}", r.start, r.end),
                None => "collection has no scenes".into(),
            };
            return Err(Error::EmptyResult { name: name.to_string(), detail });
        }
        debug!(collection = name, scenes = selected.len(), "decoding scenes");

        let scenes = selected
            .into_iter()
            .map(|s| self.read_scene(entry, s))
            .collect::<Result<Vec<_>>>()?;
        Ok(RasterCollection::new(name, scenes))
    }

    fn load_polygons(&self, name: &str) -> Result<PolygonCollection> {
        let entry = self
            .catalog
            .vectors
            .get(name)
            .ok_or_else(|| Error::SourceUnavailable { name: name.to_string() })?;
        let path = self.root.join(&entry.path);
        let text = fs::read_to_string(&path).map_err(|e| with_path(e, &path))?;
        PolygonCollection::from_geojson_str(&text, entry.crs)
    }
}

fn with_path(e: io::Error, path: &Path) -> Error {
    Error::Io(io::Error::new(e.kind(), format!("{}: {e}", path.display())))
}

/// Decode a single-band TIFF into `(width, height, values)`.
fn read_tiff_band(path: &Path, nodata: Option<f64>) -> Result<(usize, usize, Vec<f64>)> {
    let file = fs::File::open(path).map_err(|e| with_path(e, path))?;
    let mut decoder = Decoder::new(BufReader::new(file))?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);

    #[allow(unreachable_patterns)]
    let mut data: Vec<f64> = match decoder.read_image()? {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        _ => {
            return Err(Error::InvalidInput(format!(
                "{}: unsupported TIFF sample type",
                path.display()
            )))
        }
    };

    if data.len() != width * height {
        return Err(Error::InvalidInput(format!(
            "{}: expected one sample per pixel ({}x{}), got {} values",
            path.display(),
            width,
            height,
            data.len()
        )));
    }
    if let Some(nd) = nodata {
        for v in &mut data {
            if *v == nd {
                *v = f64::NAN;
            }
        }
    }
    Ok((width, height, data))
}
