//! Per-subbasin mean of every stack band.
//!
//! A pixel belongs to a subbasin when its centre lies inside the polygon.
//! Polygons are processed in parallel, but each polygon's sums are
//! accumulated in row-major order so reruns are bit-identical.

use std::collections::BTreeSet;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::{Grid, Raster};
use crate::reproject::coarsen;
use crate::vector::{AttributeValue, PolygonCollection, PolygonFeature};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZonalParams {
    /// Aggregation resolution in metres; coarser than the stack means the
    /// stack is resampled (nearest) first.
    pub scale_m: f64,
    pub max_pixels: u64,
}

impl Default for ZonalParams {
    fn default() -> Self {
        Self { scale_m: 1000.0, max_pixels: 475_160_679 }
    }
}

/// Subbasins with one mean attribute per band. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalResult {
    collection: PolygonCollection,
    attribute_keys: Vec<String>,
    bands: Vec<String>,
    pixel_counts: Vec<usize>,
}

impl ZonalResult {
    pub fn features(&self) -> &[PolygonFeature] {
        &self.collection.features
    }

    pub fn collection(&self) -> &PolygonCollection {
        &self.collection
    }

    /// Input attribute keys, sorted, excluding the band columns.
    pub fn attribute_keys(&self) -> &[String] {
        &self.attribute_keys
    }

    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    /// Pixel centres inside each subbasin, in feature order.
    pub fn pixel_counts(&self) -> &[usize] {
        &self.pixel_counts
    }

    pub fn len(&self) -> usize {
        self.collection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collection.is_empty()
    }

    /// Mean of `band` for feature `index`; `None` for no-data.
    pub fn mean(&self, index: usize, band: &str) -> Option<f64> {
        self.collection.features.get(index)?.get_property(band)?.as_f64()
    }
}

/// Pixel window `[r0, r1) × [c0, c1)` of `grid` that can hold centres of
/// `feature`, or `None` if it misses the grid entirely.
fn window(grid: &Grid, feature: &PolygonFeature) -> Option<(usize, usize, usize, usize)> {
    let b = feature.bounds()?;
    let (fc0, fr0) = grid.locate(b.min_x, b.max_y);
    let (fc1, fr1) = grid.locate(b.max_x, b.min_y);
    let c0 = fc0.floor().max(0.0) as usize;
    let r0 = fr0.floor().max(0.0) as usize;
    let c1 = (fc1.ceil().max(0.0) as usize).min(grid.width);
    let r1 = (fr1.ceil().max(0.0) as usize).min(grid.height);
    (c0 < c1 && r0 < r1).then_some((r0, r1, c0, c1))
}

/// Sums and valid counts per band for one polygon, plus the centre count.
fn accumulate(raster: &Raster, feature: &PolygonFeature, max_pixels: u64) -> Result<(Vec<Option<f64>>, usize)> {
    let grid = &raster.grid;
    let n_bands = raster.bands.len();
    let Some((r0, r1, c0, c1)) = window(grid, feature) else {
        return Ok((vec![None; n_bands], 0));
    };
    let pixels = ((r1 - r0) * (c1 - c0)) as u64;
    if pixels > max_pixels {
        return Err(Error::ResourceLimitExceeded { stage: "zonal aggregation", pixels, limit: max_pixels });
    }

    let mut sums = vec![0.0f64; n_bands];
    let mut counts = vec![0usize; n_bands];
    let mut inside = 0usize;
    for r in r0..r1 {
        for c in c0..c1 {
            let (x, y) = grid.pixel_center(r, c);
            if !feature.contains(x, y) {
                continue;
            }
            inside += 1;
            let i = r * grid.width + c;
            for (b, band) in raster.bands.iter().enumerate() {
                let v = band.data[i];
                if !v.is_nan() {
                    sums[b] += v;
                    counts[b] += 1;
                }
            }
        }
    }

    let means = sums
        .iter()
        .zip(&counts)
        .map(|(&s, &n)| (n > 0).then(|| s / n as f64))
        .collect();
    Ok((means, inside))
}

/// Mean of every band of `stack` inside every polygon of `zones`.
///
/// `zones` must be in the stack CRS. Each output feature keeps its input
/// attributes and gains one `Float` (or `Null`) attribute per band.
pub fn zonal_means(stack: &Raster, zones: &PolygonCollection, params: &ZonalParams) -> Result<ZonalResult> {
    if zones.crs != stack.grid.crs {
        return Err(Error::CrsMismatch {
            expected: stack.grid.crs.to_string(),
            found: zones.crs.to_string(),
        });
    }
    if params.scale_m.is_nan() || params.scale_m <= 0.0 {
        return Err(Error::InvalidInput(format!("zonal scale must be positive, got {}", params.scale_m)));
    }

    let coarse;
    let raster = if params.scale_m > stack.grid.scale_m() * (1.0 + 1e-9) {
        let grid = stack.grid.with_cell_size(params.scale_m * stack.grid.crs.units_per_metre());
        coarse = coarsen(stack, &grid)?;
        &coarse
    } else {
        stack
    };

    let per_zone = (0..zones.len())
        .into_par_iter()
        .map(|i| accumulate(raster, &zones.features[i], params.max_pixels))
        .collect::<Result<Vec<_>>>()?;

    let bands: Vec<String> = raster.bands.iter().map(|b| b.name.clone()).collect();
    let attribute_keys: Vec<String> = zones
        .features
        .iter()
        .flat_map(|f| f.properties.keys())
        .filter(|k| !bands.iter().any(|b| b == *k))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut features = Vec::with_capacity(zones.len());
    let mut pixel_counts = Vec::with_capacity(zones.len());
    for (i, (means, count)) in per_zone.into_iter().enumerate() {
        if count == 0 {
            warn!(subbasin = i, "subbasin covers no pixel centre; means are null");
        }
        let mut feature = zones.features[i].clone();
        for (name, mean) in bands.iter().zip(means) {
            let value = mean.map_or(AttributeValue::Null, AttributeValue::Float);
            feature.properties.insert(name.clone(), value);
        }
        features.push(feature);
        pixel_counts.push(count);
    }

    info!(subbasins = features.len(), grid = %raster.grid.describe(), "zonal means");
    Ok(ZonalResult {
        collection: PolygonCollection::new(zones.crs, features),
        attribute_keys,
        bands,
        pixel_counts,
    })
}
