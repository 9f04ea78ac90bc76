//! Cover management (C) from NDVI.
//!
//! Phase 1 maps NDVI through `T = exp(α·NDVI / (1 − NDVI))`, α = −2.
//! Phase 2 needs the AOI-wide minimum and maximum of `T` before any pixel
//! can be normalized, so the two phases are separated by a full reduction.

use geo::MultiPolygon;
use tracing::{debug, info, warn};

use crate::collection::{RasterCollection, Reducer};
use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::{Band, Grid, Raster};
use crate::reproject::{clip, coarsen};

pub const ALPHA: f64 = -2.0;
/// Pixels with `1 − NDVI` at or below this are singular and masked.
pub const SINGULARITY_EPS: f64 = 1e-6;

/// Reduction settings for the `Tmin`/`Tmax` barrier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverParams {
    /// Ground resolution of the min/max scan in metres.
    pub reduction_scale_m: f64,
    pub max_pixels: u64,
}

impl Default for CoverParams {
    fn default() -> Self {
        Self { reduction_scale_m: 3000.0, max_pixels: 475_160_679 }
    }
}

/// Normalized C raster with the range it was normalized against.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverFactor {
    pub raster: Raster,
    pub t_min: f64,
    pub t_max: f64,
    /// Valid NDVI pixels masked by the singularity guard.
    pub masked: usize,
}

/// `(NIR − RED) / (NIR + RED)`; no-data where the denominator vanishes.
pub fn ndvi(nir: &Raster, red: &Raster) -> Result<Raster> {
    nir.zip_map(red, "NDVI", |n, r| {
        let sum = n + r;
        if sum.abs() < f64::EPSILON { f64::NAN } else { (n - r) / sum }
    })
}

/// Exponential transform of NDVI. Returns the `T` raster and the number of
/// valid NDVI pixels that had to be masked.
pub fn exponential_transform(ndvi: &Raster) -> (Raster, usize) {
    let transformed: Vec<(f64, bool)> = ndvi
        .values()
        .into_par_iter()
        .map(|&v| {
            if v.is_nan() {
                return (f64::NAN, false);
            }
            let denom = 1.0 - v;
            if denom <= SINGULARITY_EPS {
                return (f64::NAN, true);
            }
            let t = (ALPHA * v / denom).exp();
            if t.is_finite() { (t, false) } else { (f64::NAN, true) }
        })
        .collect();

    let masked = transformed.iter().filter(|(_, m)| *m).count();
    let data = transformed.into_iter().map(|(t, _)| t).collect();
    (Raster { grid: ndvi.grid, bands: vec![Band { name: "T".into(), data }] }, masked)
}

/// AOI-wide `(Tmin, Tmax)`.
///
/// When the reduction scale is coarser than the native grid the field is
/// first sampled (nearest, see [`coarsen`]) onto the coarser grid. Fails
/// with `ResourceLimitExceeded` if the scan would exceed `max_pixels` and
/// with `EmptyResult` when no valid pixel remains.
pub fn reduce_range(t: &Raster, params: &CoverParams) -> Result<(f64, f64)> {
    let native_m = t.grid.scale_m();
    let scan_grid = if params.reduction_scale_m > native_m * (1.0 + 1e-9) {
        Grid::covering_limited(
            t.grid.crs,
            t.grid.bounds(),
            params.reduction_scale_m * t.grid.crs.units_per_metre(),
            params.max_pixels,
            "C range reduction",
        )?
    } else {
        t.grid
    };

    let pixels = scan_grid.len() as u64;
    if pixels > params.max_pixels {
        return Err(Error::ResourceLimitExceeded {
            stage: "C range reduction",
            pixels,
            limit: params.max_pixels,
        });
    }
    let coarse;
    let scanned = if scan_grid == t.grid {
        t
    } else {
        coarse = coarsen(t, &scan_grid)?;
        &coarse
    };
    debug!(pixels, scale_m = scanned.grid.scale_m(), "T range scan");

    scanned.min_max().ok_or_else(|| Error::EmptyResult {
        name: "C".into(),
        detail: "no valid pixel for the T range reduction".into(),
    })
}

/// `(T − Tmin) / (Tmax − Tmin)` clamped to `[0, 1]`; a flat range gives 0.
///
/// Flatness is relative to `Tmax`: dense vegetation drives T towards
/// 1e-30 and below, where a genuine contrast is far smaller than any fixed
/// cutoff.
pub fn normalize(t: &Raster, t_min: f64, t_max: f64) -> Result<Raster> {
    let range = t_max - t_min;
    if !range.is_finite() {
        return Err(Error::DivisionSingularity {
            detail: format!("T range [{t_min}, {t_max}] is not finite"),
        });
    }
    if range <= f64::EPSILON * t_max.abs() {
        return Ok(t.map("C", |_| 0.0));
    }
    Ok(t.map("C", |v| ((v - t_min) / range).clamp(0.0, 1.0)))
}

/// C raster from a reflectance collection: median composite, NDVI, clip,
/// transform, range barrier, normalize.
pub fn compute_c_factor(
    reflectance: &RasterCollection,
    nir_band: &str,
    red_band: &str,
    aoi: Option<&MultiPolygon<f64>>,
    params: &CoverParams,
) -> Result<CoverFactor> {
    let composite = reflectance.reduce(Reducer::Median)?;
    let index = ndvi(&composite.select(nir_band)?, &composite.select(red_band)?)?;
    let index = match aoi {
        Some(aoi) => clip(&index, aoi),
        None => index,
    };

    let (t, masked) = exponential_transform(&index);
    if masked > 0 {
        warn!(masked, "NDVI pixels masked at the 1 − NDVI singularity");
    }

    let (t_min, t_max) = reduce_range(&t, params)?;
    info!(t_min, t_max, scenes = reflectance.len(), "C factor range");
    let raster = normalize(&t, t_min, t_max)?;
    Ok(CoverFactor { raster, t_min, t_max, masked })
}
