//! Reprojection and resampling onto a target grid.
//!
//! Every target pixel centre is transformed into the source CRS and sampled
//! there (inverse mapping), so each output cell gets exactly one value.

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::collection::{RasterCollection, Scene};
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::{Band, Bounds, Grid, Raster};
use crate::vector::PolygonFeature;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    Nearest,
    Bilinear,
}

/// Footprint of `grid` expressed in `to`. Corners and edge midpoints are
/// transformed and enveloped.
pub fn footprint_in(grid: &Grid, to: Crs) -> Bounds {
    let b = grid.bounds();
    if grid.crs == to {
        return b;
    }
    let xs = [b.min_x, (b.min_x + b.max_x) / 2.0, b.max_x];
    let ys = [b.min_y, (b.min_y + b.max_y) / 2.0, b.max_y];
    let mut out = Bounds { min_x: f64::MAX, min_y: f64::MAX, max_x: f64::MIN, max_y: f64::MIN };
    for &x in &xs {
        for &y in &ys {
            let (tx, ty) = grid.crs.transform(to, x, y);
            out.min_x = out.min_x.min(tx);
            out.min_y = out.min_y.min(ty);
            out.max_x = out.max_x.max(tx);
            out.max_y = out.max_y.max(ty);
        }
    }
    out
}

/// Reproject `raster` into `crs` at a ground resolution of `scale_m` metres.
/// The output grid covers the source footprint and may hold at most
/// `max_pixels` cells.
pub fn reproject(
    raster: &Raster,
    crs: Crs,
    scale_m: f64,
    resampling: Resampling,
    max_pixels: u64,
) -> Result<Raster> {
    if scale_m.is_nan() || scale_m <= 0.0 {
        return Err(Error::InvalidInput(format!("scale must be positive, got {scale_m}")));
    }
    let target = Grid::covering_limited(
        crs,
        footprint_in(&raster.grid, crs),
        scale_m * crs.units_per_metre(),
        max_pixels,
        "reprojection",
    )?;
    resample_to(raster, &target, resampling)
}

/// Nearest-neighbour sampling onto `target`, a coarser grid in the same CRS.
///
/// Coarse pixel centres are clamped into the band of native pixel centres,
/// so a coarse cell that overhangs the native extent still samples the
/// native cell it overlaps instead of falling outside.
pub fn coarsen(raster: &Raster, target: &Grid) -> Result<Raster> {
    if target.crs != raster.grid.crs {
        return Err(Error::CrsMismatch { expected: raster.grid.describe(), found: target.describe() });
    }
    if target.is_empty() || raster.grid.is_empty() {
        return Err(Error::InvalidInput("cannot coarsen an empty grid".into()));
    }
    if raster.grid == *target {
        return Ok(raster.clone());
    }
    debug!(from = %raster.grid.describe(), to = %target.describe(), "coarsen");

    let src = raster.grid;
    let half = src.cell_size / 2.0;
    let b = src.bounds();
    let bands = raster
        .bands
        .iter()
        .map(|band| {
            let data: Vec<f64> = (0..target.len())
                .into_par_iter()
                .map(|i| {
                    let (x, y) = target.pixel_center(i / target.width, i % target.width);
                    let x = x.clamp(b.min_x + half, b.max_x - half);
                    let y = y.clamp(b.min_y + half, b.max_y - half);
                    match src.cell_at(x, y) {
                        Some((r, c)) => band.data[r * src.width + c],
                        None => f64::NAN,
                    }
                })
                .collect();
            Band { name: band.name.clone(), data }
        })
        .collect();

    Ok(Raster { grid: *target, bands })
}

/// Sample every band of `raster` onto `target`. Band names are preserved;
/// cells falling outside the source become no-data.
pub fn resample_to(raster: &Raster, target: &Grid, resampling: Resampling) -> Result<Raster> {
    if target.is_empty() {
        return Err(Error::InvalidInput("target grid is empty".into()));
    }
    if raster.grid == *target {
        return Ok(raster.clone());
    }
    debug!(from = %raster.grid.describe(), to = %target.describe(), ?resampling, "resample");

    let src_crs = raster.grid.crs;
    let bands = raster
        .bands
        .iter()
        .map(|band| {
            let single = Raster { grid: raster.grid, bands: vec![band.clone()] };
            let data: Vec<f64> = (0..target.len())
                .into_par_iter()
                .map(|i| {
                    let (x, y) = target.pixel_center(i / target.width, i % target.width);
                    let (sx, sy) = target.crs.transform(src_crs, x, y);
                    let v = match resampling {
                        Resampling::Nearest => single.sample_nearest(sx, sy),
                        Resampling::Bilinear => single.sample_bilinear(sx, sy),
                    };
                    v.unwrap_or(f64::NAN)
                })
                .collect();
            Band { name: band.name.clone(), data }
        })
        .collect();

    Ok(Raster { grid: *target, bands })
}

/// Mask every cell whose centre lies outside `aoi` (given in the raster CRS).
pub fn clip(raster: &Raster, aoi: &MultiPolygon<f64>) -> Raster {
    let grid = raster.grid;
    let zone = PolygonFeature::new(aoi.clone());
    let inside: Vec<bool> = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            let (x, y) = grid.pixel_center(i / grid.width, i % grid.width);
            zone.contains(x, y)
        })
        .collect();

    let bands = raster
        .bands
        .iter()
        .map(|b| Band {
            name: b.name.clone(),
            data: b.data.iter().zip(&inside).map(|(&v, &keep)| if keep { v } else { f64::NAN }).collect(),
        })
        .collect();
    Raster { grid, bands }
}

/// Clip every scene of a collection.
pub fn clip_collection(collection: &RasterCollection, aoi: &MultiPolygon<f64>) -> RasterCollection {
    let scenes = collection
        .scenes
        .iter()
        .map(|s| Scene { start: s.start, end: s.end, raster: clip(&s.raster, aoi) })
        .collect();
    RasterCollection::new(collection.name.clone(), scenes)
}
