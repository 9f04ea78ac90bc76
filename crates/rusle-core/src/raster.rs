use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::parallel::*;

/// Georeferencing of a north-up raster: top-left origin, square cells.
/// Pixel `(row, col)` has its centre at
/// `(origin_x + (col + 0.5)·cell, origin_y − (row + 0.5)·cell)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub crs: Crs,
    pub origin_x: f64,
    pub origin_y: f64,
    /// Cell size in CRS units.
    pub cell_size: f64,
    pub width: usize,
    pub height: usize,
}

/// Axis-aligned bounds in CRS units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

impl Grid {
    pub fn new(crs: Crs, origin_x: f64, origin_y: f64, cell_size: f64, width: usize, height: usize) -> Self {
        Self { crs, origin_x, origin_y, cell_size, width, height }
    }

    /// Smallest grid anchored at the top-left of `bounds` that covers them
    /// with `cell_size` cells. Always at least 1×1.
    pub fn covering(crs: Crs, bounds: Bounds, cell_size: f64) -> Self {
        // Tolerance keeps an exact multiple from spilling into an extra cell.
        let cols = (bounds.width() / cell_size - 1e-9).ceil().max(1.0) as usize;
        let rows = (bounds.height() / cell_size - 1e-9).ceil().max(1.0) as usize;
        Self::new(crs, bounds.min_x, bounds.max_y, cell_size, cols, rows)
    }

    /// `covering`, but fails with `ResourceLimitExceeded` before anything is
    /// allocated when the grid would hold more than `max_pixels` cells.
    pub fn covering_limited(
        crs: Crs,
        bounds: Bounds,
        cell_size: f64,
        max_pixels: u64,
        stage: &'static str,
    ) -> Result<Self> {
        let cols = (bounds.width() / cell_size - 1e-9).ceil().max(1.0);
        let rows = (bounds.height() / cell_size - 1e-9).ceil().max(1.0);
        let limit = max_pixels as f64;
        let fits = cols.is_finite() && rows.is_finite() && cols <= limit && rows <= limit;
        let pixels = if fits { (cols as u64).checked_mul(rows as u64) } else { None };
        match pixels {
            Some(pixels) if pixels <= max_pixels => Ok(Self::covering(crs, bounds, cell_size)),
            _ => Err(Error::ResourceLimitExceeded {
                stage,
                // Saturating cast; an overflowing product reports u64::MAX.
                pixels: pixels.unwrap_or_else(|| (cols * rows) as u64),
                limit: max_pixels,
            }),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            min_x: self.origin_x,
            max_x: self.origin_x + self.width as f64 * self.cell_size,
            min_y: self.origin_y - self.height as f64 * self.cell_size,
            max_y: self.origin_y,
        }
    }

    #[inline]
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.cell_size,
            self.origin_y - (row as f64 + 0.5) * self.cell_size,
        )
    }

    /// Fractional `(col, row)` of a point; integer parts index the cell.
    #[inline]
    pub fn locate(&self, x: f64, y: f64) -> (f64, f64) {
        ((x - self.origin_x) / self.cell_size, (self.origin_y - y) / self.cell_size)
    }

    /// Cell containing `(x, y)`, or `None` outside the grid.
    pub fn cell_at(&self, x: f64, y: f64) -> Option<(usize, usize)> {
        let (fc, fr) = self.locate(x, y);
        if fc < 0.0 || fr < 0.0 || !fc.is_finite() || !fr.is_finite() {
            return None;
        }
        let (c, r) = (fc.floor() as usize, fr.floor() as usize);
        (c < self.width && r < self.height).then_some((r, c))
    }

    /// Nominal ground resolution in metres.
    pub fn scale_m(&self) -> f64 {
        self.cell_size / self.crs.units_per_metre()
    }

    /// Cell spacing in metres along x and y at `row`. Geographic grids shrink
    /// east-west with the cosine of latitude.
    pub fn cell_spacing_m(&self, row: usize) -> (f64, f64) {
        match self.crs {
            Crs::Geographic => {
                let (_, lat) = self.pixel_center(row, 0);
                let dy = self.cell_size * crate::crs::METRES_PER_DEGREE;
                (dy * lat.to_radians().cos().max(1e-6), dy)
            }
            Crs::WebMercator => (self.cell_size, self.cell_size),
        }
    }

    /// Same anchor and extent with cells of `cell_size`.
    pub fn with_cell_size(&self, cell_size: f64) -> Self {
        Self::covering(self.crs, self.bounds(), cell_size)
    }

    /// Fail with `CrsMismatch` unless `other` is exactly this grid.
    pub fn ensure_same(&self, other: &Grid) -> Result<()> {
        if self == other {
            Ok(())
        } else {
            Err(Error::CrsMismatch {
                expected: self.describe(),
                found: other.describe(),
            })
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "{} {}x{} @ {} origin ({}, {})",
            self.crs, self.width, self.height, self.cell_size, self.origin_x, self.origin_y
        )
    }
}

/// One named band, row-major, `NaN` = no-data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub data: Vec<f64>,
}

/// A georeferenced multi-band raster. All bands share `grid`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    pub grid: Grid,
    pub bands: Vec<Band>,
}

impl Raster {
    /// Single-band raster; `data.len()` must match the grid.
    pub fn new(grid: Grid, name: impl Into<String>, data: Vec<f64>) -> Result<Self> {
        if data.len() != grid.len() {
            return Err(Error::InvalidInput(format!(
                "band has {} values but grid is {}x{}",
                data.len(),
                grid.width,
                grid.height
            )));
        }
        Ok(Self { grid, bands: vec![Band { name: name.into(), data }] })
    }

    pub fn filled(grid: Grid, name: impl Into<String>, value: f64) -> Self {
        Self { grid, bands: vec![Band { name: name.into(), data: vec![value; grid.len()] }] }
    }

    /// Single-band raster whose value at `(row, col)` is `f(row, col)`.
    pub fn from_fn(grid: Grid, name: impl Into<String>, f: impl Fn(usize, usize) -> f64) -> Self {
        let data = (0..grid.len()).map(|i| f(i / grid.width, i % grid.width)).collect();
        Self { grid, bands: vec![Band { name: name.into(), data }] }
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> Result<&Band> {
        self.bands.iter().find(|b| b.name == name).ok_or_else(|| Error::MissingBand {
            band: name.to_string(),
            available: self.band_names().join(", "),
        })
    }

    /// New single-band raster holding a copy of `name`.
    pub fn select(&self, name: &str) -> Result<Raster> {
        let band = self.band(name)?.clone();
        Ok(Raster { grid: self.grid, bands: vec![band] })
    }

    /// Rename the first band.
    pub fn rename(mut self, name: impl Into<String>) -> Self {
        if let Some(b) = self.bands.first_mut() {
            b.name = name.into();
        }
        self
    }

    /// Values of the first band.
    pub fn values(&self) -> &[f64] {
        self.bands.first().map(|b| b.data.as_slice()).unwrap_or(&[])
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.values()[row * self.grid.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, val: f64) {
        let w = self.grid.width;
        if let Some(b) = self.bands.first_mut() {
            b.data[row * w + col] = val;
        }
    }

    /// Elementwise transform of the first band into a new single-band raster.
    /// No-data passes through untouched.
    pub fn map<F>(&self, name: impl Into<String>, f: F) -> Raster
    where
        F: Fn(f64) -> f64 + Sync + Send,
    {
        let data: Vec<f64> = self
            .values()
            .into_par_iter()
            .map(|&v| if v.is_nan() { v } else { f(v) })
            .collect();
        Raster { grid: self.grid, bands: vec![Band { name: name.into(), data }] }
    }

    /// Elementwise combination of the first bands of two co-registered
    /// rasters. No-data in either input yields no-data.
    pub fn zip_map<F>(&self, other: &Raster, name: impl Into<String>, f: F) -> Result<Raster>
    where
        F: Fn(f64, f64) -> f64 + Sync + Send,
    {
        self.grid.ensure_same(&other.grid)?;
        let a = self.values();
        let b = other.values();
        let data: Vec<f64> = (0..a.len())
            .into_par_iter()
            .map(|i| if a[i].is_nan() || b[i].is_nan() { f64::NAN } else { f(a[i], b[i]) })
            .collect();
        Ok(Raster { grid: self.grid, bands: vec![Band { name: name.into(), data }] })
    }

    /// Append the bands of `other`; both rasters must share the grid.
    pub fn add_bands(mut self, other: Raster) -> Result<Raster> {
        self.grid.ensure_same(&other.grid)?;
        for band in other.bands {
            if self.bands.iter().any(|b| b.name == band.name) {
                return Err(Error::InvalidInput(format!("duplicate band '{}'", band.name)));
            }
            self.bands.push(band);
        }
        Ok(self)
    }

    /// Count of valid (non-NaN) cells in the first band.
    pub fn valid_count(&self) -> usize {
        self.values().iter().filter(|v| !v.is_nan()).count()
    }

    /// Min and max of the valid cells of the first band.
    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.values().iter().filter(|v| !v.is_nan()).fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Bilinear sample of the first band at `(x, y)`, interpolating between
    /// pixel centres. Returns `None` outside the grid; falls back to the
    /// nearest cell when any of the four neighbours is no-data.
    pub fn sample_bilinear(&self, x: f64, y: f64) -> Option<f64> {
        let (r, c) = self.grid.cell_at(x, y)?;
        let (fc, fr) = self.grid.locate(x, y);
        let fx = (fc - 0.5).clamp(0.0, (self.grid.width - 1) as f64);
        let fy = (fr - 0.5).clamp(0.0, (self.grid.height - 1) as f64);

        let x0 = fx.floor() as usize;
        let y0 = fy.floor() as usize;
        let x1 = (x0 + 1).min(self.grid.width - 1);
        let y1 = (y0 + 1).min(self.grid.height - 1);

        let tx = fx - x0 as f64;
        let ty = fy - y0 as f64;

        let v00 = self.get(y0, x0);
        let v10 = self.get(y0, x1);
        let v01 = self.get(y1, x0);
        let v11 = self.get(y1, x1);

        if v00.is_nan() || v10.is_nan() || v01.is_nan() || v11.is_nan() {
            return Some(self.get(r, c));
        }

        Some(
            v00 * (1.0 - tx) * (1.0 - ty)
                + v10 * tx * (1.0 - ty)
                + v01 * (1.0 - tx) * ty
                + v11 * tx * ty,
        )
    }

    /// Value of the cell containing `(x, y)`.
    pub fn sample_nearest(&self, x: f64, y: f64) -> Option<f64> {
        self.grid.cell_at(x, y).map(|(r, c)| self.get(r, c))
    }
}
