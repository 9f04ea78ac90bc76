//! Co-registration of the factor rasters into one five-band stack.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crs::Crs;
use crate::error::{Error, Result, ResultExt};
use crate::raster::{Bounds, Grid, Raster};
use crate::reproject::{resample_to, Resampling};

/// One band of the stack. Declaration order is band order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Factor {
    R,
    K,
    LS,
    C,
    LULC,
}

impl Factor {
    pub const ALL: [Factor; 5] = [Factor::R, Factor::K, Factor::LS, Factor::C, Factor::LULC];

    pub fn band_name(self) -> &'static str {
        match self {
            Factor::R => "R",
            Factor::K => "K",
            Factor::LS => "LS",
            Factor::C => "C",
            Factor::LULC => "LULC",
        }
    }

    /// Continuous factors interpolate; class codes must not.
    pub fn resampling(self) -> Resampling {
        match self {
            Factor::R | Factor::LS | Factor::C => Resampling::Bilinear,
            Factor::K | Factor::LULC => Resampling::Nearest,
        }
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.band_name())
    }
}

/// The five single-band factor rasters, each on its own grid.
#[derive(Debug, Clone)]
pub struct FactorLayers {
    pub r: Raster,
    pub k: Raster,
    pub ls: Raster,
    pub c: Raster,
    pub lulc: Raster,
}

impl FactorLayers {
    pub fn get(&self, factor: Factor) -> &Raster {
        match factor {
            Factor::R => &self.r,
            Factor::K => &self.k,
            Factor::LS => &self.ls,
            Factor::C => &self.c,
            Factor::LULC => &self.lulc,
        }
    }
}

/// Grid in `crs` covering `bounds` at `scale_m` metres, holding at most
/// `max_pixels` cells.
pub fn target_grid(crs: Crs, bounds: Bounds, scale_m: f64, max_pixels: u64) -> Result<Grid> {
    if scale_m.is_nan() || scale_m <= 0.0 {
        return Err(Error::InvalidInput(format!("stack scale must be positive, got {scale_m}")));
    }
    Grid::covering_limited(crs, bounds, scale_m * crs.units_per_metre(), max_pixels, "factor stack")
}

/// Five-band raster with bands exactly `R, K, LS, C, LULC` on one grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FactorStack {
    raster: Raster,
}

impl FactorStack {
    /// Resample every layer onto `grid` and append in factor order.
    pub fn assemble(layers: &FactorLayers, grid: &Grid) -> Result<Self> {
        let mut stacked: Option<Raster> = None;
        for factor in Factor::ALL {
            let layer = layers.get(factor);
            let first = layer
                .bands
                .first()
                .cloned()
                .ok_or_else(|| Error::InvalidInput("layer has no band".into()))
                .in_stage(factor, "stack")?;
            let single = Raster { grid: layer.grid, bands: vec![first] };
            let band = resample_to(&single, grid, factor.resampling())
                .in_stage(factor, "resample")?
                .rename(factor.band_name());
            stacked = Some(match stacked {
                None => band,
                Some(acc) => acc.add_bands(band).in_stage(factor, "stack")?,
            });
        }
        let raster = stacked.ok_or_else(|| Error::InvalidInput("no factor layers".into()))?;
        debug!(grid = %raster.grid.describe(), "factor stack assembled");
        Ok(Self { raster })
    }

    /// Wrap an existing raster, checking the band layout.
    pub fn from_raster(raster: Raster) -> Result<Self> {
        let expected: Vec<&str> = Factor::ALL.iter().map(|f| f.band_name()).collect();
        if raster.band_names() != expected {
            return Err(Error::InvalidInput(format!(
                "stack bands must be [{}], got [{}]",
                expected.join(", "),
                raster.band_names().join(", ")
            )));
        }
        Ok(Self { raster })
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn grid(&self) -> &Grid {
        &self.raster.grid
    }

    pub fn band(&self, factor: Factor) -> &[f64] {
        // Layout is fixed by construction.
        &self.raster.bands[factor as usize].data
    }

    pub fn into_raster(self) -> Raster {
        self.raster
    }
}
