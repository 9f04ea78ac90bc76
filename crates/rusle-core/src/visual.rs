//! Severity classification and map rendering helpers.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::{Band, Grid, Raster};
use crate::vector::PolygonCollection;

// ── Severity classes ──────────────────────────────────────────────────────────

pub const LEGEND_TITLE: &str = "Soil Loss (t/hac/year)";

/// Upper bounds of the first four classes, t/ha/yr.
pub const SEVERITY_BREAKPOINTS: [f64; 4] = [10.0, 20.0, 30.0, 40.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityClass {
    pub label: &'static str,
    pub color: [u8; 3],
}

pub const SEVERITY_CLASSES: [SeverityClass; 5] = [
    SeverityClass { label: "Slight (<10)", color: [0x49, 0x0e, 0xff] },
    SeverityClass { label: "Moderate (10-20)", color: [0x12, 0xf4, 0xff] },
    SeverityClass { label: "High (20-30)", color: [0x12, 0xff, 0x50] },
    SeverityClass { label: "Very high (30-40)", color: [0xe5, 0xff, 0x12] },
    SeverityClass { label: "Severe (>40)", color: [0xff, 0x48, 0x12] },
];

/// Index of the half-open bucket holding `value`: bucket `i` is
/// `[b[i-1], b[i])`, with open ends below `b[0]` and from `b[n-1]` up.
/// `breakpoints` must be ascending. No-data has no class.
pub fn classify(value: f64, breakpoints: &[f64]) -> Option<usize> {
    if value.is_nan() {
        return None;
    }
    Some(breakpoints.partition_point(|&b| b <= value))
}

pub fn hex_color(rgb: [u8; 3]) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2])
}

// ── Legend ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendEntry {
    pub label: String,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    pub title: String,
    pub entries: Vec<LegendEntry>,
}

impl Legend {
    pub fn severity() -> Self {
        Self {
            title: LEGEND_TITLE.to_string(),
            entries: SEVERITY_CLASSES
                .iter()
                .map(|c| LegendEntry { label: c.label.to_string(), color: hex_color(c.color) })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

// ── Rasterization ─────────────────────────────────────────────────────────────

/// Paint the numeric `attribute` of each polygon onto `grid` by pixel
/// centre. Overlapping polygons average; uncovered or non-numeric cells are
/// no-data.
pub fn rasterize_attribute(polygons: &PolygonCollection, attribute: &str, grid: &Grid) -> Result<Raster> {
    if polygons.crs != grid.crs {
        return Err(Error::CrsMismatch { expected: grid.crs.to_string(), found: polygons.crs.to_string() });
    }
    let valued: Vec<_> = polygons
        .features
        .iter()
        .filter_map(|f| f.get_property(attribute)?.as_f64().filter(|v| v.is_finite()).map(|v| (f, v)))
        .collect();

    let data: Vec<f64> = (0..grid.len())
        .into_par_iter()
        .map(|i| {
            let (x, y) = grid.pixel_center(i / grid.width, i % grid.width);
            let (sum, n) = valued
                .iter()
                .filter(|(f, _)| f.contains(x, y))
                .fold((0.0, 0usize), |(s, n), (_, v)| (s + v, n + 1));
            if n == 0 { f64::NAN } else { sum / n as f64 }
        })
        .collect();
    Ok(Raster { grid: *grid, bands: vec![Band { name: attribute.to_string(), data }] })
}

/// Class index per cell of the first band.
pub fn classify_raster(raster: &Raster, breakpoints: &[f64]) -> Vec<Option<usize>> {
    raster.values().iter().map(|&v| classify(v, breakpoints)).collect()
}

/// RGBA bytes, row-major. Unclassified cells are fully transparent.
pub fn render_rgba(classes: &[Option<usize>], palette: &[[u8; 3]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(classes.len() * 4);
    for class in classes {
        match class.and_then(|c| palette.get(c)) {
            Some(&[r, g, b]) => out.extend_from_slice(&[r, g, b, 255]),
            None => out.extend_from_slice(&[0, 0, 0, 0]),
        }
    }
    out
}

pub fn severity_palette() -> [[u8; 3]; 5] {
    SEVERITY_CLASSES.map(|c| c.color)
}
