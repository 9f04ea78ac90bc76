//! Time-tagged raster collections: date filtering, band selection and
//! reduction along the time axis.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::{Band, Raster};

/// Half-open date interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidInput(format!("empty date range {start} .. {end}")));
        }
        Ok(Self { start, end })
    }

    /// Parse two ISO dates (`YYYY-MM-DD`).
    pub fn parse(start: &str, end: &str) -> Result<Self> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// January 1st of `year` to January 1st of `year + 1`.
    pub fn year(year: i32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| Error::InvalidInput(format!("year {year} out of range")))?;
        let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)
            .ok_or_else(|| Error::InvalidInput(format!("year {} out of range", year + 1)))?;
        Self::new(start, end)
    }

    #[inline]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Calendar years lying entirely inside the range, as `[first, last + 1)`.
    pub fn whole_years(&self) -> std::ops::Range<i32> {
        let first = if self.start.ordinal() == 1 { self.start.year() } else { self.start.year() + 1 };
        let last_exclusive = self.end.year();
        first..last_exclusive.max(first)
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|source| Error::DateParse {
        value: value.to_string(),
        source,
    })
}

/// One raster of a collection with its acquisition period. Undated scenes
/// (static layers such as a DEM) pass every date filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub raster: Raster,
}

impl Scene {
    pub fn undated(raster: Raster) -> Self {
        Self { start: None, end: None, raster }
    }

    pub fn dated(start: NaiveDate, end: NaiveDate, raster: Raster) -> Self {
        Self { start: Some(start), end: Some(end), raster }
    }

    pub fn in_range(&self, range: &DateRange) -> bool {
        self.start.map_or(true, |d| range.contains(d))
    }
}

/// Reduction across the time axis, per pixel and per band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Sum,
    Mean,
    Median,
    First,
}

/// Ordered scenes sharing one band schema and grid.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterCollection {
    pub name: String,
    pub scenes: Vec<Scene>,
}

impl RasterCollection {
    pub fn new(name: impl Into<String>, scenes: Vec<Scene>) -> Self {
        Self { name: name.into(), scenes }
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    /// Scenes starting inside `range`; `EmptyResult` when none do.
    pub fn filter_date(&self, range: &DateRange) -> Result<RasterCollection> {
        let scenes: Vec<Scene> = self.scenes.iter().filter(|s| s.in_range(range)).cloned().collect();
        if scenes.is_empty() {
            return Err(Error::EmptyResult {
                name: self.name.clone(),
                detail: format!("no scenes between {} and {}", range.start, range.end),
            });
        }
        Ok(RasterCollection { name: self.name.clone(), scenes })
    }

    /// Keep only `band` in every scene.
    pub fn select(&self, band: &str) -> Result<RasterCollection> {
        let scenes = self
            .scenes
            .iter()
            .map(|s| {
                Ok(Scene { start: s.start, end: s.end, raster: s.raster.select(band)? })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RasterCollection { name: self.name.clone(), scenes })
    }

    pub fn first(&self) -> Result<Raster> {
        self.scenes.first().map(|s| s.raster.clone()).ok_or_else(|| Error::EmptyResult {
            name: self.name.clone(),
            detail: "collection has no scenes".into(),
        })
    }

    /// Collapse the time axis. Sum, mean and median skip no-data per pixel;
    /// a pixel with no valid sample anywhere stays no-data.
    pub fn reduce(&self, reducer: Reducer) -> Result<Raster> {
        let first = self.first()?;
        if reducer == Reducer::First {
            return Ok(first);
        }
        for s in &self.scenes[1..] {
            first.grid.ensure_same(&s.raster.grid)?;
            if s.raster.band_names() != first.band_names() {
                return Err(Error::InvalidInput(format!(
                    "{}: band schema differs between scenes",
                    self.name
                )));
            }
        }

        let n_px = first.grid.len();
        let bands = first
            .bands
            .iter()
            .enumerate()
            .map(|(bi, band)| {
                let columns: Vec<&[f64]> =
                    self.scenes.iter().map(|s| s.raster.bands[bi].data.as_slice()).collect();
                let data: Vec<f64> = (0..n_px)
                    .into_par_iter()
                    .map(|i| reduce_pixel(reducer, columns.iter().map(|c| c[i])))
                    .collect();
                Band { name: band.name.clone(), data }
            })
            .collect();

        Ok(Raster { grid: first.grid, bands })
    }
}

fn reduce_pixel(reducer: Reducer, samples: impl Iterator<Item = f64>) -> f64 {
    let mut valid: Vec<f64> = samples.filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    match reducer {
        Reducer::Sum => valid.iter().sum(),
        Reducer::Mean => valid.iter().sum::<f64>() / valid.len() as f64,
        Reducer::Median => {
            valid.sort_by(|a, b| a.total_cmp(b));
            let n = valid.len();
            if n % 2 == 0 {
                (valid[n / 2 - 1] + valid[n / 2]) / 2.0
            } else {
                valid[n / 2]
            }
        }
        Reducer::First => valid[0],
    }
}
