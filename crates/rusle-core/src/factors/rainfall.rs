//! Rainfall erosivity (R).
//!
//! Annual precipitation totals are mapped through the linear relation
//!   R = 0.363 · P + 79
//! and the per-year rasters are averaged pixel by pixel.

use std::ops::Range;

use geo::MultiPolygon;
use tracing::{debug, info};

use crate::collection::{DateRange, RasterCollection, Reducer, Scene};
use crate::error::{Error, Result};
use crate::parallel::*;
use crate::raster::Raster;
use crate::reproject::clip;

pub const R_SLOPE: f64 = 0.363;
pub const R_INTERCEPT: f64 = 79.0;

/// R for an annual precipitation total in millimetres.
#[inline]
pub fn erosivity(precip_mm: f64) -> f64 {
    R_SLOPE * precip_mm + R_INTERCEPT
}

/// R for one calendar year: sum the scenes starting in `year`, clip, convert.
/// `collection` must already hold only the precipitation band.
pub fn annual_r(collection: &RasterCollection, year: i32, aoi: Option<&MultiPolygon<f64>>) -> Result<Raster> {
    let range = DateRange::year(year)?;
    let scenes = collection.filter_date(&range).map_err(|_| Error::EmptyResult {
        name: collection.name.clone(),
        detail: format!("no precipitation scenes in {year}"),
    })?;
    let total = scenes.reduce(Reducer::Sum)?;
    let total = match aoi {
        Some(aoi) => clip(&total, aoi),
        None => total,
    };
    debug!(year, scenes = scenes.len(), "annual precipitation summed");
    Ok(total.map("R", erosivity))
}

/// Mean annual R over `years`.
///
/// Years are independent and computed in parallel; the mean skips no-data
/// per pixel, so a single-year range returns that year's raster unchanged.
pub fn compute_r_factor(
    collection: &RasterCollection,
    band: &str,
    years: Range<i32>,
    aoi: Option<&MultiPolygon<f64>>,
) -> Result<Raster> {
    if years.is_empty() {
        return Err(Error::InvalidInput(format!(
            "empty year range {}..{}",
            years.start, years.end
        )));
    }
    let precip = collection.select(band)?;
    let per_year = years
        .clone()
        .into_par_iter()
        .map(|y| annual_r(&precip, y, aoi))
        .collect::<Result<Vec<_>>>()?;

    info!(first = years.start, last = years.end - 1, "R factor over {} years", per_year.len());
    let stack = RasterCollection::new("R", per_year.into_iter().map(Scene::undated).collect());
    Ok(stack.reduce(Reducer::Mean)?.rename("R"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::parse_date;
    use crate::crs::Crs;
    use crate::raster::Grid;
    use approx::assert_relative_eq;

    fn grid() -> Grid {
        Grid::new(Crs::WebMercator, 0.0, 1.0, 1.0, 2, 1)
    }

    fn pentad(date: &str, mm: f64) -> Scene {
        let d = parse_date(date).unwrap();
        Scene::dated(d, d, Raster::filled(grid(), "precipitation", mm))
    }

    fn chirps() -> RasterCollection {
        RasterCollection::new(
            "CHIRPS",
            vec![
                pentad("2019-03-01", 200.0),
                pentad("2019-08-01", 300.0),
                pentad("2020-06-01", 700.0),
            ],
        )
    }

    #[test]
    fn erosivity_is_linear_in_precipitation() {
        assert_relative_eq!(erosivity(0.0), 79.0);
        assert_relative_eq!(erosivity(500.0), 260.5, epsilon = 1e-9);
        assert_relative_eq!(erosivity(700.0), 333.1, epsilon = 1e-9);
    }

    #[test]
    fn single_year_equals_that_years_r() {
        let r = compute_r_factor(&chirps(), "precipitation", 2019..2020, None).unwrap();
        assert_eq!(r.band_names(), vec!["R"]);
        for &v in r.values() {
            assert_relative_eq!(v, 260.5, epsilon = 1e-9);
        }
    }

    #[test]
    fn two_years_average_their_r() {
        let r = compute_r_factor(&chirps(), "precipitation", 2019..2021, None).unwrap();
        assert_relative_eq!(r.get(0, 0), (260.5 + 333.1) / 2.0, epsilon = 1e-9);
    }

    #[test]
    fn year_without_scenes_is_empty_result() {
        let err = compute_r_factor(&chirps(), "precipitation", 2019..2022, None).unwrap_err();
        match err {
            Error::EmptyResult { detail, .. } => assert!(detail.contains("2021"), "got {detail}"),
            other => panic!("expected EmptyResult, got {other:?}"),
        }
    }

    #[test]
    fn empty_year_range_is_rejected() {
        assert!(matches!(
            compute_r_factor(&chirps(), "precipitation", 2020..2020, None),
            Err(Error::InvalidInput(_))
        ));
    }
}
