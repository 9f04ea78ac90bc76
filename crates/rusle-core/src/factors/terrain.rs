//! Slope length and steepness (LS) from a DEM.
//!
//! Slope uses Horn's (1981) weighted 3×3 finite differences with metric cell
//! spacing:
//!
//! ```text
//!   NW(-1,-1)  N(-1, 0)  NE(-1,+1)
//!   W ( 0,-1)  *         E ( 0,+1)
//!   SW(+1,-1)  S(+1, 0)  SE(+1,+1)
//! ```
//!
//! `dz/dx = ((NE + 2E + SE) − (NW + 2W + SW)) / (8 · dx)`
//! `dz/dy = ((NW + 2N + NE) − (SW + 2S + SE)) / (8 · dy)`
//!
//! LS then follows the polynomial in slope percent `s` with a fixed 500 m
//! flow length:
//!   LS = (0.53·s + 0.076·s² + 0.76) · sqrt(500 / 100)

use geo::MultiPolygon;
use tracing::info;

use crate::error::Result;
use crate::parallel::*;
use crate::raster::{Band, Raster};
use crate::reproject::clip;

/// Assumed slope length in metres.
pub const FLOW_LENGTH_M: f64 = 500.0;

/// Horn gradient at `(r, c)` as `(dz_dx, dz_dy)`, rise over run.
///
/// Neighbours outside the grid or holding no-data are replaced by the
/// centre value, so edge cells get a one-sided estimate.
fn horn_gradient(z: &[f64], width: usize, height: usize, r: usize, c: usize, dx: f64, dy: f64) -> (f64, f64) {
    let centre = z[r * width + c];
    let at = |dr: isize, dc: isize| -> f64 {
        let rr = r as isize + dr;
        let cc = c as isize + dc;
        if rr < 0 || cc < 0 || rr >= height as isize || cc >= width as isize {
            return centre;
        }
        let v = z[rr as usize * width + cc as usize];
        if v.is_nan() { centre } else { v }
    };

    let nw = at(-1, -1);
    let n  = at(-1,  0);
    let ne = at(-1,  1);
    let w  = at( 0, -1);
    let e  = at( 0,  1);
    let sw = at( 1, -1);
    let s  = at( 1,  0);
    let se = at( 1,  1);

    let dz_dx = ((ne + 2.0 * e + se) - (nw + 2.0 * w + sw)) / (8.0 * dx);
    let dz_dy = ((nw + 2.0 * n + ne) - (sw + 2.0 * s + se)) / (8.0 * dy);
    (dz_dx, dz_dy)
}

/// Slope in degrees at every valid cell of the first band.
pub fn slope_degrees(dem: &Raster) -> Raster {
    let g = dem.grid;
    let z = dem.values();
    let data: Vec<f64> = (0..g.len())
        .into_par_iter()
        .map(|i| {
            if z[i].is_nan() {
                return f64::NAN;
            }
            let (r, c) = (i / g.width, i % g.width);
            let (dx, dy) = g.cell_spacing_m(r);
            let (gx, gy) = horn_gradient(z, g.width, g.height, r, c, dx, dy);
            (gx * gx + gy * gy).sqrt().atan().to_degrees()
        })
        .collect();
    Raster { grid: g, bands: vec![Band { name: "slope".into(), data }] }
}

#[inline]
pub fn slope_percent(degrees: f64) -> f64 {
    degrees.to_radians().tan() * 100.0
}

#[inline]
pub fn ls_from_slope_percent(s: f64) -> f64 {
    (0.53 * s + 0.076 * s * s + 0.76) * (FLOW_LENGTH_M / 100.0).sqrt()
}

/// LS raster from an elevation raster. Slope is taken on the full DEM and
/// clipped afterwards so boundary cells see their real neighbours.
pub fn compute_ls_factor(dem: &Raster, band: &str, aoi: Option<&MultiPolygon<f64>>) -> Result<Raster> {
    let elevation = dem.select(band)?;
    let slope = slope_degrees(&elevation);
    let slope = match aoi {
        Some(aoi) => clip(&slope, aoi),
        None => slope,
    };
    info!(valid = slope.valid_count(), "LS factor from {}", dem.grid.describe());
    Ok(slope.map("LS", |deg| ls_from_slope_percent(slope_percent(deg))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::Grid;
    use approx::assert_relative_eq;

    fn grid(n: usize) -> Grid {
        Grid::new(Crs::WebMercator, 0.0, n as f64 * 30.0, 30.0, n, n)
    }

    #[test]
    fn flat_dem_gives_minimum_ls() {
        let dem = Raster::filled(grid(4), "elevation", 120.0);
        let ls = compute_ls_factor(&dem, "elevation", None).unwrap();
        let expected = 0.76 * 5f64.sqrt();
        for &v in ls.values() {
            assert_relative_eq!(v, expected, epsilon = 1e-12);
        }
        assert_relative_eq!(expected, 1.699, epsilon = 1e-3);
    }

    #[test]
    fn ls_polynomial_at_reference_slopes() {
        let k = 5f64.sqrt();
        assert_relative_eq!(ls_from_slope_percent(10.0), (5.3 + 7.6 + 0.76) * k, epsilon = 1e-12);
        assert_relative_eq!(ls_from_slope_percent(50.0), (26.5 + 190.0 + 0.76) * k, epsilon = 1e-9);
    }

    #[test]
    fn ramp_edges_use_one_sided_difference() {
        // 3 m rise per 30 m cell eastwards: 10 % slope in the interior.
        let dem = Raster::from_fn(grid(5), "elevation", |_, c| c as f64 * 3.0);
        let slope = slope_degrees(&dem);
        let interior = slope.get(2, 2);
        assert_relative_eq!(slope_percent(interior), 10.0, epsilon = 1e-9);
        // Edge columns see a one-sided difference, half the interior gradient.
        assert_relative_eq!(slope_percent(slope.get(2, 0)), 5.0, epsilon = 1e-9);
        assert!(slope.values().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn nodata_neighbours_do_not_poison_valid_cells() {
        let mut dem = Raster::filled(grid(3), "elevation", 50.0);
        dem.set(0, 0, f64::NAN);
        let slope = slope_degrees(&dem);
        assert!(slope.get(0, 0).is_nan());
        assert_eq!(slope.get(1, 1), 0.0);
        assert_eq!(slope.valid_count(), 8);
    }
}
