//! Soil erodibility (K) from USDA texture classes.

use geo::MultiPolygon;
use tracing::info;

use crate::error::Result;
use crate::raster::Raster;
use crate::reproject::clip;

/// Ordered `(threshold, value)` steps. The first step whose threshold the
/// input strictly exceeds wins; inputs matching no step get `fallback`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationTable {
    steps: Vec<(f64, f64)>,
    fallback: f64,
}

impl ClassificationTable {
    pub fn new(steps: Vec<(f64, f64)>, fallback: f64) -> Self {
        Self { steps, fallback }
    }

    /// K values (t·ha·h / ha·MJ·mm) per USDA texture class code.
    pub fn usda_texture() -> Self {
        Self::new(
            vec![
                (11.0, 0.0053),
                (10.0, 0.0170),
                (9.0, 0.045),
                (8.0, 0.050),
                (7.0, 0.0499),
                (6.0, 0.0394),
                (5.0, 0.0264),
                (4.0, 0.0423),
                (3.0, 0.0394),
                (2.0, 0.036),
                (1.0, 0.0341),
                (0.0, 0.0288),
            ],
            0.0,
        )
    }

    #[inline]
    pub fn classify(&self, code: f64) -> f64 {
        if code.is_nan() {
            return f64::NAN;
        }
        self.steps
            .iter()
            .find(|&&(threshold, _)| code > threshold)
            .map_or(self.fallback, |&(_, value)| value)
    }

    /// Apply the table to the first band of `raster`.
    pub fn apply(&self, raster: &Raster, name: &str) -> Raster {
        raster.map(name, |code| self.classify(code))
    }
}

/// K raster from a soil-texture raster: select `band`, classify, clip.
pub fn compute_k_factor(soil: &Raster, band: &str, aoi: Option<&MultiPolygon<f64>>) -> Result<Raster> {
    let codes = soil.select(band)?;
    let codes = match aoi {
        Some(aoi) => clip(&codes, aoi),
        None => codes,
    };
    info!(valid = codes.valid_count(), "K factor classified");
    Ok(ClassificationTable::usda_texture().apply(&codes, "K"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crs::Crs;
    use crate::raster::Grid;

    #[test]
    fn strict_greater_than_at_every_step() {
        let t = ClassificationTable::usda_texture();
        assert_eq!(t.classify(12.0), 0.0053);
        assert_eq!(t.classify(11.0), 0.0170);
        assert_eq!(t.classify(6.0), 0.0264);
        assert_eq!(t.classify(5.0), 0.0423);
        assert_eq!(t.classify(1.0), 0.0288);
        assert_eq!(t.classify(0.5), 0.0288);
    }

    #[test]
    fn non_positive_codes_map_to_zero() {
        let t = ClassificationTable::usda_texture();
        assert_eq!(t.classify(0.0), 0.0);
        assert_eq!(t.classify(-3.0), 0.0);
        assert!(t.classify(f64::NAN).is_nan());
    }

    #[test]
    fn k_factor_selects_band_and_renames() {
        let grid = Grid::new(Crs::Geographic, 77.0, 31.0, 0.01, 2, 2);
        let soil = Raster::filled(grid, "b0", 9.0);
        let k = compute_k_factor(&soil, "b0", None).unwrap();
        assert_eq!(k.band_names(), vec!["K"]);
        assert!(k.values().iter().all(|&v| v == 0.050));
    }
}
