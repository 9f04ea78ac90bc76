//! Pipeline configuration.
//!
//! Every field has a default, so an empty JSON object reproduces the Ganga
//! basin setup. Partial files override only what they name.

use std::ops::Range;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::collection::DateRange;
use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::factors::CoverParams;
use crate::vector::AttributeValue;
use crate::zonal::ZonalParams;

/// A named collection and the band read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSource {
    pub collection: String,
    pub band: String,
}

impl BandSource {
    fn new(collection: &str, band: &str) -> Self {
        Self { collection: collection.into(), band: band.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectanceSource {
    pub collection: String,
    pub nir_band: String,
    pub red_band: String,
}

/// Selects the subbasins of one basin by attribute equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasinSelector {
    pub collection: String,
    pub field: String,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatesConfig {
    /// Inclusive, `YYYY-MM-DD`.
    pub start: String,
    /// Exclusive, `YYYY-MM-DD`.
    pub end: String,
    /// Explicit `[first, last + 1)` years for R; whole calendar years of the
    /// date range otherwise.
    #[serde(default)]
    pub years: Option<[i32; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub precipitation: BandSource,
    pub soil: BandSource,
    pub elevation: BandSource,
    pub reflectance: ReflectanceSource,
    pub land_cover: BandSource,
    pub basins: BasinSelector,
    pub dates: DatesConfig,
    pub crs: Crs,
    pub stack_scale_m: f64,
    pub cover_reduction_scale_m: f64,
    pub zonal_scale_m: f64,
    pub max_pixels: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            precipitation: BandSource::new("UCSB-CHG/CHIRPS/PENTAD", "precipitation"),
            soil: BandSource::new("OpenLandMap/SOL/SOL_TEXTURE-CLASS_USDA-TT_M/v02", "b0"),
            elevation: BandSource::new("USGS/SRTMGL1_003", "elevation"),
            reflectance: ReflectanceSource {
                collection: "COPERNICUS/S2".into(),
                nir_band: "B8".into(),
                red_band: "B4".into(),
            },
            land_cover: BandSource::new("MODIS/006/MCD12Q1", "LC_Type1"),
            basins: BasinSelector {
                collection: "WWF/HydroSHEDS/v1/Basins/hybas_12".into(),
                field: "MAIN_BAS".into(),
                value: AttributeValue::Int(4_120_025_450),
            },
            dates: DatesConfig { start: "2003-01-01".into(), end: "2018-01-01".into(), years: None },
            crs: Crs::Geographic,
            stack_scale_m: 1000.0,
            cover_reduction_scale_m: 3000.0,
            zonal_scale_m: 1000.0,
            max_pixels: 475_160_679,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("stack_scale_m", self.stack_scale_m),
            ("cover_reduction_scale_m", self.cover_reduction_scale_m),
            ("zonal_scale_m", self.zonal_scale_m),
        ] {
            if v.is_nan() || v <= 0.0 {
                return Err(Error::InvalidInput(format!("{name} must be positive, got {v}")));
            }
        }
        if self.max_pixels == 0 {
            return Err(Error::InvalidInput("max_pixels must be positive".into()));
        }
        self.date_range()?;
        if self.years()?.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no whole calendar year between {} and {}",
                self.dates.start, self.dates.end
            )));
        }
        Ok(())
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::parse(&self.dates.start, &self.dates.end)
    }

    /// Years averaged by the R factor, `[first, last + 1)`.
    pub fn years(&self) -> Result<Range<i32>> {
        match self.dates.years {
            Some([first, end]) => Ok(first..end),
            None => Ok(self.date_range()?.whole_years()),
        }
    }

    pub fn cover_params(&self) -> CoverParams {
        CoverParams { reduction_scale_m: self.cover_reduction_scale_m, max_pixels: self.max_pixels }
    }

    pub fn zonal_params(&self) -> ZonalParams {
        ZonalParams { scale_m: self.zonal_scale_m, max_pixels: self.max_pixels }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_gives_ganga_defaults() {
        let cfg = PipelineConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.years().unwrap(), 2003..2018);
        assert_eq!(cfg.crs, Crs::Geographic);
        assert_eq!(cfg.basins.value, AttributeValue::Int(4_120_025_450));
    }

    #[test]
    fn partial_override_keeps_other_defaults() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "crs": "EPSG:3857", "dates": { "start": "2020-01-01", "end": "2021-01-01" },
                 "basins": { "collection": "hybas", "field": "SUB", "value": "A" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.crs, Crs::WebMercator);
        assert_eq!(cfg.years().unwrap(), 2020..2021);
        assert_eq!(cfg.basins.value, AttributeValue::Text("A".into()));
        assert_eq!(cfg.soil.band, "b0");
    }

    #[test]
    fn explicit_years_override_date_range() {
        let cfg = PipelineConfig::from_json_str(
            r#"{ "dates": { "start": "2003-01-01", "end": "2018-01-01", "years": [2005, 2007] } }"#,
        )
        .unwrap();
        assert_eq!(cfg.years().unwrap(), 2005..2007);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(PipelineConfig::from_json_str(r#"{ "zonal_scale_m": 0 }"#).is_err());
        assert!(PipelineConfig::from_json_str(r#"{ "crs": "EPSG:32643" }"#).is_err());
        assert!(PipelineConfig::from_json_str(
            r#"{ "dates": { "start": "2003-03-01", "end": "2003-09-01" } }"#
        )
        .is_err());
    }
}
