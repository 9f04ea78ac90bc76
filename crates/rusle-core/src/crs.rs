//! Coordinate reference systems understood by the reprojection step.
//! Only WGS84 geographic and Web Mercator; both conversions are closed-form.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Metres per degree of latitude (and of longitude at the equator).
pub const METRES_PER_DEGREE: f64 = 111_320.0;

/// WGS84 semi-major axis, used as the Web Mercator sphere radius.
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Web Mercator is undefined at the poles; latitudes are clamped here.
const MERCATOR_MAX_LAT: f64 = 85.051_128_779_806_59;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// EPSG:4326, x = longitude, y = latitude, degrees.
    Geographic,
    /// EPSG:3857, metres.
    WebMercator,
}

impl Crs {
    pub fn epsg(self) -> u32 {
        match self {
            Crs::Geographic => 4326,
            Crs::WebMercator => 3857,
        }
    }

    /// CRS units per metre of ground distance (nominal, at the equator).
    pub fn units_per_metre(self) -> f64 {
        match self {
            Crs::Geographic => 1.0 / METRES_PER_DEGREE,
            Crs::WebMercator => 1.0,
        }
    }

    /// Transform a point from `self` into `to`.
    pub fn transform(self, to: Crs, x: f64, y: f64) -> (f64, f64) {
        match (self, to) {
            (Crs::Geographic, Crs::Geographic) | (Crs::WebMercator, Crs::WebMercator) => (x, y),
            (Crs::Geographic, Crs::WebMercator) => lonlat_to_mercator(x, y),
            (Crs::WebMercator, Crs::Geographic) => mercator_to_lonlat(x, y),
        }
    }
}

fn lonlat_to_mercator(lon: f64, lat: f64) -> (f64, f64) {
    let lat = lat.clamp(-MERCATOR_MAX_LAT, MERCATOR_MAX_LAT).to_radians();
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

fn mercator_to_lonlat(x: f64, y: f64) -> (f64, f64) {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS_M).exp().atan() - std::f64::consts::FRAC_PI_2).to_degrees();
    (lon, lat)
}

impl FromStr for Crs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        match code.strip_prefix("EPSG:").unwrap_or(&code) {
            "4326" => Ok(Crs::Geographic),
            "3857" | "900913" => Ok(Crs::WebMercator),
            _ => Err(Error::UnsupportedCrs(s.to_string())),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn parse_accepts_prefixed_and_bare_codes() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Geographic);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!("4326".parse::<Crs>().unwrap(), Crs::Geographic);
        assert!("EPSG:32630".parse::<Crs>().is_err());
    }

    #[test]
    fn mercator_roundtrip_within_millimetres() {
        for &(lon, lat) in &[(0.0, 0.0), (78.5, 25.3), (-120.0, -45.0), (179.9, 80.0)] {
            let (x, y) = Crs::Geographic.transform(Crs::WebMercator, lon, lat);
            let (lon2, lat2) = Crs::WebMercator.transform(Crs::Geographic, x, y);
            assert_abs_diff_eq!(lon, lon2, epsilon = 1e-9);
            assert_abs_diff_eq!(lat, lat2, epsilon = 1e-9);
        }
    }

    #[test]
    fn mercator_known_point() {
        // One degree of longitude on the equator.
        let (x, y) = Crs::Geographic.transform(Crs::WebMercator, 1.0, 0.0);
        assert_abs_diff_eq!(x, 111_319.490_793_273_57, epsilon = 1e-6);
        assert_abs_diff_eq!(y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn display_is_epsg_string() {
        assert_eq!(Crs::WebMercator.to_string(), "EPSG:3857");
    }
}
