//! Subbasin polygons and their attributes.

use std::collections::BTreeMap;
use std::fmt;

use geo::{BoundingRect, Contains, Coord, LineString, MapCoords, MultiPolygon, Point, Polygon};
use serde::{Deserialize, Serialize};

use crate::crs::Crs;
use crate::error::{Error, Result};
use crate::raster::Bounds;

/// Scalar attribute value attached to a polygon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(i) => Some(*i as f64),
            AttributeValue::Float(f) => Some(*f),
            AttributeValue::Text(s) => s.trim().parse().ok(),
            AttributeValue::Null | AttributeValue::Bool(_) => None,
        }
    }

    /// Loose equality used by basin selectors: numbers compare by value,
    /// so `Int(4120025450)` matches `Float(4120025450.0)` and `Text("4120025450")`.
    pub fn matches(&self, other: &AttributeValue) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    fn from_json(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => AttributeValue::Text(s.clone()),
            other => AttributeValue::Text(other.to_string()),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => Ok(()),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Int(i) => write!(f, "{i}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::Text(s) => f.write_str(s),
        }
    }
}

pub type Attributes = BTreeMap<String, AttributeValue>;

/// One subbasin: geometry plus ordered attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
    pub geometry: MultiPolygon<f64>,
    pub properties: Attributes,
}

impl PolygonFeature {
    pub fn new(geometry: MultiPolygon<f64>) -> Self {
        Self { geometry, properties: Attributes::new() }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.geometry.contains(&Point::new(x, y))
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.geometry.bounding_rect().map(|r| Bounds {
            min_x: r.min().x,
            min_y: r.min().y,
            max_x: r.max().x,
            max_y: r.max().y,
        })
    }
}

/// Ordered polygons sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonCollection {
    pub crs: Crs,
    pub features: Vec<PolygonFeature>,
}

impl PolygonCollection {
    pub fn new(crs: Crs, features: Vec<PolygonFeature>) -> Self {
        Self { crs, features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Parse a GeoJSON FeatureCollection whose features are Polygons or
    /// MultiPolygons; other geometry types are rejected.
    pub fn from_geojson_str(text: &str, crs: Crs) -> Result<Self> {
        let gj: geojson::GeoJson = text.parse()?;
        let fc = match gj {
            geojson::GeoJson::FeatureCollection(fc) => fc,
            _ => return Err(Error::InvalidInput("expected a GeoJSON FeatureCollection".into())),
        };

        let mut features = Vec::with_capacity(fc.features.len());
        for (i, f) in fc.features.into_iter().enumerate() {
            let Some(geom) = f.geometry else {
                return Err(Error::InvalidInput(format!("feature {i} has no geometry")));
            };
            let geometry = match geom.value {
                geojson::Value::Polygon(rings) => MultiPolygon::new(vec![polygon_from_rings(i, &rings)?]),
                geojson::Value::MultiPolygon(polys) => MultiPolygon::new(
                    polys.iter().map(|p| polygon_from_rings(i, p)).collect::<Result<Vec<_>>>()?,
                ),
                other => {
                    return Err(Error::InvalidInput(format!(
                        "feature {i}: unsupported geometry {}",
                        geometry_kind(&other)
                    )))
                }
            };
            let properties = f
                .properties
                .unwrap_or_default()
                .iter()
                .map(|(k, v)| (k.clone(), AttributeValue::from_json(v)))
                .collect();
            features.push(PolygonFeature { geometry, properties });
        }
        Ok(Self { crs, features })
    }

    /// Features whose `key` attribute matches `value`.
    pub fn filter_eq(&self, key: &str, value: &AttributeValue) -> PolygonCollection {
        let features = self
            .features
            .iter()
            .filter(|f| f.get_property(key).is_some_and(|v| v.matches(value)))
            .cloned()
            .collect();
        PolygonCollection { crs: self.crs, features }
    }

    /// All polygons merged into one multipolygon (the area of interest).
    pub fn union_geometry(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(
            self.features
                .iter()
                .flat_map(|f| f.geometry.0.iter().cloned())
                .collect(),
        )
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.features.iter().filter_map(|f| f.bounds()).reduce(|a, b| Bounds {
            min_x: a.min_x.min(b.min_x),
            min_y: a.min_y.min(b.min_y),
            max_x: a.max_x.max(b.max_x),
            max_y: a.max_y.max(b.max_y),
        })
    }

    pub fn to_crs(&self, crs: Crs) -> PolygonCollection {
        if crs == self.crs {
            return self.clone();
        }
        let features = self
            .features
            .iter()
            .map(|f| PolygonFeature {
                geometry: reproject_geometry(&f.geometry, self.crs, crs),
                properties: f.properties.clone(),
            })
            .collect();
        PolygonCollection { crs, features }
    }
}

/// Transform every vertex of `geom` from `from` into `to`.
pub fn reproject_geometry(geom: &MultiPolygon<f64>, from: Crs, to: Crs) -> MultiPolygon<f64> {
    if from == to {
        return geom.clone();
    }
    geom.map_coords(move |c: Coord<f64>| {
        let (x, y) = from.transform(to, c.x, c.y);
        Coord { x, y }
    })
}

/// Axis-aligned rectangle as a multipolygon.
pub fn rectangle(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> MultiPolygon<f64> {
    let ring = LineString::from(vec![
        (min_x, min_y),
        (max_x, min_y),
        (max_x, max_y),
        (min_x, max_y),
        (min_x, min_y),
    ]);
    MultiPolygon::new(vec![Polygon::new(ring, vec![])])
}

fn geometry_kind(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

/// Rings of feature `index` as a polygon. Every position must carry at
/// least x and y; extra ordinates are ignored.
fn polygon_from_rings(index: usize, rings: &[Vec<Vec<f64>>]) -> Result<Polygon<f64>> {
    let to_ring = |ring: &Vec<Vec<f64>>| -> Result<LineString<f64>> {
        ring.iter()
            .map(|p| match p.as_slice() {
                [x, y, ..] => Ok((*x, *y)),
                _ => Err(Error::InvalidInput(format!(
                    "feature {index}: position {p:?} needs at least two coordinates"
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(LineString::from)
    };
    let Some(exterior) = rings.first() else {
        return Err(Error::InvalidInput(format!("feature {index}: polygon has no exterior ring")));
    };
    let interiors = rings.iter().skip(1).map(to_ring).collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(to_ring(exterior)?, interiors))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASINS: &str = r#"{
      "type": "FeatureCollection",
      "features": [
        {"type": "Feature",
         "properties": {"HYBAS_ID": 1, "MAIN_BAS": 4120025450, "NAME": "upper"},
         "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}},
        {"type": "Feature",
         "properties": {"HYBAS_ID": 2, "MAIN_BAS": 4120025450},
         "geometry": {"type": "MultiPolygon", "coordinates": [[[[1,0],[2,0],[2,1],[1,1],[1,0]]]]}},
        {"type": "Feature",
         "properties": {"HYBAS_ID": 3, "MAIN_BAS": 7},
         "geometry": {"type": "Polygon", "coordinates": [[[5,5],[6,5],[6,6],[5,6],[5,5]]]}}
      ]
    }"#;

    #[test]
    fn geojson_parses_polygons_and_attributes() {
        let pc = PolygonCollection::from_geojson_str(BASINS, Crs::Geographic).unwrap();
        assert_eq!(pc.len(), 3);
        assert_eq!(pc.features[0].get_property("NAME"), Some(&AttributeValue::Text("upper".into())));
        assert!(pc.features[1].contains(1.5, 0.5));
        assert!(!pc.features[1].contains(0.5, 0.5));
    }

    #[test]
    fn filter_eq_selects_basin_by_numeric_id() {
        let pc = PolygonCollection::from_geojson_str(BASINS, Crs::Geographic).unwrap();
        let main = pc.filter_eq("MAIN_BAS", &AttributeValue::Float(4_120_025_450.0));
        assert_eq!(main.len(), 2);
        let b = main.bounds().unwrap();
        assert_eq!((b.min_x, b.max_x, b.min_y, b.max_y), (0.0, 2.0, 0.0, 1.0));
    }

    #[test]
    fn non_polygon_geometry_is_rejected() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[0,0]}}]}"#;
        assert!(PolygonCollection::from_geojson_str(text, Crs::Geographic).is_err());
    }

    #[test]
    fn short_position_is_rejected_not_dropped() {
        let text = r#"{"type": "FeatureCollection", "features": [
          {"type": "Feature", "properties": {},
           "geometry": {"type": "Polygon", "coordinates": [[[0,0],[1,0],[1],[0,1],[0,0]]]}}]}"#;
        assert!(PolygonCollection::from_geojson_str(text, Crs::Geographic).is_err());

        let rings = vec![vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![1.0], vec![0.0, 0.0]]];
        let err = polygon_from_rings(3, &rings).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(ref m) if m.contains("feature 3")), "got {err}");
        assert!(polygon_from_rings(3, &[]).is_err());
    }

    #[test]
    fn reprojection_moves_vertices_into_metres() {
        let pc = PolygonCollection::new(
            Crs::Geographic,
            vec![PolygonFeature::new(rectangle(0.0, 0.0, 1.0, 1.0))],
        );
        let merc = pc.to_crs(Crs::WebMercator);
        let b = merc.bounds().unwrap();
        assert!((b.max_x - 111_319.49).abs() < 0.01);
        assert_eq!(merc.crs, Crs::WebMercator);
    }
}
