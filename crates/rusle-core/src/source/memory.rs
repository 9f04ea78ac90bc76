use std::collections::HashMap;

use super::RasterSource;
use crate::collection::{DateRange, RasterCollection};
use crate::error::{Error, Result};
use crate::vector::PolygonCollection;

/// In-memory source; collections are registered up front.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    rasters: HashMap<String, RasterCollection>,
    polygons: HashMap<String, PolygonCollection>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_rasters(&mut self, collection: RasterCollection) -> &mut Self {
        self.rasters.insert(collection.name.clone(), collection);
        self
    }

    pub fn insert_polygons(&mut self, name: impl Into<String>, polygons: PolygonCollection) -> &mut Self {
        self.polygons.insert(name.into(), polygons);
        self
    }
}

impl RasterSource for MemorySource {
    fn load(&self, name: &str, range: Option<&DateRange>) -> Result<RasterCollection> {
        let collection = self
            .rasters
            .get(name)
            .ok_or_else(|| Error::SourceUnavailable { name: name.to_string() })?;
        match range {
            Some(r) => collection.filter_date(r),
            None if collection.is_empty() => Err(Error::EmptyResult {
                name: name.to_string(),
                detail: "collection has no scenes".into(),
            }),
            None => Ok(collection.clone()),
        }
    }

    fn load_polygons(&self, name: &str) -> Result<PolygonCollection> {
        self.polygons
            .get(name)
            .cloned()
            .ok_or_else(|| Error::SourceUnavailable { name: name.to_string() })
    }
}
