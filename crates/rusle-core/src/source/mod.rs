//! Named raster and vector collections.
//!
//! The pipeline only talks to [`RasterSource`]; where the data lives
//! (memory, a catalog directory of TIFFs) is the implementation's business.

pub mod catalog;
pub mod memory;

pub use catalog::CatalogSource;
pub use memory::MemorySource;

use crate::collection::{DateRange, RasterCollection};
use crate::error::Result;
use crate::vector::PolygonCollection;

pub trait RasterSource: Sync {
    /// Load collection `name`, filtered to `range` when given.
    ///
    /// Fails with `SourceUnavailable` for unknown names and `EmptyResult`
    /// when the date filter leaves no scene.
    fn load(&self, name: &str, range: Option<&DateRange>) -> Result<RasterCollection>;

    /// Load vector collection `name`.
    fn load_polygons(&self, name: &str) -> Result<PolygonCollection>;
}
