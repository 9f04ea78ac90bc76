use geo::MultiPolygon;
use tracing::debug;

use crate::collection::RasterCollection;
use crate::error::Result;
use crate::raster::Raster;
use crate::reproject::clip;

/// Land-cover class raster carried through the stack unchanged: first scene,
/// selected band, clipped, renamed `LULC`.
pub fn compute_lulc(collection: &RasterCollection, band: &str, aoi: Option<&MultiPolygon<f64>>) -> Result<Raster> {
    let first = collection.select(band)?.first()?;
    debug!(scenes = collection.len(), "LULC from first scene");
    let first = match aoi {
        Some(aoi) => clip(&first, aoi),
        None => first,
    };
    Ok(first.rename("LULC"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::{parse_date, Scene};
    use crate::crs::Crs;
    use crate::raster::Grid;
    use crate::vector::rectangle;

    #[test]
    fn takes_first_scene_and_clips() {
        let grid = Grid::new(Crs::WebMercator, 0.0, 2.0, 1.0, 2, 2);
        let d = parse_date("2003-01-01").unwrap();
        let modis = RasterCollection::new(
            "MCD12Q1",
            vec![
                Scene::dated(d, d, Raster::filled(grid, "LC_Type1", 12.0)),
                Scene::dated(d, d, Raster::filled(grid, "LC_Type1", 7.0)),
            ],
        );
        let aoi = rectangle(0.0, 1.0, 2.0, 2.0);
        let lulc = compute_lulc(&modis, "LC_Type1", Some(&aoi)).unwrap();
        assert_eq!(lulc.band_names(), vec!["LULC"]);
        assert_eq!(lulc.get(0, 0), 12.0);
        assert!(lulc.get(1, 1).is_nan());
    }
}
