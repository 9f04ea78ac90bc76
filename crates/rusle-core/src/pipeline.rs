//! Pipeline orchestrator: basin selection, factor derivation, stacking and
//! zonal aggregation.

use std::ops::Range;
use std::time::Instant;

use geo::MultiPolygon;
use tracing::info;

use crate::collection::{DateRange, RasterCollection};
use crate::config::PipelineConfig;
use crate::crs::Crs;
use crate::error::{Error, Result, ResultExt};
use crate::factors::{
    compute_c_factor, compute_k_factor, compute_ls_factor, compute_lulc, compute_r_factor, CoverFactor,
};
use crate::parallel;
use crate::raster::Raster;
use crate::source::RasterSource;
use crate::stack::{target_grid, Factor, FactorLayers, FactorStack};
use crate::vector::{reproject_geometry, PolygonCollection};
use crate::zonal::{zonal_means, ZonalResult};

// ── Public structs ────────────────────────────────────────────────────────────

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// Selected subbasins in the target CRS.
    pub subbasins: PolygonCollection,
    pub stack: FactorStack,
    pub zonal: ZonalResult,
    pub years: Range<i32>,
    /// `(Tmin, Tmax)` the C factor was normalized against.
    pub c_range: (f64, f64),
    /// NDVI pixels masked at the transform singularity.
    pub c_masked: usize,
    pub elapsed_ms: u64,
}

/// Area of interest: the union of the selected subbasins, with its CRS.
struct Aoi {
    crs: Crs,
    geometry: MultiPolygon<f64>,
}

impl Aoi {
    fn in_crs(&self, crs: Crs) -> MultiPolygon<f64> {
        reproject_geometry(&self.geometry, self.crs, crs)
    }
}

// ── Orchestrator ──────────────────────────────────────────────────────────────

pub struct RuslePipeline<'a, S: RasterSource> {
    source: &'a S,
    config: PipelineConfig,
}

impl<'a, S: RasterSource> RuslePipeline<'a, S> {
    pub fn new(source: &'a S, config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { source, config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage.
    ///
    /// Order:
    ///   1. Basin selection
    ///   2. R, K, LS, C, LULC (concurrently, no data dependency)
    ///   3. Stack onto the common grid
    ///   4. Zonal means per subbasin
    pub fn run(&self) -> Result<PipelineResult> {
        let started = Instant::now();

        // ── 1. Basin selection ──────────────────────────────────────────────
        let subbasins = self.select_subbasins()?;
        let aoi = Aoi { crs: subbasins.crs, geometry: subbasins.union_geometry() };
        let subbasins = subbasins.to_crs(self.config.crs);
        let bounds = subbasins.bounds().ok_or_else(|| Error::EmptyResult {
            name: self.config.basins.collection.clone(),
            detail: "selected subbasins have no extent".into(),
        })?;

        // ── 2. Factors ──────────────────────────────────────────────────────
        let dates = self.config.date_range()?;
        let years = self.config.years()?;
        let ((r, k), (ls, (c, lulc))) = parallel::join(
            || parallel::join(|| self.r_factor(&aoi, years.clone()), || self.k_factor(&aoi)),
            || {
                parallel::join(
                    || self.ls_factor(&aoi),
                    || parallel::join(|| self.c_factor(&aoi, &dates), || self.lulc(&aoi, &dates)),
                )
            },
        );
        let (r, k, ls, cover, lulc) = (r?, k?, ls?, c?, lulc?);
        let layers = FactorLayers { r, k, ls, c: cover.raster, lulc };

        // ── 3. Stack ────────────────────────────────────────────────────────
        let grid = target_grid(self.config.crs, bounds, self.config.stack_scale_m, self.config.max_pixels)?;
        info!(grid = %grid.describe(), "stacking factors");
        let stack = FactorStack::assemble(&layers, &grid)?;

        // ── 4. Zonal means ──────────────────────────────────────────────────
        let zonal = zonal_means(stack.raster(), &subbasins, &self.config.zonal_params())?;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        info!(subbasins = zonal.len(), elapsed_ms, "pipeline finished");
        Ok(PipelineResult {
            subbasins,
            stack,
            zonal,
            years,
            c_range: (cover.t_min, cover.t_max),
            c_masked: cover.masked,
            elapsed_ms,
        })
    }

    fn select_subbasins(&self) -> Result<PolygonCollection> {
        let sel = &self.config.basins;
        let all = self.source.load_polygons(&sel.collection)?;
        let picked = all.filter_eq(&sel.field, &sel.value);
        if picked.is_empty() {
            return Err(Error::EmptyResult {
                name: sel.collection.clone(),
                detail: format!("no feature with {} = {}", sel.field, sel.value),
            });
        }
        info!(
            collection = %sel.collection,
            selected = picked.len(),
            of = all.len(),
            "subbasins selected"
        );
        Ok(picked)
    }

    fn load(&self, factor: Factor, name: &str, range: Option<&DateRange>) -> Result<RasterCollection> {
        self.source.load(name, range).in_stage(factor, "load")
    }

    /// AOI expressed in the CRS of the collection's first scene.
    fn aoi_for(aoi: &Aoi, collection: &RasterCollection, factor: Factor) -> Result<MultiPolygon<f64>> {
        let crs = collection
            .scenes
            .first()
            .map(|s| s.raster.grid.crs)
            .ok_or_else(|| Error::EmptyResult {
                name: collection.name.clone(),
                detail: "collection has no scenes".into(),
            })
            .in_stage(factor, "load")?;
        Ok(aoi.in_crs(crs))
    }

    fn r_factor(&self, aoi: &Aoi, years: Range<i32>) -> Result<Raster> {
        let src = &self.config.precipitation;
        let span = DateRange::new(DateRange::year(years.start)?.start, DateRange::year(years.end - 1)?.end)
            .in_stage(Factor::R, "load")?;
        let precip = self.load(Factor::R, &src.collection, Some(&span))?;
        let region = Self::aoi_for(aoi, &precip, Factor::R)?;
        compute_r_factor(&precip, &src.band, years, Some(&region)).in_stage(Factor::R, "annual erosivity")
    }

    fn k_factor(&self, aoi: &Aoi) -> Result<Raster> {
        let src = &self.config.soil;
        let soil = self.load(Factor::K, &src.collection, None)?;
        let region = Self::aoi_for(aoi, &soil, Factor::K)?;
        let first = soil.first().in_stage(Factor::K, "load")?;
        compute_k_factor(&first, &src.band, Some(&region)).in_stage(Factor::K, "classify")
    }

    fn ls_factor(&self, aoi: &Aoi) -> Result<Raster> {
        let src = &self.config.elevation;
        let dem = self.load(Factor::LS, &src.collection, None)?;
        let region = Self::aoi_for(aoi, &dem, Factor::LS)?;
        let first = dem.first().in_stage(Factor::LS, "load")?;
        compute_ls_factor(&first, &src.band, Some(&region)).in_stage(Factor::LS, "slope")
    }

    fn c_factor(&self, aoi: &Aoi, dates: &DateRange) -> Result<CoverFactor> {
        let src = &self.config.reflectance;
        let s2 = self.load(Factor::C, &src.collection, Some(dates))?;
        let region = Self::aoi_for(aoi, &s2, Factor::C)?;
        compute_c_factor(&s2, &src.nir_band, &src.red_band, Some(&region), &self.config.cover_params())
            .in_stage(Factor::C, "normalize")
    }

    fn lulc(&self, aoi: &Aoi, dates: &DateRange) -> Result<Raster> {
        let src = &self.config.land_cover;
        let modis = self.load(Factor::LULC, &src.collection, Some(dates))?;
        let region = Self::aoi_for(aoi, &modis, Factor::LULC)?;
        compute_lulc(&modis, &src.band, Some(&region)).in_stage(Factor::LULC, "select")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Scene;
    use crate::raster::Grid;
    use crate::source::MemorySource;
    use crate::vector::{rectangle, AttributeValue, PolygonFeature};

    #[test]
    fn unknown_basin_value_is_empty_result() {
        let mut src = MemorySource::new();
        src.insert_polygons(
            "WWF/HydroSHEDS/v1/Basins/hybas_12",
            PolygonCollection::new(
                Crs::Geographic,
                vec![PolygonFeature::new(rectangle(77.0, 30.0, 78.0, 31.0))
                    .with_property("MAIN_BAS", AttributeValue::Int(1))],
            ),
        );
        let pipeline = RuslePipeline::new(&src, PipelineConfig::default()).unwrap();
        let err = pipeline.run().unwrap_err();
        assert!(matches!(err, Error::EmptyResult { .. }), "got {err}");
    }

    #[test]
    fn missing_factor_source_names_the_factor() {
        let mut src = MemorySource::new();
        src.insert_polygons(
            "WWF/HydroSHEDS/v1/Basins/hybas_12",
            PolygonCollection::new(
                Crs::Geographic,
                vec![PolygonFeature::new(rectangle(77.0, 30.0, 78.0, 31.0))
                    .with_property("MAIN_BAS", AttributeValue::Int(4_120_025_450))],
            ),
        );
        let err = RuslePipeline::new(&src, PipelineConfig::default()).unwrap().run().unwrap_err();
        assert!(matches!(err.root(), Error::SourceUnavailable { .. }));
        assert!(matches!(err, Error::Stage { stage: "load", .. }));
    }

    #[test]
    fn aoi_follows_the_first_scene_crs() {
        let aoi = Aoi { crs: Crs::Geographic, geometry: rectangle(80.0, 25.0, 80.01, 25.03) };
        let grid = Grid::new(Crs::WebMercator, 0.0, 10.0, 10.0, 1, 1);
        let soil = RasterCollection::new("soil", vec![Scene::undated(Raster::filled(grid, "b0", 6.0))]);
        let region = RuslePipeline::<MemorySource>::aoi_for(&aoi, &soil, Factor::K).unwrap();
        assert_eq!(region, aoi.in_crs(Crs::WebMercator));

        let empty = RasterCollection::new("soil", vec![]);
        let err = RuslePipeline::<MemorySource>::aoi_for(&aoi, &empty, Factor::K).unwrap_err();
        assert!(matches!(err, Error::Stage { factor: Factor::K, stage: "load", .. }), "got {err}");
        assert!(matches!(err.root(), Error::EmptyResult { .. }));
    }
}
