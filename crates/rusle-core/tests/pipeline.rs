//! End-to-end run on a 3×3 synthetic basin with two subbasins.

use approx::assert_relative_eq;

use rusle_core::collection::{parse_date, RasterCollection, Scene};
use rusle_core::config::{BasinSelector, DatesConfig};
use rusle_core::crs::Crs;
use rusle_core::erosion::{soil_loss_from_zonal, SoilLossTable, SOIL_EROSION};
use rusle_core::export::{export_table, ExportFormat};
use rusle_core::raster::{Grid, Raster};
use rusle_core::source::MemorySource;
use rusle_core::stack::Factor;
use rusle_core::vector::{rectangle, AttributeValue, PolygonCollection, PolygonFeature};
use rusle_core::{Error, PipelineConfig, RuslePipeline};

fn grid() -> Grid {
    Grid::new(Crs::WebMercator, 0.0, 3000.0, 1000.0, 3, 3)
}

fn dated(date: &str, raster: Raster) -> Scene {
    let d = parse_date(date).unwrap();
    Scene::dated(d, d, raster)
}

/// Column 0 is subbasin A, columns 1–2 are subbasin B.
fn by_column(name: &str, a: f64, b: f64) -> Raster {
    Raster::from_fn(grid(), name, move |_, c| if c == 0 { a } else { b })
}

fn config() -> PipelineConfig {
    PipelineConfig {
        basins: BasinSelector {
            collection: "basins".into(),
            field: "MAIN_BAS".into(),
            value: AttributeValue::Int(1),
        },
        dates: DatesConfig { start: "2020-01-01".into(), end: "2021-01-01".into(), years: None },
        crs: Crs::WebMercator,
        stack_scale_m: 1000.0,
        cover_reduction_scale_m: 1000.0,
        zonal_scale_m: 1000.0,
        ..PipelineConfig::default()
    }
}

fn source(soil_code: f64) -> MemorySource {
    let cfg = config();
    let mut src = MemorySource::new();

    src.insert_polygons(
        "basins",
        PolygonCollection::new(
            Crs::WebMercator,
            vec![
                PolygonFeature::new(rectangle(0.0, 0.0, 1000.0, 3000.0))
                    .with_property("MAIN_BAS", AttributeValue::Int(1))
                    .with_property("HYBAS_ID", AttributeValue::Text("A".into())),
                PolygonFeature::new(rectangle(1000.0, 0.0, 3000.0, 3000.0))
                    .with_property("MAIN_BAS", AttributeValue::Int(1))
                    .with_property("HYBAS_ID", AttributeValue::Text("B".into())),
                PolygonFeature::new(rectangle(5000.0, 0.0, 6000.0, 1000.0))
                    .with_property("MAIN_BAS", AttributeValue::Int(2))
                    .with_property("HYBAS_ID", AttributeValue::Text("other".into())),
            ],
        ),
    );

    // Two pentads per pixel summing to 500 mm (A) and 700 mm (B); one 2019
    // scene outside the year range.
    src.insert_rasters(RasterCollection::new(
        cfg.precipitation.collection.clone(),
        vec![
            dated("2019-12-27", by_column("precipitation", 9000.0, 9000.0)),
            dated("2020-03-01", by_column("precipitation", 200.0, 300.0)),
            dated("2020-09-01", by_column("precipitation", 300.0, 400.0)),
        ],
    ));
    src.insert_rasters(RasterCollection::new(
        cfg.soil.collection.clone(),
        vec![Scene::undated(Raster::filled(grid(), "b0", soil_code))],
    ));
    src.insert_rasters(RasterCollection::new(
        cfg.elevation.collection.clone(),
        vec![Scene::undated(Raster::filled(grid(), "elevation", 250.0))],
    ));
    let s2 = Raster::filled(grid(), "B8", 0.75).add_bands(Raster::filled(grid(), "B4", 0.25)).unwrap();
    src.insert_rasters(RasterCollection::new(cfg.reflectance.collection.clone(), vec![dated("2020-06-01", s2)]));
    src.insert_rasters(RasterCollection::new(
        cfg.land_cover.collection.clone(),
        vec![dated("2020-01-01", Raster::filled(grid(), "LC_Type1", 12.0))],
    ));
    src
}

/// The same basin laid out in EPSG:4326: 3×3 cells of 0.01° near 25°N,
/// subbasin A on the first column, B on the other two. Every layer is
/// uniform so resampling cannot shift the means.
fn geographic_source() -> MemorySource {
    let cfg = config();
    let geo = Grid::new(Crs::Geographic, 80.0, 25.03, 0.01, 3, 3);
    let mut src = MemorySource::new();

    src.insert_polygons(
        "basins",
        PolygonCollection::new(
            Crs::Geographic,
            vec![
                PolygonFeature::new(rectangle(80.0, 25.0, 80.01, 25.03))
                    .with_property("MAIN_BAS", AttributeValue::Int(1))
                    .with_property("HYBAS_ID", AttributeValue::Text("A".into())),
                PolygonFeature::new(rectangle(80.01, 25.0, 80.03, 25.03))
                    .with_property("MAIN_BAS", AttributeValue::Int(1))
                    .with_property("HYBAS_ID", AttributeValue::Text("B".into())),
            ],
        ),
    );
    src.insert_rasters(RasterCollection::new(
        cfg.precipitation.collection.clone(),
        vec![
            dated("2020-03-01", Raster::filled(geo, "precipitation", 200.0)),
            dated("2020-09-01", Raster::filled(geo, "precipitation", 300.0)),
        ],
    ));
    src.insert_rasters(RasterCollection::new(
        cfg.soil.collection.clone(),
        vec![Scene::undated(Raster::filled(geo, "b0", 6.0))],
    ));
    src.insert_rasters(RasterCollection::new(
        cfg.elevation.collection.clone(),
        vec![Scene::undated(Raster::filled(geo, "elevation", 250.0))],
    ));
    let s2 = Raster::filled(geo, "B8", 0.75).add_bands(Raster::filled(geo, "B4", 0.25)).unwrap();
    src.insert_rasters(RasterCollection::new(cfg.reflectance.collection.clone(), vec![dated("2020-06-01", s2)]));
    src.insert_rasters(RasterCollection::new(
        cfg.land_cover.collection.clone(),
        vec![dated("2020-01-01", Raster::filled(geo, "LC_Type1", 12.0))],
    ));
    src
}

#[test]
fn two_subbasin_scenario_matches_hand_computation() {
    let src = source(6.0);
    let result = RuslePipeline::new(&src, config()).unwrap().run().unwrap();
    let zonal = &result.zonal;

    assert_eq!(zonal.len(), 2);
    assert_eq!(zonal.pixel_counts(), &[3, 6]);
    assert_eq!(result.years, 2020..2021);
    assert_eq!(result.stack.raster().band_names(), vec!["R", "K", "LS", "C", "LULC"]);

    assert_relative_eq!(zonal.mean(0, "R").unwrap(), 260.5, epsilon = 1e-9);
    assert_relative_eq!(zonal.mean(1, "R").unwrap(), 333.1, epsilon = 1e-9);
    for i in 0..2 {
        assert_relative_eq!(zonal.mean(i, "K").unwrap(), 0.0264, epsilon = 1e-12);
        assert_relative_eq!(zonal.mean(i, "LS").unwrap(), 1.699, epsilon = 1e-3);
        assert_eq!(zonal.mean(i, "C"), Some(0.0));
        assert_eq!(zonal.mean(i, "LULC"), Some(12.0));
    }
    assert_eq!(
        zonal.features()[1].get_property("HYBAS_ID"),
        Some(&AttributeValue::Text("B".into()))
    );

    // Uniform NDVI: flat T range, C collapses to zero and so does soil loss.
    assert_eq!(result.c_range.0, result.c_range.1);
    assert_eq!(result.c_masked, 0);
    assert_eq!(soil_loss_from_zonal(zonal), vec![Some(0.0), Some(0.0)]);
}

#[test]
fn soil_code_five_uses_the_next_step_down() {
    let src = source(5.0);
    let result = RuslePipeline::new(&src, config()).unwrap().run().unwrap();
    assert_relative_eq!(result.zonal.mean(0, "K").unwrap(), 0.0423, epsilon = 1e-12);
}

#[test]
fn exported_table_feeds_the_erosion_step() {
    let src = source(6.0);
    let result = RuslePipeline::new(&src, config()).unwrap().run().unwrap();

    let mut csv = Vec::new();
    export_table(&result.zonal, &mut csv, ExportFormat::Csv).unwrap();
    let text = String::from_utf8(csv.clone()).unwrap();
    assert!(text.starts_with("HYBAS_ID,MAIN_BAS,R,K,LS,C,LULC"), "got {text}");

    let mut table = SoilLossTable::read_csv(csv.as_slice()).unwrap();
    let mean = table.add_soil_loss().unwrap();
    assert_eq!(mean, Some(0.0));
    assert_eq!(table.numeric_column(SOIL_EROSION).unwrap(), vec![Some(0.0), Some(0.0)]);
}

#[test]
fn rerun_is_bit_identical() {
    let src = source(6.0);
    let pipeline = RuslePipeline::new(&src, config()).unwrap();
    let a = pipeline.run().unwrap();
    let b = pipeline.run().unwrap();
    assert_eq!(a.zonal, b.zonal);
    assert_eq!(a.stack, b.stack);
}

#[test]
fn year_without_precipitation_fails_in_r_stage() {
    let src = source(6.0);
    let mut cfg = config();
    cfg.dates.years = Some([2020, 2022]);
    let err = RuslePipeline::new(&src, cfg).unwrap().run().unwrap_err();
    match &err {
        Error::Stage { factor, .. } => assert_eq!(*factor, Factor::R),
        other => panic!("expected a staged error, got {other}"),
    }
    assert!(matches!(err.root(), Error::EmptyResult { .. }));
}

#[test]
fn pixel_limit_is_enforced() {
    let src = source(6.0);
    let cfg = PipelineConfig { max_pixels: 4, ..config() };
    let err = RuslePipeline::new(&src, cfg).unwrap().run().unwrap_err();
    assert!(matches!(err.root(), Error::ResourceLimitExceeded { .. }), "got {err}");
}

#[test]
fn geographic_inputs_are_stacked_in_web_mercator() {
    let src = geographic_source();
    let result = RuslePipeline::new(&src, config()).unwrap().run().unwrap();

    assert_eq!(result.subbasins.crs, Crs::WebMercator);
    assert_eq!(result.stack.grid().crs, Crs::WebMercator);
    assert_eq!(result.stack.grid().cell_size, 1000.0);
    // 0.01° of longitude is ~1113 m and 0.03° of latitude at 25°N is
    // ~3685 m, so A holds one column of four 1 km centres and B two.
    assert_eq!(result.zonal.pixel_counts(), &[4, 8]);

    let zonal = &result.zonal;
    for i in 0..2 {
        assert_relative_eq!(zonal.mean(i, "R").unwrap(), 260.5, epsilon = 1e-9);
        assert_relative_eq!(zonal.mean(i, "K").unwrap(), 0.0264, epsilon = 1e-12);
        assert_relative_eq!(zonal.mean(i, "LS").unwrap(), 1.699, epsilon = 1e-3);
        assert_eq!(zonal.mean(i, "C"), Some(0.0));
        assert_eq!(zonal.mean(i, "LULC"), Some(12.0));
    }
}

#[test]
fn fine_stack_scale_is_refused_not_allocated() {
    let src = source(6.0);
    let cfg = PipelineConfig { stack_scale_m: 1e-6, max_pixels: 1_000, ..config() };
    let err = RuslePipeline::new(&src, cfg).unwrap().run().unwrap_err();
    assert!(
        matches!(err.root(), Error::ResourceLimitExceeded { stage: "factor stack", .. }),
        "got {err}"
    );
}
