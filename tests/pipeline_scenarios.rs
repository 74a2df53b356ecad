use chrono::{DateTime, Days, NaiveDate, Utc};
use geo::{polygon, MultiPolygon};
use npp8_biomass::crs::MODIS_SINUSOIDAL;
use npp8_biomass::region::AttributeValue;
use npp8_biomass::source::{GPP_8DAY, NPP_ANNUAL};
use npp8_biomass::{
    BiomassError, Diagnostic, Feature, GridSpec, MemorySource, Pipeline, PipelineConfig, Raster,
    RasterSeries, Stage, BIOMASS_BAND, NPP8_BAND,
};

const EXPECTED_NPP8: f64 = (10.0 / 460.0) * 200.0;
const EXPECTED_BIOMASS: f64 = EXPECTED_NPP8 * 2.5;

fn at(date: NaiveDate) -> DateTime<Utc> {
    DateTime::<Utc>::from_naive_utc_and_offset(date.and_hms_opt(0, 0, 0).unwrap(), Utc)
}

fn source_grid(origin_x: f64) -> GridSpec {
    GridSpec::north_up("EPSG:3857", origin_x, 1000.0, 100.0, 10, 10).unwrap()
}

/// 46 eight-day GPP rasters per year, all pixels 10.
fn gpp_series(years: &[i32], grid: &GridSpec) -> RasterSeries {
    let mut rasters = Vec::new();
    for &year in years {
        let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
        for step in 0..46u64 {
            let date = jan1.checked_add_days(Days::new(step * 8)).unwrap();
            rasters.push(Raster::filled(grid.clone(), "Gpp", Some(10.0)).with_time_start(at(date)));
        }
    }
    RasterSeries::new(vec!["Gpp".to_string()], rasters).unwrap()
}

/// One annual NPP raster per year, all pixels 200.
fn npp_series(years: &[i32], grid: &GridSpec) -> RasterSeries {
    let rasters = years
        .iter()
        .map(|&year| {
            let jan1 = NaiveDate::from_ymd_opt(year, 1, 1).unwrap();
            Raster::filled(grid.clone(), "Npp", Some(200.0)).with_time_start(at(jan1))
        })
        .collect();
    RasterSeries::new(vec!["Npp".to_string()], rasters).unwrap()
}

fn square(x0: f64, y0: f64, x1: f64, y1: f64) -> MultiPolygon<f64> {
    MultiPolygon::new(vec![polygon![
        (x: x0, y: y0),
        (x: x1, y: y0),
        (x: x1, y: y1),
        (x: x0, y: y1),
        (x: x0, y: y0),
    ]])
}

fn district(id: i64) -> Feature {
    Feature::new(square(200.0, 200.0, 800.0, 800.0))
        .with_attribute("OBJECTID", AttributeValue::Integer(id))
}

fn config() -> PipelineConfig {
    PipelineConfig {
        start_year: 2023,
        end_year: 2024,
        crs: "EPSG:3857".to_string(),
        scale: 100.0,
        coefficient: 2.5,
        ..PipelineConfig::default()
    }
}

fn source(gpp_years: &[i32], npp_years: &[i32], grid: &GridSpec) -> MemorySource {
    MemorySource::new()
        .with_collection(GPP_8DAY, gpp_series(gpp_years, grid))
        .with_collection(NPP_ANNUAL, npp_series(npp_years, grid))
}

#[test]
fn two_year_window_yields_constant_biomass() {
    let grid = source_grid(0.0);
    let source = source(&[2023, 2024], &[2023, 2024], &grid);
    let pipeline = Pipeline::new(config()).unwrap();

    let output = pipeline.run(&source, &[district(29), district(30)]).unwrap();

    assert_eq!(output.series.len(), 92);
    for point in &output.series {
        let value = point.value.expect("every step has data");
        assert!((value - EXPECTED_BIOMASS).abs() < 1e-6);
    }
    assert!((EXPECTED_BIOMASS - 10.869565).abs() < 1e-6);

    // chronological order is preserved
    assert!(output
        .series
        .windows(2)
        .all(|w| w[0].time_start < w[1].time_start));

    let composite = output.composite.band(BIOMASS_BAND).unwrap();
    assert_eq!(composite.data.dim(), (6, 6));
    for pixel in composite.data.iter() {
        assert!((pixel.unwrap() - EXPECTED_BIOMASS).abs() < 1e-6);
    }

    let npp8 = output.npp8_composite.band(NPP8_BAND).unwrap();
    assert_eq!(npp8.data.dim(), (6, 6));
    for pixel in npp8.data.iter() {
        assert!((pixel.unwrap() - EXPECTED_NPP8).abs() < 1e-6);
    }
    assert!((EXPECTED_NPP8 - 4.3478).abs() < 1e-4);
    assert!(output.diagnostics.is_empty());
}

#[test]
fn modis_sinusoidal_inputs_reach_lonlat_target() {
    // 500 m MODIS-style tiles just north-east of (0, 0)
    let grid = GridSpec::north_up(MODIS_SINUSOIDAL, 0.0, 5000.0, 500.0, 12, 12).unwrap();
    let source = source(&[2023, 2024], &[2023, 2024], &grid);
    let config = PipelineConfig {
        crs: "EPSG:4326".to_string(),
        scale: 500.0,
        ..config()
    };
    let region = Feature::new(square(0.0, 0.0, 0.02, 0.02))
        .with_attribute("OBJECTID", AttributeValue::Integer(30));

    let output = Pipeline::new(config).unwrap().run(&source, &[region]).unwrap();

    assert_eq!(output.series.len(), 92);
    for point in &output.series {
        let value = point.value.expect("sinusoidal pixels cover the region");
        assert!((value - EXPECTED_BIOMASS).abs() < 1e-6);
    }
    assert!(output.composite.band(BIOMASS_BAND).unwrap().valid_count() > 0);
    assert!(output.diagnostics.is_empty());
}

#[test]
fn missing_npp_year_is_reported_not_fatal() {
    let grid = source_grid(0.0);
    let source = source(&[2023, 2024], &[2023], &grid);
    let output = Pipeline::new(config())
        .unwrap()
        .run(&source, &[district(30)])
        .unwrap();

    assert_eq!(output.series.len(), 92);
    assert!(output.series[..46].iter().all(|p| p.value.is_some()));
    assert!(output.series[46..].iter().all(|p| p.value.is_none()));
    assert_eq!(
        output.diagnostics,
        vec![Diagnostic::EmptyAggregate {
            band: "Npp".to_string(),
            year: 2024
        }]
    );
}

#[test]
fn region_outside_rasters_gives_nodata() {
    let far_away = source_grid(100_000.0);
    let source = source(&[2023, 2024], &[2023, 2024], &far_away);
    let output = Pipeline::new(config())
        .unwrap()
        .run(&source, &[district(30)])
        .unwrap();

    assert_eq!(output.series.len(), 92);
    assert!(output.series.iter().all(|p| p.value.is_none()));
    assert!(output.diagnostics.contains(&Diagnostic::SpatialMismatch));
    assert_eq!(output.composite.band(BIOMASS_BAND).unwrap().valid_count(), 0);
}

#[test]
fn region_filter_must_match_exactly_one_feature() {
    let grid = source_grid(0.0);
    let source = source(&[2023], &[2023], &grid);
    let pipeline = Pipeline::new(config()).unwrap();

    for features in [vec![district(29)], vec![district(30), district(30)]] {
        let err = pipeline.run(&source, &features).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::RegionSelection));
        match err {
            BiomassError::Stage { source, .. } => {
                assert!(matches!(*source, BiomassError::Configuration(_)))
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

#[test]
fn invalid_configuration_fails_before_running() {
    let bad = [
        PipelineConfig {
            coefficient: -1.0,
            ..config()
        },
        PipelineConfig {
            start_year: 2025,
            ..config()
        },
    ];
    for config in bad {
        let err = Pipeline::new(config).unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Configuration));
    }
}

#[test]
fn unknown_collection_aborts_at_acquisition() {
    let grid = source_grid(0.0);
    let source = MemorySource::new().with_collection(GPP_8DAY, gpp_series(&[2023], &grid));
    let err = Pipeline::new(config())
        .unwrap()
        .run(&source, &[district(30)])
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Acquisition));
}
