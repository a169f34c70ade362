use approx::assert_relative_eq;
use chrono::{TimeZone, Utc};
use ndarray::{array, Array2};
use sarchange::core::classify::{SeverityLevel, SeverityScheme, ThresholdSet};
use sarchange::core::speckle_filter::SpeckleFilterParams;
use sarchange::core::{Stage, Window};
use sarchange::io::catalog::SceneProperties;
use sarchange::types::BoundingBox;
use sarchange::{
    AcquisitionMode, AreaOfInterest, ChangePipeline, CoordinateSystem, DateRange, GeoTransform, InMemoryCatalog,
    OrbitPass, PipelineContext, Polarization, Raster, SarError, Scene,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn utm() -> CoordinateSystem {
    CoordinateSystem::Projected { epsg: 32646 }
}

/// 3x3 grid of 10 m pixels
fn grid() -> GeoTransform {
    GeoTransform::north_up(500000.0, 3000030.0, 10.0, 10.0)
}

fn linear(db: Array2<f32>) -> Array2<f32> {
    db.mapv(|v| 10f32.powf(v / 10.0))
}

fn scene(id: &str, month: u32, day: u32, vv_db: Array2<f32>) -> Scene {
    let vh_db = Array2::from_elem(vv_db.dim(), -18.0);
    dual_pol_scene(id, month, day, vv_db, vh_db)
}

fn dual_pol_scene(id: &str, month: u32, day: u32, vv_db: Array2<f32>, vh_db: Array2<f32>) -> Scene {
    let raster = Raster::from_bands(
        vec![("VV".to_string(), linear(vv_db)), ("VH".to_string(), linear(vh_db))],
        grid(),
        utm(),
    )
    .expect("Failed to build scene raster");
    Scene::new(
        id,
        Utc.with_ymd_and_hms(2023, month, day, 11, 58, 0).unwrap(),
        SceneProperties {
            mode: AcquisitionMode::IW,
            polarizations: vec![Polarization::VV, Polarization::VH],
            orbit_pass: OrbitPass::Ascending,
        },
        raster,
    )
}

fn context() -> PipelineContext {
    let aoi = AreaOfInterest::rectangle(BoundingBox::new(500000.0, 3000000.0, 500030.0, 3000030.0), utm())
        .expect("Failed to build AOI");
    let mut ctx = PipelineContext::new(
        aoi,
        DateRange::parse("2023-05-01", "2023-06-01").unwrap(),
        DateRange::parse("2023-07-01", "2023-08-01").unwrap(),
    );
    // Sub-pixel kernel: the speckle filter leaves values untouched
    ctx.speckle = SpeckleFilterParams {
        radius: 5.0,
        ..SpeckleFilterParams::default()
    };
    ctx.flood_thresholds = ThresholdSet::new(vec![-1.0]).unwrap();
    ctx
}

fn flooded_corner() -> Array2<f32> {
    array![[-10.0, -10.0, -10.0], [-10.0, -10.0, -10.0], [-10.0, -10.0, -12.0]]
}

fn catalog() -> InMemoryCatalog {
    vec![
        scene("before-1", 5, 6, Array2::from_elem((3, 3), -10.0)),
        scene("before-2", 5, 18, Array2::from_elem((3, 3), -10.0)),
        scene("after-1", 7, 5, flooded_corner()),
        scene("after-2", 7, 17, flooded_corner()),
        scene("after-3", 7, 29, Array2::from_elem((3, 3), -10.0)),
        // Outside both windows
        scene("june", 6, 10, Array2::from_elem((3, 3), -30.0)),
    ]
    .into_iter()
    .collect()
}

#[test]
fn test_single_flooded_pixel_end_to_end() {
    init_logging();

    let pipeline = ChangePipeline::build(context()).expect("Failed to build pipeline");
    let analysis = pipeline.execute(&catalog()).expect("Change analysis failed");

    let vv_diff = analysis.change.band("VV_diff").unwrap();
    for ((r, c), &v) in vv_diff.indexed_iter() {
        if (r, c) == (2, 2) {
            assert_relative_eq!(v, -2.0, epsilon = 1e-3);
        } else {
            assert_relative_eq!(v, 0.0, epsilon = 1e-4);
        }
    }

    assert_eq!(analysis.flood_masks.len(), 1);
    let mask = &analysis.flood_masks[0].mask;
    assert_eq!(mask.count(), 1);
    assert!(mask.values()[[2, 2]]);

    let report = &analysis.report;
    assert_eq!(report.before_scenes, 2);
    assert_eq!(report.after_scenes, 3);
    assert_relative_eq!(report.flood_area_km2(-1.0).unwrap(), 100.0e-6, max_relative = 1e-9);
    assert_eq!(report.flood_areas[0].pixels, 1);
    assert_eq!(report.vegetation_area_km2(SeverityLevel::Light), Some(0.0));
    assert_eq!(report.vegetation_area_km2(SeverityLevel::Unaffected), None);
    assert_eq!(report.vegetation_loss_threshold_db, -1.0);
    assert_eq!(report.vegetation_loss_km2, 0.0);
    assert_eq!(analysis.vegetation_loss.mask.count(), 0);
    assert_eq!(report.change_statistics["VV_diff"].count, 9);
    assert!(analysis.change.has_band("VH_VV_ratio_change"));

    let json = report.to_json().expect("Failed to serialize report");
    assert!(json.contains("flood_areas"));
}

#[test]
fn test_vegetation_loss_area() {
    init_logging();

    let flat = || Array2::from_elem((3, 3), -10.0);
    let before_vh = || Array2::from_elem((3, 3), -18.0);
    let after_vh = || array![[-18.0, -18.5, -18.0], [-18.0, -19.5, -18.0], [-21.0, -18.0, -18.0]];
    let catalog: InMemoryCatalog = vec![
        dual_pol_scene("before-1", 5, 6, flat(), before_vh()),
        dual_pol_scene("before-2", 5, 18, flat(), before_vh()),
        dual_pol_scene("after-1", 7, 5, flat(), after_vh()),
        dual_pol_scene("after-2", 7, 17, flat(), after_vh()),
    ]
    .into_iter()
    .collect();

    let analysis = ChangePipeline::build(context()).unwrap().execute(&catalog).unwrap();
    let loss = &analysis.vegetation_loss.mask;
    assert_eq!(loss.count(), 2);
    assert!(loss.values()[[1, 1]]);
    assert!(loss.values()[[2, 0]]);
    // -0.5 dB is above the default cutoff
    assert!(!loss.values()[[0, 1]]);
    assert_relative_eq!(analysis.report.vegetation_loss_km2, 200.0e-6, max_relative = 1e-9);

    let mut strict = context();
    strict.vegetation_loss_threshold = -2.0;
    let report = ChangePipeline::build(strict).unwrap().execute(&catalog).unwrap().report;
    assert_eq!(report.vegetation_loss_threshold_db, -2.0);
    assert_relative_eq!(report.vegetation_loss_km2, 100.0e-6, max_relative = 1e-9);
}

#[test]
fn test_empty_after_window_names_the_stage() {
    init_logging();

    let catalog: InMemoryCatalog = vec![scene("before-1", 5, 6, Array2::from_elem((3, 3), -10.0))]
        .into_iter()
        .collect();
    let err = ChangePipeline::build(context())
        .unwrap()
        .execute(&catalog)
        .expect_err("an empty window must abort the run");

    assert_eq!(err.failed_stage(), Some(Stage::FetchScenes(Window::After)));
    assert!(matches!(err.root_cause(), SarError::EmptyCollection { .. }));
    assert!(err.to_string().contains("fetch(after)"));
}

#[test]
fn test_wrong_pass_is_filtered_out() {
    let mut ctx = context();
    ctx.filter.orbit_pass = OrbitPass::Descending;
    let err = ChangePipeline::build(ctx).unwrap().execute(&catalog()).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::FetchScenes(Window::Before)));
}

#[test]
fn test_increasing_thresholds_rejected() {
    assert!(matches!(
        ThresholdSet::new(vec![-2.0, -1.0]),
        Err(SarError::InvalidThresholdOrder(_))
    ));
    assert!(matches!(
        SeverityScheme::from_upper_bounds(&[(SeverityLevel::Light, -2.0), (SeverityLevel::Moderate, -1.0)]),
        Err(SarError::InvalidThresholdOrder(_))
    ));
}

#[test]
fn test_pixel_budget_aborts_aggregation() {
    let mut ctx = context();
    ctx.max_pixels = 4;
    let err = ChangePipeline::build(ctx).unwrap().execute(&catalog()).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Aggregate));
    assert!(matches!(
        err.root_cause(),
        SarError::PixelBudgetExceeded { required: 9, max_pixels: 4 }
    ));
}

#[test]
fn test_grid_mismatch_between_windows() {
    let mut catalog = catalog();
    let shifted = Raster::from_bands(
        vec![
            ("VV".to_string(), Array2::from_elem((3, 3), 0.1)),
            ("VH".to_string(), Array2::from_elem((3, 3), 0.01)),
        ],
        GeoTransform::north_up(500010.0, 3000030.0, 10.0, 10.0),
        utm(),
    )
    .unwrap();
    catalog.insert(Scene::new(
        "shifted",
        Utc.with_ymd_and_hms(2023, 7, 20, 0, 0, 0).unwrap(),
        SceneProperties {
            mode: AcquisitionMode::IW,
            polarizations: vec![Polarization::VV, Polarization::VH],
            orbit_pass: OrbitPass::Ascending,
        },
        shifted,
    ));
    let err = ChangePipeline::build(context()).unwrap().execute(&catalog).unwrap_err();
    assert_eq!(err.failed_stage(), Some(Stage::Composite(Window::After)));
    assert!(matches!(err.root_cause(), SarError::GridMismatch(_)));
}
