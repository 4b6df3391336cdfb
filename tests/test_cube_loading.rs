mod common;

use common::*;
use sarcube::config::{ChunkSpec, GridCheck, PipelineConfig};
use sarcube::context::ExecutionContext;
use sarcube::core::{Catalog, LazyCube};
use sarcube::io::LocalListing;
use sarcube::types::{CubeError, RasterWindow};
use ndarray::s;

fn local_catalog(root: &std::path::Path) -> (Catalog, PipelineConfig) {
    let config = PipelineConfig::default().with_url_prefix(local_prefix(root));
    let store = LocalListing::new(root);
    let catalog = Catalog::from_store(&store, &format!("{}/{}", PROJECT, BUCKET), &config)
        .expect("Failed to build catalog");
    (catalog, config)
}

#[test]
fn test_catalog_from_local_listing() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt_for_epsg(32633));

    let (catalog, _) = local_catalog(dir.path());
    assert_eq!(catalog.len(), 3);
    for (row, (date1, date2)) in catalog.iter().zip(DATES.iter()) {
        assert_eq!(row.remote_path(), key(date1, date2));
        assert_eq!(row.date_delta(), row.date1() - row.date2());
        assert!(std::path::Path::new(row.url()).exists());
    }
}

#[test]
fn test_stack_shape_and_values() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt_for_epsg(32633));
    let (catalog, config) = local_catalog(dir.path());
    let ctx = ExecutionContext::new(2).unwrap();

    let cube = LazyCube::open(&catalog, &config, &ctx).expect("Failed to open cube");
    assert_eq!(cube.shape(), (3, ROWS, COLS));
    assert_eq!(cube.transform().to_gdal(), UTM_TRANSFORM);

    let realised = cube.compute(&ctx).expect("Failed to compute cube");
    assert_eq!(realised.shape(), (3, ROWS, COLS));
    assert_eq!(realised.missing_count(), 0);
    for index in 0..3 {
        assert_eq!(
            realised.values.slice(s![index, .., ..]),
            layer_values(index, ROWS, COLS)
        );
    }
}

#[test]
fn test_chunking_does_not_change_values() {
    let dir = tempfile::tempdir().unwrap();
    write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt_for_epsg(32633));
    let (catalog, config) = local_catalog(dir.path());
    let ctx = ExecutionContext::new(3).unwrap();

    let whole = LazyCube::open(&catalog, &config, &ctx).unwrap();
    let tiled_config = config.clone().with_chunks(ChunkSpec { band: 2, rows: 3, cols: 4 });
    let tiled = LazyCube::open(&catalog, &tiled_config, &ctx).unwrap();
    assert_eq!(tiled.chunk_plan().len(), 2 * 3 * 3);

    let a = whole.compute(&ctx).unwrap();
    let b = tiled.compute(&ctx).unwrap();
    assert_eq!(a.values, b.values);

    // Sub-window selections read the same pixels as the full realisation
    let window = RasterWindow::new(3, 2, 5, 4);
    let sub = tiled.isel_window(window).unwrap().compute(&ctx).unwrap();
    assert_eq!(sub.values, a.values.slice(s![.., 2..6, 3..8]));
    assert_eq!(sub.transform.top_left_x, UTM_TRANSFORM[0] + 3.0 * 30.0);
}

#[test]
fn test_grid_size_mismatch_fails_construction() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let wkt = wkt_for_epsg(32633);
    let paths = write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt);
    // Replace the second layer with a wider image
    write_raster(&paths[1], &layer_values(1, ROWS, COLS + 1), UTM_TRANSFORM, &wkt);

    let (catalog, config) = local_catalog(dir.path());
    let ctx = ExecutionContext::new(2).unwrap();
    match LazyCube::open(&catalog, &config, &ctx) {
        Err(CubeError::GridMismatch { index, reason, .. }) => {
            assert_eq!(index, 1);
            assert!(reason.contains("size"), "unexpected reason: {}", reason);
        }
        other => panic!("Expected a grid mismatch, got {:?}", other.map(|c| c.shape())),
    }
}

#[test]
fn test_geotransform_mismatch_fails_construction() {
    let dir = tempfile::tempdir().unwrap();
    let wkt = wkt_for_epsg(32633);
    let paths = write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt);
    let mut shifted = UTM_TRANSFORM;
    shifted[0] += 15.0;
    write_raster(&paths[2], &layer_values(2, ROWS, COLS), shifted, &wkt);

    let (catalog, config) = local_catalog(dir.path());
    let ctx = ExecutionContext::new(2).unwrap();
    let result = LazyCube::open(&catalog, &config, &ctx);
    assert!(matches!(result, Err(CubeError::GridMismatch { index: 2, .. })));
}

#[test]
fn test_deferred_grid_check_fails_on_compute() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let wkt = wkt_for_epsg(32633);
    let paths = write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt);
    write_raster(&paths[1], &layer_values(1, ROWS + 2, COLS), UTM_TRANSFORM, &wkt);

    let (catalog, config) = local_catalog(dir.path());
    let config = config.with_grid_check(GridCheck::Deferred);
    let ctx = ExecutionContext::new(2).unwrap();

    let cube = LazyCube::open(&catalog, &config, &ctx).expect("Deferred check opens the first layer only");
    assert_eq!(cube.shape(), (3, ROWS, COLS));

    // Layers that match still realise
    let first = cube.isel_acquisition(0).unwrap().compute(&ctx).unwrap();
    assert_eq!(first.missing_count(), 0);

    match cube.compute(&ctx) {
        Err(CubeError::GridMismatch { index, .. }) => assert_eq!(index, 1),
        other => panic!("Expected a grid mismatch, got {:?}", other.map(|c| c.shape())),
    }
}

#[test]
fn test_deferred_grid_check_catches_shifted_transform() {
    let dir = tempfile::tempdir().unwrap();
    let wkt = wkt_for_epsg(32633);
    let paths = write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt);
    // Same size, half a pixel to the east
    let mut shifted = UTM_TRANSFORM;
    shifted[0] += 15.0;
    write_raster(&paths[1], &layer_values(1, ROWS, COLS), shifted, &wkt);

    let (catalog, config) = local_catalog(dir.path());
    let config = config.with_grid_check(GridCheck::Deferred);
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = LazyCube::open(&catalog, &config, &ctx).expect("Deferred check opens the first layer only");

    match cube.compute(&ctx) {
        Err(CubeError::GridMismatch { index, reason, .. }) => {
            assert_eq!(index, 1);
            assert!(reason.contains("geotransform"), "unexpected reason: {}", reason);
        }
        other => panic!("Expected a grid mismatch, got {:?}", other.map(|c| c.shape())),
    }
}

#[test]
fn test_deferred_grid_check_catches_crs_change() {
    let dir = tempfile::tempdir().unwrap();
    let paths = write_stack(dir.path(), &DATES, UTM_TRANSFORM, &wkt_for_epsg(32633));
    write_raster(&paths[2], &layer_values(2, ROWS, COLS), UTM_TRANSFORM, &wkt_for_epsg(32634));

    let (catalog, config) = local_catalog(dir.path());
    let config = config.with_grid_check(GridCheck::Deferred);
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = LazyCube::open(&catalog, &config, &ctx).unwrap();

    let result = cube.compute(&ctx);
    assert!(matches!(result, Err(CubeError::GridMismatch { index: 2, .. })));
}

#[test]
fn test_empty_catalog_is_rejected() {
    let catalog = Catalog::from_keys(Vec::<String>::new(), "").unwrap();
    let ctx = ExecutionContext::new(1).unwrap();
    let result = LazyCube::open(&catalog, &PipelineConfig::default(), &ctx);
    assert!(matches!(result, Err(CubeError::EmptyCatalog)));
}
