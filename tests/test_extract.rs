mod common;

use approx::assert_relative_eq;
use common::*;
use sarcube::config::PipelineConfig;
use sarcube::context::ExecutionContext;
use sarcube::core::{extract_window, Catalog, LazyCube, TimeSeries, ViewState, Viewer, Viewport};
use sarcube::io::raster::{read_info, read_window, same_crs};
use sarcube::types::{BoundingBox, CubeError, RasterWindow};
use std::path::Path;

fn utm_cube(root: &Path, ctx: &ExecutionContext) -> LazyCube {
    write_stack(root, &DATES, UTM_TRANSFORM, &wkt_for_epsg(32633));
    let keys: Vec<String> = DATES.iter().map(|(d1, d2)| key(d1, d2)).collect();
    let config = PipelineConfig::default().with_url_prefix(local_prefix(root));
    let catalog = Catalog::from_keys(&keys, &config.url_prefix).unwrap();
    LazyCube::open(&catalog, &config, ctx).expect("Failed to open cube")
}

#[test]
fn test_window_round_trip() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = utm_cube(dir.path(), &ctx);
    let out_dir = dir.path().join("subsets");

    let window = RasterWindow::new(2, 1, 4, 3);
    let view = ViewState {
        acquisition: 1,
        bounds: cube.grid().window_bounds(&window),
    };
    let written = extract_window(&cube, &view, &out_dir).expect("Failed to extract window");
    assert_eq!(
        written.file_name().unwrap().to_string_lossy(),
        format!("subset-{}-{}-unw.tif", DATES[1].0, DATES[1].1)
    );

    let source = &cube.acquisition(1).unwrap().source;
    let direct = read_window(source, 1, &window, None, None).unwrap();
    let subset_path = written.to_string_lossy().into_owned();
    let reread = read_window(&subset_path, 1, &RasterWindow::new(0, 0, 4, 3), None, None).unwrap();
    assert_eq!(reread, direct);

    let info = read_info(&subset_path, 1).unwrap();
    assert_eq!((info.grid.width, info.grid.height), (4, 3));
    assert_eq!(info.grid.transform.top_left_x, UTM_TRANSFORM[0] + 2.0 * 30.0);
    assert_eq!(info.grid.transform.top_left_y, UTM_TRANSFORM[3] - 30.0);
    assert!(same_crs(&info.grid.crs_wkt, &cube.grid().crs_wkt).unwrap());
}

#[test]
fn test_viewer_state_feeds_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = utm_cube(dir.path(), &ctx);
    let viewer = Viewer::new(&cube, Viewport::default()).unwrap();

    let view = viewer.initial_view();
    // Centred on a pixel centre so the half-size view falls on pixel edges
    let centre = (UTM_TRANSFORM[0] + 165.0, UTM_TRANSFORM[3] - 120.0);
    let zoomed = viewer.zoom(&view, 2.0, Some(centre)).unwrap();
    let zoomed = viewer.select(&zoomed, 2).unwrap();
    let written = extract_window(&cube, &zoomed, dir.path().join("out")).unwrap();

    let info = read_info(&written.to_string_lossy(), 1).unwrap();
    assert_eq!((info.grid.width, info.grid.height), (COLS / 2, ROWS / 2));
}

#[test]
fn test_extract_out_of_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(1).unwrap();
    let cube = utm_cube(dir.path(), &ctx);
    let extent = cube.bounds();

    let beyond = ViewState {
        acquisition: 0,
        bounds: BoundingBox::new(extent.min_x, extent.min_y, extent.max_x + 30.0, extent.max_y),
    };
    assert!(matches!(
        extract_window(&cube, &beyond, dir.path()),
        Err(CubeError::OutOfBounds(_))
    ));

    let bad_layer = ViewState {
        acquisition: 5,
        bounds: extent,
    };
    assert!(matches!(
        extract_window(&cube, &bad_layer, dir.path()),
        Err(CubeError::OutOfBounds(_))
    ));
}

#[test]
fn test_point_time_series() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = utm_cube(dir.path(), &ctx);

    // Inside cell (row 2, col 7), off-centre
    let x = UTM_TRANSFORM[0] + 7.0 * 30.0 + 4.0;
    let y = UTM_TRANSFORM[3] - 2.0 * 30.0 - 25.0;
    let series = TimeSeries::at_point(&cube, x, y, &ctx).expect("Failed to extract series");

    assert_eq!(series.len(), 3);
    assert_eq!((series.row, series.col), (2, 7));
    assert!((series.x - x).abs() <= 15.0);
    assert!((series.y - y).abs() <= 15.0);
    assert_relative_eq!(series.x, UTM_TRANSFORM[0] + 7.5 * 30.0);

    for (index, point) in series.points.iter().enumerate() {
        assert_eq!(point.date1, cube.acquisition(index).unwrap().date1);
        assert_eq!(point.value, layer_values(index, ROWS, COLS)[[2, 7]]);
    }

    let csv_path = dir.path().join("series.csv");
    series.write_csv(&csv_path).unwrap();
    let content = std::fs::read_to_string(&csv_path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "2020-01-01,27");
    assert_eq!(lines[2], "2020-01-25,2027");
}

#[test]
fn test_point_outside_grid_fails() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(1).unwrap();
    let cube = utm_cube(dir.path(), &ctx);
    let result = TimeSeries::at_point(&cube, UTM_TRANSFORM[0] - 1.0, UTM_TRANSFORM[3] - 10.0, &ctx);
    assert!(matches!(result, Err(CubeError::OutOfBounds(_))));
}

#[test]
fn test_window_mean_series() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = ExecutionContext::new(2).unwrap();
    let cube = utm_cube(dir.path(), &ctx);

    let bounds = cube.grid().window_bounds(&RasterWindow::new(0, 0, 2, 2));
    let series = TimeSeries::window_mean(&cube, &bounds, &ctx).unwrap();
    // Mean of values r * 10 + c over the top-left 2x2 cells
    let expected: Vec<f32> = (0..3).map(|i| (i * 1000) as f32 + 5.5).collect();
    assert_eq!(series.values(), expected);
}
