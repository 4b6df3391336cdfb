#![allow(dead_code)]

use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use ndarray::Array2;
use std::path::{Path, PathBuf};

pub const PROJECT: &str = "insar";
pub const BUCKET: &str = "track64";

/// 30 m UTM grid, 10 columns x 8 rows, origin (500000, 4000240)
pub const UTM_TRANSFORM: [f64; 6] = [500_000.0, 30.0, 0.0, 4_000_240.0, 0.0, -30.0];
pub const ROWS: usize = 8;
pub const COLS: usize = 10;

pub const DATES: [(&str, &str); 3] = [
    ("20200101", "20200113"),
    ("20200113", "20200125"),
    ("20200125", "20200206"),
];

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn wkt_for_epsg(code: u32) -> String {
    SpatialRef::from_epsg(code)
        .and_then(|srs| srs.to_wkt())
        .expect("EPSG definition available")
}

/// Distinct, predictable values per layer
pub fn layer_values(index: usize, rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(r, c)| (index * 1000 + r * cols + c) as f32)
}

pub fn write_raster(path: &Path, data: &Array2<f32>, transform: [f64; 6], wkt: &str) {
    let (rows, cols) = data.dim();
    let driver = DriverManager::get_driver_by_name("GTiff").expect("GTiff driver");
    let mut dataset = driver
        .create_with_band_type::<f32, _>(path, cols as isize, rows as isize, 1)
        .expect("Failed to create fixture raster");
    dataset.set_geo_transform(&transform).expect("Failed to set geotransform");
    dataset
        .set_spatial_ref(&SpatialRef::from_wkt(wkt).expect("valid WKT"))
        .expect("Failed to set CRS");

    let mut band = dataset.rasterband(1).expect("band 1");
    let buffer = Buffer::new((cols, rows), data.iter().cloned().collect());
    band.write((0, 0), (cols, rows), &buffer).expect("Failed to write fixture raster");
}

/// Key of a fixture interferogram
pub fn key(date1: &str, date2: &str) -> String {
    format!("{}/{}/{}-{}-unw.tif", PROJECT, BUCKET, date1, date2)
}

/// Write one layer per date pair under `root`, keyed like the object store;
/// returns the file paths in key order
pub fn write_stack(root: &Path, dates: &[(&str, &str)], transform: [f64; 6], wkt: &str) -> Vec<PathBuf> {
    let dir = root.join(PROJECT).join(BUCKET);
    std::fs::create_dir_all(&dir).expect("Failed to create fixture directory");
    dates
        .iter()
        .enumerate()
        .map(|(index, (date1, date2))| {
            let path = root.join(key(date1, date2));
            write_raster(&path, &layer_values(index, ROWS, COLS), transform, wkt);
            path
        })
        .collect()
}

/// URL prefix turning fixture keys into local paths
pub fn local_prefix(root: &Path) -> String {
    format!("{}/", root.display())
}
