//! Region and time-series extraction
//!
//! Both operations take the view state as an explicit argument and trigger
//! eager reads of only the pixels they need.

use crate::context::ExecutionContext;
use crate::core::cube::LazyCube;
use crate::core::viewer::ViewState;
use crate::io::raster;
use crate::types::{BoundingBox, CubeError, CubeResult, RasterWindow};
use chrono::NaiveDate;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Prefix of extracted window files
pub const SUBSET_PREFIX: &str = "subset-";

/// Write the visible window of the viewed acquisition to a new GeoTIFF
///
/// The source raster is re-read at full resolution; only the window is
/// fetched. The output is `<out_dir>/subset-<source basename>` and keeps the
/// source CRS with the transform moved to the window origin.
pub fn extract_window<P: AsRef<Path>>(cube: &LazyCube, view: &ViewState, out_dir: P) -> CubeResult<PathBuf> {
    let layer = cube.acquisition(view.acquisition)?;
    let window = cube.grid().window_for_bounds(&view.bounds)?;
    let path = extract_layer_window(cube, view.acquisition, &window, out_dir.as_ref())?;
    log::info!(
        "Extracted {}x{} window of {} to {}",
        window.width,
        window.height,
        layer.source,
        path.display()
    );
    Ok(path)
}

/// Write a pixel window of one acquisition to a new GeoTIFF
pub fn extract_layer_window(
    cube: &LazyCube,
    acquisition: usize,
    window: &RasterWindow,
    out_dir: &Path,
) -> CubeResult<PathBuf> {
    let layer = cube.acquisition(acquisition)?;
    let grid = cube.grid();
    if window.is_empty() || !grid.full_window().contains(window) {
        return Err(CubeError::OutOfBounds(format!(
            "Window {:?} is outside the {}x{} grid",
            window, grid.width, grid.height
        )));
    }

    let data = cube.read_layer_window(layer, window)?;
    let output_path = out_dir.join(subset_name(&layer.source));
    std::fs::create_dir_all(out_dir)?;

    let transform = grid.transform.shifted(window.row_off, window.col_off);
    raster::write_geotiff(&data, &transform, &grid.crs_wkt, &output_path)?;
    Ok(output_path)
}

/// `subset-<basename>` for a local path or URL
pub fn subset_name(source: &str) -> String {
    let basename = source.rsplit('/').next().unwrap_or(source);
    format!("{}{}", SUBSET_PREFIX, basename)
}

/// One sample of a time series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date1: NaiveDate,
    pub date2: NaiveDate,
    pub value: f32,
}

/// Values of one location (or window) across all acquisitions, in catalog order
#[derive(Debug, Clone, Serialize)]
pub struct TimeSeries {
    /// Selected grid cell (row, col); the window origin for window means
    pub row: usize,
    pub col: usize,
    /// Coordinate of the selected cell centre (or window centre)
    pub x: f64,
    pub y: f64,
    pub points: Vec<SeriesPoint>,
}

impl TimeSeries {
    /// Nearest-neighbour time series at (x, y)
    ///
    /// The closest grid cell is selected along both axes; values are never
    /// interpolated. Masked pixels appear as NaN.
    pub fn at_point(cube: &LazyCube, x: f64, y: f64, ctx: &ExecutionContext) -> CubeResult<Self> {
        let point_cube = cube.sel_nearest(x, y)?;
        let window = point_cube.window();
        let (cx, cy) = cube.grid().transform.pixel_center(window.row_off, window.col_off);
        log::info!(
            "Extracting time series at ({}, {}) -> cell ({}, {}) centred at ({}, {})",
            x,
            y,
            window.row_off,
            window.col_off,
            cx,
            cy
        );

        let realised = point_cube.compute(ctx)?;
        let values = realised.pixel_series(0, 0)?;
        Ok(Self::from_values(&point_cube, window.row_off, window.col_off, (cx, cy), values))
    }

    /// NaN-ignoring mean over a bounding box for every acquisition
    pub fn window_mean(cube: &LazyCube, bounds: &BoundingBox, ctx: &ExecutionContext) -> CubeResult<Self> {
        let window_cube = cube.sel_bounds(bounds)?;
        let window = window_cube.window();
        log::info!("Extracting window-mean time series over {:?}", window);

        let realised = window_cube.compute(ctx)?;
        let values = realised.slice_means();
        let center = window_cube.bounds().center();
        Ok(Self::from_values(&window_cube, window.row_off, window.col_off, center, values))
    }

    fn from_values(cube: &LazyCube, row: usize, col: usize, (x, y): (f64, f64), values: Vec<f32>) -> Self {
        let points = cube
            .acquisitions()
            .zip(values)
            .map(|(acquisition, value)| SeriesPoint {
                date1: acquisition.date1,
                date2: acquisition.date2,
                value,
            })
            .collect();
        Self { row, col, x, y, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self) -> Vec<f32> {
        self.points.iter().map(|p| p.value).collect()
    }

    /// Write `date,value` rows without a header; the date is the first
    /// acquisition date of each interferogram
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> CubeResult<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path.as_ref())?;
        for point in &self.points {
            writer.write_record(&[point.date1.format("%Y-%m-%d").to_string(), point.value.to_string()])?;
        }
        writer.flush()?;
        log::info!("Wrote {} samples to {}", self.points.len(), path.as_ref().display());
        Ok(())
    }
}
