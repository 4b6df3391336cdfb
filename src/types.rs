use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Real-valued interferometric phase (radians, unwrapped)
pub type PhaseValue = f32;

/// 2D phase array (row x column)
pub type PhaseImage = Array2<PhaseValue>;

/// 3D phase stack (acquisition x row x column)
pub type PhaseStack = Array3<PhaseValue>;

/// Tolerance used when comparing geotransform coefficients and snapping
/// coordinates onto pixel edges
const GRID_EPSILON: f64 = 1e-6;

/// Projected bounding box in the raster's coordinate reference system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, max_x, min_y, max_y }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Whether `other` lies entirely inside this box
    pub fn covers(&self, other: &BoundingBox) -> bool {
        other.min_x >= self.min_x - GRID_EPSILON
            && other.max_x <= self.max_x + GRID_EPSILON
            && other.min_y >= self.min_y - GRID_EPSILON
            && other.max_y <= self.max_y + GRID_EPSILON
    }
}

/// Geospatial transformation parameters (GDAL affine geotransform)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0
    }

    /// Coordinate of a (fractional) pixel position
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Centre coordinate of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Transform whose origin is moved to pixel (row_off, col_off)
    pub fn shifted(&self, row_off: usize, col_off: usize) -> Self {
        let (x, y) = self.apply(col_off as f64, row_off as f64);
        Self {
            top_left_x: x,
            top_left_y: y,
            ..*self
        }
    }

    /// Fractional (col, row) of a coordinate; requires a north-up transform
    pub fn invert(&self, x: f64, y: f64) -> CubeResult<(f64, f64)> {
        if !self.is_north_up() {
            return Err(CubeError::InvalidFormat(
                "Rotated geotransforms are not supported".to_string(),
            ));
        }
        if self.pixel_width == 0.0 || self.pixel_height == 0.0 {
            return Err(CubeError::InvalidFormat(
                "Geotransform has a zero pixel size".to_string(),
            ));
        }
        Ok((
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        ))
    }

    fn approx_eq(&self, other: &GeoTransform) -> bool {
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= GRID_EPSILON * a.abs().max(b.abs()).max(1.0))
    }
}

/// Pixel window into a raster grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RasterWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl RasterWindow {
    pub fn new(col_off: usize, row_off: usize, width: usize, height: usize) -> Self {
        Self { col_off, row_off, width, height }
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.height
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.width
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `other` lies entirely inside this window
    pub fn contains(&self, other: &RasterWindow) -> bool {
        other.col_off >= self.col_off
            && other.row_off >= self.row_off
            && other.col_end() <= self.col_end()
            && other.row_end() <= self.row_end()
    }
}

/// Spatial grid shared by every layer of an analysis-ready stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
    /// Coordinate reference system as WKT
    pub crs_wkt: String,
}

impl GridSpec {
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn full_window(&self) -> RasterWindow {
        RasterWindow::new(0, 0, self.width, self.height)
    }

    /// Extent of the grid in CRS units
    pub fn bounds(&self) -> BoundingBox {
        self.window_bounds(&self.full_window())
    }

    pub fn window_bounds(&self, window: &RasterWindow) -> BoundingBox {
        let (x0, y0) = self.transform.apply(window.col_off as f64, window.row_off as f64);
        let (x1, y1) = self.transform.apply(window.col_end() as f64, window.row_end() as f64);
        BoundingBox::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Nearest grid cell (row, col) to a coordinate
    ///
    /// Points outside the grid extent are rejected rather than clamped.
    pub fn nearest_cell(&self, x: f64, y: f64) -> CubeResult<(usize, usize)> {
        let (col, row) = self.transform.invert(x, y)?;
        if !col.is_finite() || !row.is_finite() {
            return Err(CubeError::OutOfBounds(format!("Point ({}, {}) is not finite", x, y)));
        }
        let col_idx = col.floor();
        let row_idx = row.floor();
        // A point exactly on the far edge belongs to the last cell
        let col_idx = if col_idx as usize == self.width && (col - col_idx).abs() < GRID_EPSILON { col_idx - 1.0 } else { col_idx };
        let row_idx = if row_idx as usize == self.height && (row - row_idx).abs() < GRID_EPSILON { row_idx - 1.0 } else { row_idx };

        if col_idx < 0.0 || row_idx < 0.0 || col_idx >= self.width as f64 || row_idx >= self.height as f64 {
            return Err(CubeError::OutOfBounds(format!(
                "Point ({}, {}) is outside the grid extent {:?}",
                x,
                y,
                self.bounds()
            )));
        }
        Ok((row_idx as usize, col_idx as usize))
    }

    /// Pixel window covering a bounding box
    ///
    /// Edges are snapped outwards to whole pixels. Boxes reaching past the
    /// grid extent fail instead of being truncated.
    pub fn window_for_bounds(&self, bounds: &BoundingBox) -> CubeResult<RasterWindow> {
        if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
            return Err(CubeError::OutOfBounds(format!("Empty bounding box {:?}", bounds)));
        }
        if !self.bounds().covers(bounds) {
            return Err(CubeError::OutOfBounds(format!(
                "Bounding box {:?} is outside the grid extent {:?}",
                bounds,
                self.bounds()
            )));
        }

        let (c0, r0) = self.transform.invert(bounds.min_x, bounds.max_y)?;
        let (c1, r1) = self.transform.invert(bounds.max_x, bounds.min_y)?;
        let (col_start, col_stop) = snap_range(c0.min(c1), c0.max(c1), self.width);
        let (row_start, row_stop) = snap_range(r0.min(r1), r0.max(r1), self.height);
        // A sliver narrower than the snapping tolerance covers no pixel
        if col_stop <= col_start || row_stop <= row_start {
            return Err(CubeError::OutOfBounds(format!(
                "Bounding box {:?} covers no whole pixel",
                bounds
            )));
        }

        Ok(RasterWindow::new(
            col_start,
            row_start,
            col_stop - col_start,
            row_stop - row_start,
        ))
    }

    /// Compare the compact grid description of another image against this one
    ///
    /// Returns a human readable reason on mismatch.
    pub fn mismatch(&self, other: &GridSpec) -> Option<String> {
        if self.shape() != other.shape() {
            return Some(format!(
                "size {}x{} differs from {}x{}",
                other.width, other.height, self.width, self.height
            ));
        }
        if !self.transform.approx_eq(&other.transform) {
            return Some(format!(
                "geotransform {:?} differs from {:?}",
                other.transform.to_gdal(),
                self.transform.to_gdal()
            ));
        }
        None
    }
}

/// Snap a fractional pixel range outwards onto whole pixels within [0, limit]
fn snap_range(start: f64, stop: f64, limit: usize) -> (usize, usize) {
    let start = if (start - start.round()).abs() < GRID_EPSILON { start.round() } else { start.floor() };
    let stop = if (stop - stop.round()).abs() < GRID_EPSILON { stop.round() } else { stop.ceil() };
    let start = start.max(0.0) as usize;
    let stop = (stop.max(0.0) as usize).min(limit);
    (start.min(stop), stop)
}

/// One acquisition (interferogram) of a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acquisition {
    /// Position in the catalog
    pub index: usize,
    pub date1: NaiveDate,
    pub date2: NaiveDate,
    /// Path handed to GDAL (local path or /vsicurl/ URL)
    pub source: String,
}

/// Error types for stack processing
#[derive(Debug, thiserror::Error)]
pub enum CubeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Cannot parse object key '{key}': {reason}")]
    FilenameParse { key: String, reason: String },

    #[error("Grid mismatch for acquisition {index} ({path}): {reason}")]
    GridMismatch {
        index: usize,
        path: String,
        reason: String,
    },

    #[error("Coordinate reference system error: {0}")]
    Crs(String),

    #[error("Out of bounds: {0}")]
    OutOfBounds(String),

    #[error("Catalog is empty")]
    EmptyCatalog,

    #[error("Object store error: {0}")]
    Storage(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for stack operations
pub type CubeResult<T> = Result<T, CubeError>;
