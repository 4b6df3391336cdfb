//! Interactive viewer state over a lazy cube
//!
//! Views are immutable values: every interaction returns a new
//! [`ViewState`], which callers pass on to the extractor.

use crate::context::ExecutionContext;
use crate::core::cube::LazyCube;
use crate::types::{BoundingBox, CubeError, CubeResult, GridSpec, PhaseImage, RasterWindow};
use crate::core::mask::apply_mask;
use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Screen size of the rendering surface in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: usize,
    pub height: usize,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

/// Currently displayed acquisition and visible extent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub acquisition: usize,
    pub bounds: BoundingBox,
}

/// One rendered slice at screen resolution
#[derive(Debug, Clone)]
pub struct Frame {
    pub image: PhaseImage,
    pub acquisition: usize,
    pub date1: NaiveDate,
    pub date2: NaiveDate,
    /// Extent actually covered, snapped to whole source pixels
    pub bounds: BoundingBox,
    /// Source pixels per screen pixel (>= 1)
    pub decimation: f64,
    /// Finite value range, for colour limits
    pub value_range: Option<(f32, f32)>,
}

pub struct Viewer<'a> {
    cube: &'a LazyCube,
    viewport: Viewport,
}

impl<'a> Viewer<'a> {
    pub fn new(cube: &'a LazyCube, viewport: Viewport) -> CubeResult<Self> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(CubeError::Config(format!("Empty viewport {:?}", viewport)));
        }
        if cube.is_empty() {
            return Err(CubeError::EmptyCatalog);
        }
        Ok(Self { cube, viewport })
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// First acquisition, whole selected extent
    pub fn initial_view(&self) -> ViewState {
        ViewState {
            acquisition: 0,
            bounds: self.cube.bounds(),
        }
    }

    /// Show another acquisition over the same extent
    pub fn select(&self, view: &ViewState, acquisition: usize) -> CubeResult<ViewState> {
        self.cube.acquisition(acquisition)?;
        Ok(ViewState {
            acquisition,
            ..*view
        })
    }

    /// Zoom by `factor` (> 1 zooms in) around `center`, or the view centre
    pub fn zoom(&self, view: &ViewState, factor: f64, center: Option<(f64, f64)>) -> CubeResult<ViewState> {
        if !(factor.is_finite() && factor > 0.0) {
            return Err(CubeError::Processing(format!("Invalid zoom factor {}", factor)));
        }
        let (cx, cy) = center.unwrap_or_else(|| view.bounds.center());
        let half_w = view.bounds.width() / factor / 2.0;
        let half_h = view.bounds.height() / factor / 2.0;
        let bounds = BoundingBox::new(cx - half_w, cy - half_h, cx + half_w, cy + half_h);
        Ok(ViewState {
            acquisition: view.acquisition,
            bounds: clamp_bounds(&bounds, &self.cube.bounds(), self.cube.grid()),
        })
    }

    /// Move the view by (dx, dy) in CRS units
    pub fn pan(&self, view: &ViewState, dx: f64, dy: f64) -> ViewState {
        let bounds = BoundingBox::new(
            view.bounds.min_x + dx,
            view.bounds.min_y + dy,
            view.bounds.max_x + dx,
            view.bounds.max_y + dy,
        );
        ViewState {
            acquisition: view.acquisition,
            bounds: clamp_bounds(&bounds, &self.cube.bounds(), self.cube.grid()),
        }
    }

    /// Output size for a source window: fit the viewport, keep the aspect
    /// ratio, never upsample
    fn screen_size(&self, window: &RasterWindow) -> (usize, usize, f64) {
        let scale_x = window.width as f64 / self.viewport.width as f64;
        let scale_y = window.height as f64 / self.viewport.height as f64;
        let decimation = scale_x.max(scale_y).max(1.0);
        let width = ((window.width as f64 / decimation).round() as usize).clamp(1, window.width);
        let height = ((window.height as f64 / decimation).round() as usize).clamp(1, window.height);
        (width, height, decimation)
    }

    /// Read the visible part of the selected acquisition at screen resolution
    pub fn render(&self, view: &ViewState, ctx: &ExecutionContext) -> CubeResult<Frame> {
        let layer = self.cube.acquisition(view.acquisition)?;
        let window = self.cube.grid().window_for_bounds(&view.bounds)?;
        if !self.cube.window().contains(&window) {
            return Err(CubeError::OutOfBounds(format!(
                "View {:?} is outside the selected extent {:?}",
                view.bounds,
                self.cube.bounds()
            )));
        }
        let (out_width, out_height, decimation) = self.screen_size(&window);
        log::debug!(
            "Rendering acquisition {} window {:?} at {}x{} (decimation {:.2})",
            view.acquisition,
            window,
            out_width,
            out_height,
            decimation
        );

        let grid = self.cube.grid();
        let mut image = ctx.install(|| {
            self.cube
                .read_layer_resampled(layer, &window, Some((out_width, out_height)))
        })?;

        if let Some(mask) = self.cube.mask() {
            let sampled = sample_mask(mask, &window, out_width, out_height);
            apply_mask(image.view_mut(), sampled.view())?;
        }

        let value_range = image
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |range: Option<(f32, f32)>, &v| match range {
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
                None => Some((v, v)),
            });

        Ok(Frame {
            image,
            acquisition: view.acquisition,
            date1: layer.date1,
            date2: layer.date2,
            bounds: grid.window_bounds(&window),
            decimation,
            value_range,
        })
    }
}

/// Keep `bounds` inside `extent`, shrinking it only when it is larger than
/// the extent, and never smaller than one pixel
fn clamp_bounds(bounds: &BoundingBox, extent: &BoundingBox, grid: &GridSpec) -> BoundingBox {
    let min_w = grid.transform.pixel_width.abs();
    let min_h = grid.transform.pixel_height.abs();
    let width = bounds.width().clamp(min_w.min(extent.width()), extent.width());
    let height = bounds.height().clamp(min_h.min(extent.height()), extent.height());
    let (cx, cy) = bounds.center();

    let min_x = (cx - width / 2.0).min(extent.max_x - width).max(extent.min_x);
    let min_y = (cy - height / 2.0).min(extent.max_y - height).max(extent.min_y);
    BoundingBox::new(min_x, min_y, min_x + width, min_y + height)
}

/// Nearest-neighbour sample of a full-grid mask onto an output raster
fn sample_mask(mask: &Array2<bool>, window: &RasterWindow, out_width: usize, out_height: usize) -> Array2<bool> {
    let step_x = window.width as f64 / out_width as f64;
    let step_y = window.height as f64 / out_height as f64;
    Array2::from_shape_fn((out_height, out_width), |(row, col)| {
        let src_row = window.row_off + (((row as f64 + 0.5) * step_y) as usize).min(window.height - 1);
        let src_col = window.col_off + (((col as f64 + 0.5) * step_x) as usize).min(window.width - 1);
        mask[[src_row, src_col]]
    })
}
