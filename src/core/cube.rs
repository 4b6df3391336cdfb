//! Lazy, chunked interferogram stack
//!
//! Building a [`LazyCube`] only reads raster metadata. Selections and mask
//! attachment return new cubes that share the layer list. Pixel data is read
//! chunk by chunk when [`LazyCube::compute`] is called.

use crate::config::{ChunkSpec, GridCheck, PipelineConfig};
use crate::context::ExecutionContext;
use crate::core::catalog::Catalog;
use crate::core::mask::{apply_mask, MaskLayer};
use crate::io::raster::{self, gdal_path};
use crate::types::{
    Acquisition, BoundingBox, CubeError, CubeResult, GeoTransform, GridSpec, PhaseImage, PhaseStack,
    RasterWindow,
};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use std::ops::Range;
use std::sync::Arc;

/// One unit of work of a realisation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkTask {
    /// Positions in the cube's acquisition selection
    pub acquisitions: Range<usize>,
    /// Window in full-grid pixel coordinates
    pub window: RasterWindow,
}

/// Lazy 3-D dataset indexed by (acquisition, row, column)
#[derive(Debug, Clone)]
pub struct LazyCube {
    layers: Arc<[Acquisition]>,
    grid: GridSpec,
    chunks: ChunkSpec,
    band: usize,
    /// Selected layer indices, in catalog order
    selection: Vec<usize>,
    /// Selected window in full-grid coordinates
    window: RasterWindow,
    /// Full-grid mask, true outside the region of interest
    mask: Option<Arc<Array2<bool>>>,
}

impl LazyCube {
    /// Open every catalog row lazily and stack them along a new acquisition axis
    pub fn open(catalog: &Catalog, config: &PipelineConfig, ctx: &ExecutionContext) -> CubeResult<Self> {
        config.validate()?;
        if catalog.is_empty() {
            return Err(CubeError::EmptyCatalog);
        }

        let layers: Vec<Acquisition> = catalog
            .iter()
            .enumerate()
            .map(|(index, row)| Acquisition {
                index,
                date1: row.date1(),
                date2: row.date2(),
                source: gdal_path(row.url()),
            })
            .collect();

        log::info!("Opening {} interferograms lazily", layers.len());
        let reference = raster::read_info(&layers[0].source, config.band)?;
        log::debug!(
            "Reference grid {}x{}, native blocks {:?}",
            reference.grid.width,
            reference.grid.height,
            reference.block_size
        );

        match config.grid_check {
            GridCheck::Metadata => Self::verify_grids(&layers, &reference.grid, config.band, ctx)?,
            GridCheck::Deferred => log::warn!(
                "Grid check deferred: {} layers will be size-checked when their chunks are read",
                layers.len() - 1
            ),
        }

        let cube = Self::from_parts(layers, reference.grid, config.chunks, config.band);
        let (n, rows, cols) = cube.shape();
        log::info!("Lazy cube shape: {} acquisitions x {} rows x {} cols", n, rows, cols);
        Ok(cube)
    }

    /// Assemble a cube from already-described layers sharing `grid`
    pub fn from_parts(layers: Vec<Acquisition>, grid: GridSpec, chunks: ChunkSpec, band: usize) -> Self {
        let selection = (0..layers.len()).collect();
        let window = grid.full_window();
        Self {
            layers: layers.into(),
            grid,
            chunks,
            band,
            selection,
            window,
            mask: None,
        }
    }

    /// Compare the compact grid description of every layer after the first
    fn verify_grids(
        layers: &[Acquisition],
        reference: &GridSpec,
        band: usize,
        ctx: &ExecutionContext,
    ) -> CubeResult<()> {
        ctx.try_map(&layers[1..], |layer| {
            let info = raster::read_info(&layer.source, band)?;
            match raster::grid_mismatch(reference, &info.grid)? {
                Some(reason) => Err(CubeError::GridMismatch {
                    index: layer.index,
                    path: layer.source.clone(),
                    reason,
                }),
                None => Ok(()),
            }
        })?;
        log::debug!("All {} layer grids match the reference", layers.len());
        Ok(())
    }

    /// (acquisitions, rows, cols) of the current selection
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.selection.len(), self.window.height, self.window.width)
    }

    pub fn len(&self) -> usize {
        self.selection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    /// Grid of the underlying images
    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    /// Selected window in full-grid coordinates
    pub fn window(&self) -> RasterWindow {
        self.window
    }

    /// Geotransform of the selected window
    pub fn transform(&self) -> GeoTransform {
        self.grid.transform.shifted(self.window.row_off, self.window.col_off)
    }

    pub fn bounds(&self) -> BoundingBox {
        self.grid.window_bounds(&self.window)
    }

    pub fn chunks(&self) -> ChunkSpec {
        self.chunks
    }

    pub fn band(&self) -> usize {
        self.band
    }

    /// Selected acquisitions, in catalog order
    pub fn acquisitions(&self) -> impl Iterator<Item = &Acquisition> + '_ {
        self.selection.iter().map(move |&i| &self.layers[i])
    }

    /// Acquisition at a position of the selection
    pub fn acquisition(&self, position: usize) -> CubeResult<&Acquisition> {
        self.selection
            .get(position)
            .map(|&i| &self.layers[i])
            .ok_or_else(|| {
                CubeError::OutOfBounds(format!(
                    "Acquisition {} requested, cube has {}",
                    position,
                    self.selection.len()
                ))
            })
    }

    /// Attached mask over the full grid
    pub fn mask(&self) -> Option<&Array2<bool>> {
        self.mask.as_deref()
    }

    /// Attached mask restricted to the selected window
    pub fn window_mask(&self) -> Option<ArrayView2<'_, bool>> {
        self.mask.as_deref().map(|mask| mask.slice(window_slice(&self.window)))
    }

    /// Keep the given positions of the current acquisition selection
    pub fn select_acquisitions(&self, positions: &[usize]) -> CubeResult<Self> {
        let selection = positions
            .iter()
            .map(|&p| self.acquisition(p).map(|a| a.index))
            .collect::<CubeResult<Vec<_>>>()?;
        Ok(Self {
            selection,
            ..self.clone()
        })
    }

    pub fn isel_acquisition(&self, position: usize) -> CubeResult<Self> {
        self.select_acquisitions(&[position])
    }

    /// Restrict to a window given in full-grid pixel coordinates
    ///
    /// The window must lie inside the current selection.
    pub fn isel_window(&self, window: RasterWindow) -> CubeResult<Self> {
        if window.is_empty() || !self.window.contains(&window) {
            return Err(CubeError::OutOfBounds(format!(
                "Window {:?} is not inside the selected window {:?}",
                window, self.window
            )));
        }
        Ok(Self {
            window,
            ..self.clone()
        })
    }

    /// Restrict to the pixels covering a bounding box
    pub fn sel_bounds(&self, bounds: &BoundingBox) -> CubeResult<Self> {
        let window = self.grid.window_for_bounds(bounds)?;
        self.isel_window(window)
    }

    /// Restrict to a single full-grid pixel
    pub fn isel_point(&self, row: usize, col: usize) -> CubeResult<Self> {
        self.isel_window(RasterWindow::new(col, row, 1, 1))
    }

    /// Restrict to the single grid cell nearest to (x, y)
    pub fn sel_nearest(&self, x: f64, y: f64) -> CubeResult<Self> {
        let (row, col) = self.grid.nearest_cell(x, y)?;
        self.isel_point(row, col)
    }

    /// Attach a mask layer
    ///
    /// An existing mask is combined with logical OR, so attaching the same
    /// mask twice leaves the cube unchanged.
    pub fn with_mask(&self, mask: &MaskLayer) -> CubeResult<Self> {
        if mask.shape() != self.grid.shape() {
            return Err(CubeError::GridMismatch {
                index: 0,
                path: "mask".to_string(),
                reason: format!(
                    "mask shape {:?} differs from grid shape {:?}",
                    mask.shape(),
                    self.grid.shape()
                ),
            });
        }
        if let Some(reason) = self.grid.mismatch(mask.grid()) {
            return Err(CubeError::GridMismatch {
                index: 0,
                path: "mask".to_string(),
                reason,
            });
        }

        let combined = match &self.mask {
            Some(existing) => {
                let mut merged = existing.as_ref().clone();
                ndarray::Zip::from(&mut merged)
                    .and(mask.values())
                    .par_for_each(|m, &n| *m |= n);
                merged
            }
            None => mask.values().to_owned(),
        };

        log::info!(
            "Mask attached: {} of {} pixels outside the region of interest",
            combined.iter().filter(|&&m| m).count(),
            combined.len()
        );
        Ok(Self {
            mask: Some(Arc::new(combined)),
            ..self.clone()
        })
    }

    /// Tasks a realisation of the current selection is split into
    ///
    /// Spatial chunk edges fall on multiples of the chunk size in full-grid
    /// coordinates, so every selection of the same cube reads the same tiles.
    pub fn chunk_plan(&self) -> Vec<ChunkTask> {
        let row_ranges = aligned_ranges(self.window.row_off, self.window.row_end(), self.chunks.rows);
        let col_ranges = aligned_ranges(self.window.col_off, self.window.col_end(), self.chunks.cols);

        let mut tasks = Vec::new();
        let n = self.selection.len();
        for start in (0..n).step_by(self.chunks.band.max(1)) {
            let acquisitions = start..(start + self.chunks.band).min(n);
            for rows in &row_ranges {
                for cols in &col_ranges {
                    tasks.push(ChunkTask {
                        acquisitions: acquisitions.clone(),
                        window: RasterWindow::new(cols.start, rows.start, cols.len(), rows.len()),
                    });
                }
            }
        }
        tasks
    }

    /// Read one chunk; masked and nodata pixels become NaN
    fn read_chunk(&self, task: &ChunkTask) -> CubeResult<PhaseStack> {
        let mut chunk = Array3::from_elem(
            (task.acquisitions.len(), task.window.height, task.window.width),
            f32::NAN,
        );
        let mask = self.mask.as_deref().map(|m| m.slice(window_slice(&task.window)));

        for (slot, position) in task.acquisitions.clone().enumerate() {
            let layer = &self.layers[self.selection[position]];
            let mut data = self.read_layer_window(layer, &task.window)?;
            if let Some(mask) = &mask {
                apply_mask(data.view_mut(), mask.view())?;
            }
            chunk.index_axis_mut(Axis(0), slot).assign(&data);
        }
        Ok(chunk)
    }

    /// Read a window of one layer at full resolution, checking its grid
    pub(crate) fn read_layer_window(&self, layer: &Acquisition, window: &RasterWindow) -> CubeResult<PhaseImage> {
        self.read_layer_resampled(layer, window, None)
    }

    /// Read a window of one layer into `out_size` (width, height), checking
    /// its grid against the cube's
    pub(crate) fn read_layer_resampled(
        &self,
        layer: &Acquisition,
        window: &RasterWindow,
        out_size: Option<(usize, usize)>,
    ) -> CubeResult<PhaseImage> {
        raster::read_window(&layer.source, self.band, window, out_size, Some(&self.grid))
            .map_err(|e| relabel_mismatch(e, layer))
    }

    /// Realise the selection, blocking until every chunk has been read
    pub fn compute(&self, ctx: &ExecutionContext) -> CubeResult<DataCube> {
        let tasks = self.chunk_plan();
        let (n, rows, cols) = self.shape();
        log::info!(
            "Computing {} x {} x {} cube in {} chunks",
            n,
            rows,
            cols,
            tasks.len()
        );
        let start_time = std::time::Instant::now();

        let chunks = ctx.try_map(&tasks, |task| self.read_chunk(task))?;

        let mut values = Array3::from_elem((n, rows, cols), f32::NAN);
        for (task, chunk) in tasks.iter().zip(chunks) {
            let r0 = task.window.row_off - self.window.row_off;
            let c0 = task.window.col_off - self.window.col_off;
            values
                .slice_mut(s![
                    task.acquisitions.clone(),
                    r0..r0 + task.window.height,
                    c0..c0 + task.window.width
                ])
                .assign(&chunk);
        }

        log::info!("Cube computed in {:?}", start_time.elapsed());
        Ok(DataCube {
            values,
            acquisitions: self.acquisitions().cloned().collect(),
            window: self.window,
            transform: self.transform(),
        })
    }
}

fn window_slice(window: &RasterWindow) -> ndarray::SliceInfo<[ndarray::SliceInfoElem; 2], ndarray::Ix2, ndarray::Ix2> {
    s![window.row_off..window.row_end(), window.col_off..window.col_end()]
}

/// Split [start, stop) at multiples of `size`
fn aligned_ranges(start: usize, stop: usize, size: usize) -> Vec<Range<usize>> {
    let size = size.max(1);
    let mut ranges = Vec::new();
    let mut lo = start;
    while lo < stop {
        let hi = ((lo / size + 1) * size).min(stop);
        ranges.push(lo..hi);
        lo = hi;
    }
    ranges
}

fn relabel_mismatch(error: CubeError, layer: &Acquisition) -> CubeError {
    match error {
        CubeError::GridMismatch { path, reason, .. } => CubeError::GridMismatch {
            index: layer.index,
            path,
            reason,
        },
        other => other,
    }
}

/// Realised (in-memory) result of a cube
#[derive(Debug, Clone)]
pub struct DataCube {
    /// (acquisition, row, column); NaN marks missing data
    pub values: PhaseStack,
    pub acquisitions: Vec<Acquisition>,
    /// Window in full-grid coordinates the values cover
    pub window: RasterWindow,
    /// Geotransform of `values`
    pub transform: GeoTransform,
}

impl DataCube {
    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    /// Number of NaN values
    pub fn missing_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_nan()).count()
    }

    /// Values of one pixel (window-relative) across all acquisitions
    pub fn pixel_series(&self, row: usize, col: usize) -> CubeResult<Vec<f32>> {
        let (_, rows, cols) = self.values.dim();
        if row >= rows || col >= cols {
            return Err(CubeError::OutOfBounds(format!(
                "Pixel ({}, {}) outside {}x{} window",
                row, col, rows, cols
            )));
        }
        Ok(self.values.slice(s![.., row, col]).to_vec())
    }

    /// NaN-ignoring mean of every acquisition slice
    pub fn slice_means(&self) -> Vec<f32> {
        self.values
            .axis_iter(Axis(0))
            .map(|slice| {
                let (sum, count) = slice
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0f64, 0usize), |(sum, count), &v| (sum + v as f64, count + 1));
                if count == 0 {
                    f32::NAN
                } else {
                    (sum / count as f64) as f32
                }
            })
            .collect()
    }
}
