//! sarcube: lazy exploration of InSAR interferogram stacks
//!
//! Builds a dated catalog from object-store listings, stacks the rasters into
//! a lazily evaluated cube, masks it with vector polygons, and extracts
//! windows and per-pixel time series for further analysis.

pub mod types;
pub mod config;
pub mod context;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Acquisition, BoundingBox, CubeError, CubeResult, GeoTransform, GridSpec, PhaseImage, PhaseStack,
    RasterWindow,
};

pub use config::{ChunkSpec, GridCheck, PipelineConfig};
pub use context::ExecutionContext;
pub use io::{GcsClient, LocalListing, ObjectStore, StaticListing};
pub use crate::core::{
    extract_window, Catalog, CatalogRow, DataCube, LazyCube, MaskLayer, MaskOptions, TimeSeries, ViewState,
    Viewer, Viewport,
};

#[cfg(feature = "python")]
mod python {
    use crate::config::{self, GridCheck, PipelineConfig};
    use crate::context::ExecutionContext;
    use crate::core::{
        extract_window, Catalog, LazyCube, MaskLayer, MaskOptions, TimeSeries, ViewState, Viewer, Viewport,
    };
    use crate::io::{GcsClient, LocalListing};
    use crate::types::{BoundingBox, CubeError};
    use numpy::IntoPyArray;
    use pyo3::exceptions::{PyIndexError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;
    use std::path::Path;

    impl From<CubeError> for PyErr {
        fn from(err: CubeError) -> PyErr {
            match err {
                CubeError::OutOfBounds(_) => PyIndexError::new_err(err.to_string()),
                CubeError::FilenameParse { .. } | CubeError::Config(_) => PyValueError::new_err(err.to_string()),
                other => PyRuntimeError::new_err(other.to_string()),
            }
        }
    }

    fn parse_grid_check(name: &str) -> PyResult<GridCheck> {
        match name.to_lowercase().as_str() {
            "metadata" => Ok(GridCheck::Metadata),
            "deferred" => Ok(GridCheck::Deferred),
            _ => Err(PyValueError::new_err(format!("Invalid grid check: {}", name))),
        }
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_class::<PyCatalog>()?;
        m.add_class::<PyCube>()?;
        Ok(())
    }

    /// Python wrapper for Catalog
    #[pyclass(name = "Catalog")]
    struct PyCatalog {
        inner: Catalog,
    }

    #[pymethods]
    impl PyCatalog {
        #[new]
        #[pyo3(signature = (keys, url_prefix = None))]
        fn new(keys: Vec<String>, url_prefix: Option<String>) -> PyResult<Self> {
            let prefix = url_prefix.unwrap_or_else(|| config::DEFAULT_URL_PREFIX.to_string());
            Ok(PyCatalog {
                inner: Catalog::from_keys(&keys, &prefix)?,
            })
        }

        /// List a public bucket prefix, e.g. "insar-bucket/track64"
        #[staticmethod]
        fn from_bucket(prefix: &str) -> PyResult<Self> {
            let config = PipelineConfig::load(None)?;
            let store = GcsClient::from_config(&config)?;
            Ok(PyCatalog {
                inner: Catalog::from_store(&store, prefix, &config)?,
            })
        }

        /// List files below a local directory; URLs are local paths
        #[staticmethod]
        #[pyo3(signature = (root, prefix = ""))]
        fn from_directory(root: &str, prefix: &str) -> PyResult<Self> {
            let config = PipelineConfig::default().with_url_prefix(format!("{}/", root.trim_end_matches('/')));
            let store = LocalListing::new(root);
            Ok(PyCatalog {
                inner: Catalog::from_store(&store, prefix, &config)?,
            })
        }

        fn __len__(&self) -> usize {
            self.inner.len()
        }

        /// (remote_path, url, date1, date2, date_delta_days) per row
        fn rows(&self) -> Vec<(String, String, String, String, i64)> {
            self.inner
                .iter()
                .map(|row| {
                    (
                        row.remote_path().to_string(),
                        row.url().to_string(),
                        row.date1().to_string(),
                        row.date2().to_string(),
                        row.date_delta().num_days(),
                    )
                })
                .collect()
        }

        fn __repr__(&self) -> String {
            format!("Catalog(rows={})", self.inner.len())
        }
    }

    /// Python wrapper for LazyCube with its execution context
    #[pyclass(name = "Cube")]
    struct PyCube {
        inner: LazyCube,
        ctx: std::sync::Arc<ExecutionContext>,
        output_dir: std::path::PathBuf,
    }

    #[pymethods]
    impl PyCube {
        #[new]
        #[pyo3(signature = (catalog, workers = 0, grid_check = "metadata"))]
        fn new(catalog: PyRef<'_, PyCatalog>, workers: usize, grid_check: &str) -> PyResult<Self> {
            let mut config = PipelineConfig::load(None)?.with_grid_check(parse_grid_check(grid_check)?);
            config.workers = workers;
            let ctx = ExecutionContext::from_config(&config)?;
            let inner = LazyCube::open(&catalog.inner, &config, &ctx)?;
            Ok(PyCube {
                inner,
                ctx: std::sync::Arc::new(ctx),
                output_dir: config.output_dir,
            })
        }

        #[getter]
        fn shape(&self) -> (usize, usize, usize) {
            self.inner.shape()
        }

        #[getter]
        fn bounds(&self) -> (f64, f64, f64, f64) {
            let b = self.inner.bounds();
            (b.min_x, b.min_y, b.max_x, b.max_y)
        }

        /// Attach a polygon mask; True pixels of the mask become NaN
        #[pyo3(signature = (path, invert = false, all_touched = false))]
        fn with_mask(&self, path: &str, invert: bool, all_touched: bool) -> PyResult<Self> {
            let options = MaskOptions {
                layer: None,
                invert,
                all_touched,
            };
            let mask = MaskLayer::from_vector(path, self.inner.grid(), &options)?;
            Ok(PyCube {
                inner: self.inner.with_mask(&mask)?,
                ctx: self.ctx.clone(),
                output_dir: self.output_dir.clone(),
            })
        }

        fn isel(&self, acquisition: usize) -> PyResult<Self> {
            Ok(PyCube {
                inner: self.inner.isel_acquisition(acquisition)?,
                ctx: self.ctx.clone(),
                output_dir: self.output_dir.clone(),
            })
        }

        fn sel_bounds(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> PyResult<Self> {
            Ok(PyCube {
                inner: self.inner.sel_bounds(&BoundingBox::new(min_x, min_y, max_x, max_y))?,
                ctx: self.ctx.clone(),
                output_dir: self.output_dir.clone(),
            })
        }

        /// Realise the selection as a float32 array (acquisition, row, col)
        fn compute<'py>(&self, py: Python<'py>) -> PyResult<&'py numpy::PyArray3<f32>> {
            let ctx = self.ctx.clone();
            let cube = self.inner.clone();
            let realised = py.allow_threads(move || cube.compute(&ctx))?;
            Ok(realised.values.into_pyarray(py))
        }

        /// Render one acquisition of the current selection at screen size
        #[pyo3(signature = (acquisition = 0, width = 800, height = 600))]
        fn render<'py>(
            &self,
            py: Python<'py>,
            acquisition: usize,
            width: usize,
            height: usize,
        ) -> PyResult<&'py numpy::PyArray2<f32>> {
            let viewer = Viewer::new(&self.inner, Viewport { width, height })?;
            let view = viewer.select(&viewer.initial_view(), acquisition)?;
            let frame = viewer.render(&view, &self.ctx)?;
            Ok(frame.image.into_pyarray(py))
        }

        /// Nearest-pixel series as (date1, value) pairs
        fn time_series(&self, py: Python<'_>, x: f64, y: f64) -> PyResult<Vec<(String, f32)>> {
            let ctx = self.ctx.clone();
            let cube = self.inner.clone();
            let series = py.allow_threads(move || TimeSeries::at_point(&cube, x, y, &ctx))?;
            Ok(series
                .points
                .iter()
                .map(|p| (p.date1.to_string(), p.value))
                .collect())
        }

        /// Write the window covering the bounds of one acquisition to `out_dir`,
        /// or to the configured output directory
        #[pyo3(signature = (acquisition, bounds, out_dir = None))]
        fn extract_window(
            &self,
            acquisition: usize,
            bounds: (f64, f64, f64, f64),
            out_dir: Option<&str>,
        ) -> PyResult<String> {
            let view = ViewState {
                acquisition,
                bounds: BoundingBox::new(bounds.0, bounds.1, bounds.2, bounds.3),
            };
            let out_dir = out_dir.map(Path::new).unwrap_or(self.output_dir.as_path());
            let path = extract_window(&self.inner, &view, out_dir)?;
            Ok(path.to_string_lossy().into_owned())
        }

        fn __repr__(&self) -> String {
            let (n, rows, cols) = self.inner.shape();
            format!("Cube(acquisitions={}, rows={}, cols={})", n, rows, cols)
        }
    }
}
