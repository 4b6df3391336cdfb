//! Core pipeline stages: catalog, lazy cube, mask, viewer and extraction

pub mod catalog;
pub mod cube;
pub mod mask;
pub mod viewer;
pub mod extract;

// Re-export main types
pub use catalog::{Catalog, CatalogRow, RejectedKey};
pub use cube::{ChunkTask, DataCube, LazyCube};
pub use mask::{apply_mask, MaskLayer, MaskOptions};
pub use viewer::{Frame, ViewState, Viewer, Viewport};
pub use extract::{extract_layer_window, extract_window, SeriesPoint, TimeSeries};
