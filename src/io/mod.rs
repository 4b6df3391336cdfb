//! I/O modules for object-store listings, rasters and vector masks

pub mod raster;
pub mod storage;
pub mod vector;

pub use raster::{gdal_path, read_info, RasterInfo};
pub use storage::{GcsClient, LocalListing, ObjectStore, StaticListing};
