//! Region-of-interest masks rasterised from vector polygons

use crate::io::vector::read_reprojected_geometries;
use crate::types::{CubeError, CubeResult, GridSpec};
use gdal::raster::RasterizeOptions;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use ndarray::{Array2, ArrayView2, ArrayViewMut2, Zip};
use num_traits::Float;
use std::path::Path;

/// Options for building a mask from polygons
#[derive(Debug, Clone, Default)]
pub struct MaskOptions {
    /// Layer to read; the first layer when unset
    pub layer: Option<String>,
    /// Polygons describe the excluded area (e.g. water) instead of the
    /// region of interest (e.g. land)
    pub invert: bool,
    /// Burn every pixel a polygon touches, not just those whose centre is inside
    pub all_touched: bool,
}

/// Boolean layer aligned to a grid, true where a pixel is outside the
/// region of interest
#[derive(Debug, Clone, PartialEq)]
pub struct MaskLayer {
    values: Array2<bool>,
    grid: GridSpec,
}

impl MaskLayer {
    pub fn new(values: Array2<bool>, grid: GridSpec) -> CubeResult<Self> {
        if values.dim() != grid.shape() {
            return Err(CubeError::InvalidFormat(format!(
                "Mask shape {:?} does not match grid shape {:?}",
                values.dim(),
                grid.shape()
            )));
        }
        Ok(Self { values, grid })
    }

    /// Rasterise the polygons of a vector source against `grid`
    ///
    /// Features are reprojected into the grid's coordinate reference system
    /// before rasterisation.
    pub fn from_vector<P: AsRef<Path>>(path: P, grid: &GridSpec, options: &MaskOptions) -> CubeResult<Self> {
        let geometries = read_reprojected_geometries(path.as_ref(), options.layer.as_deref(), &grid.crs_wkt)?;
        let burned = rasterize_onto_grid(&geometries, grid, options.all_touched)?;

        // Burned pixels are inside the polygons
        let values = burned.mapv(|v| (v != 0) == options.invert);
        let mask = Self::new(values, grid.clone())?;
        log::info!(
            "Mask rasterised: {:.1}% of pixels outside the region of interest",
            mask.coverage() * 100.0
        );
        Ok(mask)
    }

    pub fn values(&self) -> &Array2<bool> {
        &self.values
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Fraction of masked pixels
    pub fn coverage(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().filter(|&&m| m).count() as f64 / self.values.len() as f64
    }
}

fn rasterize_onto_grid(
    geometries: &[gdal::vector::Geometry],
    grid: &GridSpec,
    all_touched: bool,
) -> CubeResult<Array2<u8>> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut dataset = driver.create_with_band_type::<u8, _>(
        "",
        grid.width as isize,
        grid.height as isize,
        1,
    )?;
    dataset.set_geo_transform(&grid.transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_wkt(&grid.crs_wkt)?)?;

    if !geometries.is_empty() {
        let burn_values = vec![1.0; geometries.len()];
        let options = RasterizeOptions {
            all_touched,
            ..Default::default()
        };
        gdal::raster::rasterize(&mut dataset, &[1], geometries, &burn_values, Some(options))?;
    }

    let rasterband = dataset.rasterband(1)?;
    let buffer = rasterband.read_as::<u8>((0, 0), (grid.width, grid.height), (grid.width, grid.height), None)?;
    Array2::from_shape_vec((grid.height, grid.width), buffer.data)
        .map_err(|e| CubeError::Processing(format!("Failed to reshape mask: {}", e)))
}

/// Replace masked values with NaN
///
/// Returns how many values were newly set missing; applying the same mask
/// again returns zero.
pub fn apply_mask<T: Float>(mut data: ArrayViewMut2<T>, mask: ArrayView2<bool>) -> CubeResult<usize> {
    if data.dim() != mask.dim() {
        return Err(CubeError::Processing(format!(
            "Data shape {:?} and mask shape {:?} do not match",
            data.dim(),
            mask.dim()
        )));
    }

    let mut newly_masked = 0usize;
    Zip::from(&mut data).and(&mask).for_each(|value, &masked| {
        if masked && !value.is_nan() {
            *value = T::nan();
            newly_masked += 1;
        }
    });
    Ok(newly_masked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoTransform;
    use ndarray::array;

    fn small_grid() -> GridSpec {
        GridSpec {
            width: 3,
            height: 2,
            transform: GeoTransform::from_gdal([0.0, 1.0, 0.0, 2.0, 0.0, -1.0]),
            crs_wkt: String::new(),
        }
    }

    #[test]
    fn test_apply_mask_is_idempotent() {
        let mut data = array![[1.0f32, 2.0, f32::NAN], [4.0, 5.0, 6.0]];
        let mask = array![[false, true, true], [true, false, false]];

        let first = apply_mask(data.view_mut(), mask.view()).unwrap();
        assert_eq!(first, 2);
        let missing = data.iter().filter(|v| v.is_nan()).count();
        assert_eq!(missing, 3);

        let second = apply_mask(data.view_mut(), mask.view()).unwrap();
        assert_eq!(second, 0);
        assert_eq!(data.iter().filter(|v| v.is_nan()).count(), missing);

        // Shape is never changed, only values
        assert_eq!(data.dim(), (2, 3));
        assert_eq!(data[[1, 2]], 6.0);
    }

    #[test]
    fn test_apply_mask_shape_mismatch() {
        let mut data = Array2::<f64>::zeros((2, 2));
        let mask = Array2::from_elem((2, 3), true);
        assert!(apply_mask(data.view_mut(), mask.view()).is_err());
    }

    #[test]
    fn test_mask_layer_coverage() {
        let mask = MaskLayer::new(array![[true, false, false], [true, true, false]], small_grid()).unwrap();
        assert!((mask.coverage() - 0.5).abs() < 1e-12);
        assert!(MaskLayer::new(Array2::from_elem((3, 2), true), small_grid()).is_err());
    }
}
