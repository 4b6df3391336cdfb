use crate::types::{CubeError, CubeResult, GeoTransform, GridSpec, PhaseImage, RasterWindow};
use gdal::raster::{RasterCreationOption, ResampleAlg};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::path::Path;

/// Tile size of written GeoTIFFs
pub const OUTPUT_BLOCK_SIZE: usize = 256;

/// Map a URL or local path onto the path GDAL should open
///
/// HTTP(S) URLs are read through `/vsicurl/` and `gs://` URLs through
/// `/vsigs/`, so only the byte ranges that are needed get fetched.
pub fn gdal_path(location: &str) -> String {
    if location.starts_with("/vsi") {
        location.to_string()
    } else if location.starts_with("http://") || location.starts_with("https://") {
        format!("/vsicurl/{}", location)
    } else if let Some(rest) = location.strip_prefix("gs://") {
        format!("/vsigs/{}", rest)
    } else {
        location.to_string()
    }
}

/// Metadata of one raster, read without touching pixel data
#[derive(Debug, Clone)]
pub struct RasterInfo {
    pub grid: GridSpec,
    pub band_count: usize,
    pub block_size: (usize, usize),
    pub no_data: Option<f64>,
}

fn open(path: &str) -> CubeResult<Dataset> {
    Dataset::open(Path::new(path)).map_err(|e| {
        CubeError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("Failed to open raster {}: {}", path, e),
        ))
    })
}

fn grid_of(dataset: &Dataset) -> CubeResult<GridSpec> {
    let (width, height) = dataset.raster_size();
    let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
    let crs_wkt = dataset.spatial_ref().and_then(|srs| srs.to_wkt()).unwrap_or_default();
    Ok(GridSpec {
        width,
        height,
        transform,
        crs_wkt,
    })
}

/// Open a raster's metadata
pub fn read_info(path: &str, band: usize) -> CubeResult<RasterInfo> {
    let dataset = open(path)?;
    let band_count = dataset.raster_count() as usize;
    if band == 0 || band > band_count {
        return Err(CubeError::InvalidFormat(format!(
            "{} has {} bands, band {} requested",
            path, band_count, band
        )));
    }
    let rasterband = dataset.rasterband(band as isize)?;

    Ok(RasterInfo {
        grid: grid_of(&dataset)?,
        band_count,
        block_size: rasterband.block_size(),
        no_data: rasterband.no_data_value(),
    })
}

/// Whether two WKT strings describe the same coordinate reference system
pub fn same_crs(a: &str, b: &str) -> CubeResult<bool> {
    if a == b {
        return Ok(true);
    }
    if a.is_empty() || b.is_empty() {
        return Ok(false);
    }
    Ok(SpatialRef::from_wkt(a)? == SpatialRef::from_wkt(b)?)
}

/// Full grid comparison, including the coordinate reference system
pub fn grid_mismatch(expected: &GridSpec, found: &GridSpec) -> CubeResult<Option<String>> {
    if let Some(reason) = expected.mismatch(found) {
        return Ok(Some(reason));
    }
    if !same_crs(&expected.crs_wkt, &found.crs_wkt)? {
        return Ok(Some("coordinate reference system differs".to_string()));
    }
    Ok(None)
}

/// Read a window of one band, optionally resampled to `out_size` (width, height)
///
/// When `expected` is given, the raster's grid (size, geotransform and CRS)
/// is compared with it on the already-open dataset before any pixel is read.
/// Nodata pixels are returned as NaN.
pub fn read_window(
    path: &str,
    band: usize,
    window: &RasterWindow,
    out_size: Option<(usize, usize)>,
    expected: Option<&GridSpec>,
) -> CubeResult<PhaseImage> {
    let dataset = open(path)?;

    if let Some(expected) = expected {
        if let Some(reason) = grid_mismatch(expected, &grid_of(&dataset)?)? {
            return Err(CubeError::GridMismatch {
                index: 0,
                path: path.to_string(),
                reason,
            });
        }
    }

    let rasterband = dataset.rasterband(band as isize)?;
    let (out_width, out_height) = out_size.unwrap_or((window.width, window.height));
    let resample = out_size.map(|_| ResampleAlg::NearestNeighbour);

    log::debug!(
        "Reading {} window {:?} into {}x{}",
        path,
        window,
        out_width,
        out_height
    );

    let buffer = rasterband.read_as::<f32>(
        (window.col_off as isize, window.row_off as isize),
        (window.width, window.height),
        (out_width, out_height),
        resample,
    )?;

    let mut data = Array2::from_shape_vec((out_height, out_width), buffer.data)
        .map_err(|e| CubeError::Processing(format!("Failed to reshape window data: {}", e)))?;

    if let Some(no_data) = rasterband.no_data_value() {
        if !no_data.is_nan() {
            let no_data = no_data as f32;
            data.mapv_inplace(|v| if v == no_data { f32::NAN } else { v });
        }
    }

    Ok(data)
}

/// Write a float32 GeoTIFF with 256x256 tiles
pub fn write_geotiff<P: AsRef<Path>>(
    image: &PhaseImage,
    transform: &GeoTransform,
    crs_wkt: &str,
    output_path: P,
) -> CubeResult<()> {
    log::info!("Writing GeoTIFF: {}", output_path.as_ref().display());

    let (height, width) = image.dim();
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let block = OUTPUT_BLOCK_SIZE.to_string();
    let options = [
        RasterCreationOption { key: "TILED", value: "YES" },
        RasterCreationOption { key: "BLOCKXSIZE", value: &block },
        RasterCreationOption { key: "BLOCKYSIZE", value: &block },
    ];

    let mut dataset = driver.create_with_band_type_with_options::<f32, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        1,
        &options,
    )?;

    dataset.set_geo_transform(&transform.to_gdal())?;
    if !crs_wkt.is_empty() {
        dataset.set_spatial_ref(&SpatialRef::from_wkt(crs_wkt)?)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<f32> = image.iter().cloned().collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;
    rasterband.set_no_data_value(Some(f64::NAN))?;

    Ok(())
}
