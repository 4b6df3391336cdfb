use crate::types::{CubeError, CubeResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::vector::{Geometry, LayerAccess};
use gdal::Dataset;
use std::path::Path;

/// Read every geometry of a vector layer, reprojected into `target_wkt`
///
/// The layer must declare its coordinate reference system; a source without
/// one cannot be reprojected safely and is rejected.
pub fn read_reprojected_geometries<P: AsRef<Path>>(
    path: P,
    layer_name: Option<&str>,
    target_wkt: &str,
) -> CubeResult<Vec<Geometry>> {
    log::info!("Reading vector features from: {}", path.as_ref().display());

    let dataset = Dataset::open(path.as_ref())?;
    let mut layer = match layer_name {
        Some(name) => dataset.layer_by_name(name)?,
        None => dataset.layer(0)?,
    };

    let source_srs = layer.spatial_ref().ok_or_else(|| {
        CubeError::Crs(format!(
            "{} has no coordinate reference system",
            path.as_ref().display()
        ))
    })?;
    if target_wkt.is_empty() {
        return Err(CubeError::Crs(
            "Raster grid has no coordinate reference system".to_string(),
        ));
    }
    let target_srs = SpatialRef::from_wkt(target_wkt)?;

    // x/y (easting/northing, lon/lat) order on both sides
    source_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);
    target_srs.set_axis_mapping_strategy(gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER);

    let transform = CoordTransform::new(&source_srs, &target_srs)?;

    let mut geometries = Vec::new();
    let mut skipped = 0usize;
    for feature in layer.features() {
        match feature.geometry() {
            Some(geometry) => geometries.push(geometry.transform(&transform)?),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!("Skipped {} features without geometry", skipped);
    }
    log::info!("Reprojected {} geometries into the raster CRS", geometries.len());
    Ok(geometries)
}
