//! Raster export: a pure preparation step plus pluggable writers.

use crate::core::aoi::AreaOfInterest;
use crate::core::raster::Raster;
use crate::core::sampling::SamplingGrid;
use crate::types::{CoordinateSystem, SarError, SarResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What to export and on which grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub description: String,
    pub region: AreaOfInterest,
    /// Output pixel size, metres
    pub scale: f64,
    pub max_pixels: u64,
    pub crs: CoordinateSystem,
}

impl ExportRequest {
    /// Request in the region's own coordinate system
    pub fn new(description: impl Into<String>, region: AreaOfInterest, scale: f64, max_pixels: u64) -> Self {
        let crs = *region.coordinate_system();
        Self {
            description: description.into(),
            region,
            scale,
            max_pixels,
            crs,
        }
    }

    /// Clip `raster` to the region and resample it to `scale`.
    ///
    /// The pixel budget is enforced before any value is copied. Rasters in
    /// a different coordinate system are rejected rather than reprojected.
    pub fn prepare(&self, raster: &Raster) -> SarResult<Raster> {
        if self.description.trim().is_empty() {
            return Err(SarError::InvalidParameter("Export description is empty".to_string()));
        }
        if *raster.coordinate_system() != self.crs {
            return Err(SarError::GridMismatch(format!(
                "export '{}' targets {} but the raster is in {}",
                self.description,
                self.crs,
                raster.coordinate_system()
            )));
        }
        let grid = SamplingGrid::covering(&raster.grid(), &self.region, self.scale)?;
        grid.ensure_within_budget(self.max_pixels)?;
        log::info!(
            "Export '{}': {} band(s), {}x{} at {} m",
            self.description,
            raster.band_count(),
            grid.rows,
            grid.cols,
            self.scale
        );
        grid.resample(raster, &self.region)
    }

    /// File-system friendly form of the description
    pub fn file_stem(&self) -> String {
        self.description
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect()
    }
}

/// Writes prepared rasters to external storage
pub trait RasterExporter {
    /// Prepare `raster` for `request` and write it; returns the written location
    fn export(&self, raster: &Raster, request: &ExportRequest) -> SarResult<PathBuf>;
}

/// Float32 GeoTIFF writer, one file per request
#[cfg(feature = "gdal")]
#[derive(Debug, Clone)]
pub struct GeoTiffExporter {
    directory: PathBuf,
    compression: Option<String>,
}

#[cfg(feature = "gdal")]
impl GeoTiffExporter {
    pub fn new<P: Into<PathBuf>>(directory: P) -> Self {
        Self {
            directory: directory.into(),
            compression: None,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Self {
        self.compression = Some(compression.to_string());
        self
    }

    pub fn write(&self, raster: &Raster, path: &std::path::Path) -> SarResult<()> {
        use gdal::raster::Buffer;
        use gdal::spatial_ref::SpatialRef;
        use gdal::{DriverManager, Metadata};

        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let (height, width) = raster.shape();
        let mut dataset = driver.create_with_band_type::<f32, _>(
            path,
            width as isize,
            height as isize,
            raster.band_count() as isize,
        )?;
        dataset.set_geo_transform(&raster.geo_transform().to_gdal())?;
        if let Some(epsg) = raster.coordinate_system().epsg() {
            dataset.set_spatial_ref(&SpatialRef::from_epsg(epsg)?)?;
        }

        for (index, (name, data)) in raster.iter().enumerate() {
            let mut band = dataset.rasterband(index as isize + 1)?;
            let buffer = Buffer::new((width, height), data.iter().copied().collect::<Vec<f32>>());
            band.write((0, 0), (width, height), &buffer)?;
            band.set_no_data_value(Some(f32::NAN as f64))?;
            band.set_description(name)?;
        }
        if let Some(compression) = &self.compression {
            dataset.set_metadata_item("COMPRESS", compression, "")?;
        }
        log::info!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(feature = "gdal")]
impl RasterExporter for GeoTiffExporter {
    fn export(&self, raster: &Raster, request: &ExportRequest) -> SarResult<PathBuf> {
        let prepared = request.prepare(raster)?;
        std::fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("{}.tif", request.file_stem()));
        self.write(&prepared, &path)?;
        Ok(path)
    }
}

/// Read band 1 of a georeferenced raster file as band `band_name`
#[cfg(feature = "gdal")]
pub fn read_geotiff<P: AsRef<std::path::Path>>(path: P, band_name: &str) -> SarResult<Raster> {
    use crate::types::GeoTransform;
    use ndarray::Array2;

    let dataset = gdal::Dataset::open(path.as_ref())?;
    let geo_transform = dataset.geo_transform().map_err(|e| {
        SarError::InvalidFormat(format!(
            "{} is not georeferenced ({}); terrain-correct it first",
            path.as_ref().display(),
            e
        ))
    })?;
    let coordinate_system = match dataset.spatial_ref().and_then(|srs| srs.auth_code()) {
        Ok(code) if code > 0 => CoordinateSystem::from_epsg(code as u32),
        _ => {
            log::warn!("{} has no EPSG code; treating as radar geometry", path.as_ref().display());
            CoordinateSystem::Radar
        }
    };

    let (width, height) = dataset.raster_size();
    let band = dataset.rasterband(1)?;
    let no_data = band.no_data_value();
    let buffer = band.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
    let mut data = Array2::from_shape_vec((height, width), buffer.data)
        .map_err(|e| SarError::Processing(format!("Failed to reshape {}: {}", band_name, e)))?;
    if let Some(no_data) = no_data.filter(|v| v.is_finite()) {
        data.mapv_inplace(|v| if v as f64 == no_data { f32::NAN } else { v });
    }
    log::debug!("Read {} as {} ({}x{})", path.as_ref().display(), band_name, height, width);

    Raster::single_band(band_name, data, GeoTransform::from_gdal(geo_transform), coordinate_system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, GeoTransform};
    use ndarray::Array2;

    fn utm() -> CoordinateSystem {
        CoordinateSystem::Projected { epsg: 32646 }
    }

    fn raster() -> Raster {
        Raster::single_band(
            "VV_diff",
            Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32),
            GeoTransform::north_up(500000.0, 3000100.0, 10.0, 10.0),
            utm(),
        )
        .unwrap()
    }

    #[test]
    fn test_prepare_clips_and_coarsens() {
        let region = AreaOfInterest::rectangle(BoundingBox::new(500000.0, 3000040.0, 500060.0, 3000100.0), utm()).unwrap();
        let request = ExportRequest::new("flood change", region, 20.0, 100);
        let prepared = request.prepare(&raster()).unwrap();
        assert_eq!(prepared.shape(), (3, 3));
        assert_eq!(prepared.geo_transform().pixel_width, 20.0);
        assert_eq!(prepared.band("VV_diff").unwrap()[[0, 0]], 11.0);
        assert_eq!(request.file_stem(), "flood_change");
    }

    #[test]
    fn test_prepare_budget_and_crs() {
        let region = AreaOfInterest::rectangle(raster().extent(), utm()).unwrap();
        let request = ExportRequest::new("all", region.clone(), 10.0, 99);
        assert!(matches!(
            request.prepare(&raster()),
            Err(SarError::PixelBudgetExceeded { required: 100, max_pixels: 99 })
        ));

        let mut request = ExportRequest::new("all", region, 10.0, 1_000);
        request.crs = CoordinateSystem::Geographic;
        assert!(matches!(request.prepare(&raster()), Err(SarError::GridMismatch(_))));
    }
}
