//! Multi-band georeferenced grid shared by every processing stage.

use crate::core::geodesy;
use crate::types::{BoundingBox, CoordinateSystem, GeoTransform, SarError, SarRealImage, SarResult};

/// Shape and georeferencing of a grid, compared before rasters are combined
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub rows: usize,
    pub cols: usize,
    pub geo_transform: GeoTransform,
    pub coordinate_system: CoordinateSystem,
}

impl GridSpec {
    /// Fails with `GridMismatch` unless shape, transform and CRS agree
    pub fn ensure_matches(&self, other: &GridSpec, context: &str) -> SarResult<()> {
        if (self.rows, self.cols) != (other.rows, other.cols) {
            return Err(SarError::GridMismatch(format!(
                "{}: shape {}x{} vs {}x{}",
                context, self.rows, self.cols, other.rows, other.cols
            )));
        }
        if self.coordinate_system != other.coordinate_system {
            return Err(SarError::GridMismatch(format!(
                "{}: coordinate system {} vs {}",
                context, self.coordinate_system, other.coordinate_system
            )));
        }
        if !self.geo_transform.approx_eq(&other.geo_transform) {
            return Err(SarError::GridMismatch(format!(
                "{}: geotransform {:?} vs {:?}",
                context,
                self.geo_transform.to_gdal(),
                other.geo_transform.to_gdal()
            )));
        }
        Ok(())
    }

    pub fn extent(&self) -> BoundingBox {
        self.geo_transform.extent((self.rows, self.cols))
    }
}

/// Named bands on one grid. NaN marks no-data.
///
/// Band names are unique and every band has the grid's shape; all
/// constructors enforce this, and transforms return new rasters rather
/// than mutating their input.
#[derive(Debug, Clone)]
pub struct Raster {
    names: Vec<String>,
    bands: Vec<SarRealImage>,
    geo_transform: GeoTransform,
    coordinate_system: CoordinateSystem,
}

impl Raster {
    pub fn from_bands(
        bands: Vec<(String, SarRealImage)>,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    ) -> SarResult<Self> {
        let Some((_, first)) = bands.first() else {
            return Err(SarError::InvalidParameter("A raster needs at least one band".to_string()));
        };
        let shape = first.dim();
        if shape.0 == 0 || shape.1 == 0 {
            return Err(SarError::InvalidParameter("Raster bands must not be empty".to_string()));
        }

        let mut names = Vec::with_capacity(bands.len());
        let mut arrays = Vec::with_capacity(bands.len());
        for (name, data) in bands {
            if names.contains(&name) {
                return Err(SarError::InvalidParameter(format!("Duplicate band name '{}'", name)));
            }
            if data.dim() != shape {
                return Err(SarError::GridMismatch(format!(
                    "band '{}' is {:?}, expected {:?}",
                    name,
                    data.dim(),
                    shape
                )));
            }
            names.push(name);
            arrays.push(data);
        }

        Ok(Self {
            names,
            bands: arrays,
            geo_transform,
            coordinate_system,
        })
    }

    pub fn single_band(
        name: impl Into<String>,
        data: SarRealImage,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
    ) -> SarResult<Self> {
        Self::from_bands(vec![(name.into(), data)], geo_transform, coordinate_system)
    }

    /// New raster on the same grid as `self`
    pub fn derive(&self, bands: Vec<(String, SarRealImage)>) -> SarResult<Self> {
        let derived = Self::from_bands(bands, self.geo_transform, self.coordinate_system)?;
        if derived.shape() != self.shape() {
            return Err(SarError::GridMismatch(format!(
                "derived raster is {:?}, source is {:?}",
                derived.shape(),
                self.shape()
            )));
        }
        Ok(derived)
    }

    /// Copy of `self` with one more band appended
    pub fn with_band(&self, name: impl Into<String>, data: SarRealImage) -> SarResult<Self> {
        let mut bands: Vec<(String, SarRealImage)> = self.iter().map(|(n, b)| (n.to_string(), b.clone())).collect();
        bands.push((name.into(), data));
        self.derive(bands)
    }

    /// Band-wise map producing a raster with the same names and grid
    pub fn map_bands<F>(&self, mut f: F) -> SarResult<Self>
    where
        F: FnMut(&str, &SarRealImage) -> SarResult<SarRealImage>,
    {
        let bands = self
            .iter()
            .map(|(name, band)| Ok((name.to_string(), f(name, band)?)))
            .collect::<SarResult<Vec<_>>>()?;
        self.derive(bands)
    }

    pub fn band(&self, name: &str) -> SarResult<&SarRealImage> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| &self.bands[i])
            .ok_or_else(|| SarError::MissingBand(name.to_string()))
    }

    pub fn has_band(&self, name: &str) -> bool {
        self.names.iter().any(|n| n == name)
    }

    /// The only band of a single-band raster
    pub fn sole_band(&self) -> SarResult<(&str, &SarRealImage)> {
        match self.names.len() {
            1 => Ok((self.names[0].as_str(), &self.bands[0])),
            n => Err(SarError::InvalidParameter(format!(
                "Expected a single-band raster, got {} bands ({})",
                n,
                self.names.join(", ")
            ))),
        }
    }

    /// Subset of bands, in the requested order
    pub fn select(&self, names: &[&str]) -> SarResult<Self> {
        let bands = names
            .iter()
            .map(|name| Ok((name.to_string(), self.band(name)?.clone())))
            .collect::<SarResult<Vec<_>>>()?;
        self.derive(bands)
    }

    pub fn band_names(&self) -> &[String] {
        &self.names
    }

    pub fn band_count(&self) -> usize {
        self.names.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SarRealImage)> {
        self.names.iter().map(String::as_str).zip(self.bands.iter())
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.bands[0].dim()
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn coordinate_system(&self) -> &CoordinateSystem {
        &self.coordinate_system
    }

    pub fn grid(&self) -> GridSpec {
        let (rows, cols) = self.shape();
        GridSpec {
            rows,
            cols,
            geo_transform: self.geo_transform,
            coordinate_system: self.coordinate_system,
        }
    }

    pub fn extent(&self) -> BoundingBox {
        self.grid().extent()
    }

    /// Pixel ground size in metres (width, height) at the raster's centre
    pub fn pixel_size_meters(&self) -> (f64, f64) {
        let (_, center_y) = self.extent().center();
        geodesy::pixel_size_meters(&self.coordinate_system, &self.geo_transform, center_y)
    }

    /// Number of valid (finite) samples in a band
    pub fn valid_count(&self, name: &str) -> SarResult<usize> {
        Ok(self.band(name)?.iter().filter(|v| v.is_finite()).count())
    }
}
