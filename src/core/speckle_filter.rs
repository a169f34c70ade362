use crate::core::raster::Raster;
use crate::core::statistics::{median_in_place, sorted_mean};
use crate::core::tiling::{render, DEFAULT_TILE_SIZE};
use crate::types::{SarError, SarRealImage, SarResult, NO_DATA};
use serde::{Deserialize, Serialize};

/// Upper bound on neighbourhood size; larger kernels are almost certainly a units mistake
const MAX_KERNEL_OFFSETS: usize = 65_536;

/// Neighbourhood shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelShape {
    Circle,
    Square,
}

/// Units the kernel radius is expressed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelUnits {
    Meters,
    Pixels,
}

/// Available speckle filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeckleFilterType {
    /// Rank filter, robust to bright outliers
    Median,
    /// Boxcar / disc averaging
    Mean,
}

/// Speckle filtering parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeckleFilterParams {
    pub radius: f64,
    pub shape: KernelShape,
    pub units: KernelUnits,
    pub filter_type: SpeckleFilterType,
}

impl Default for SpeckleFilterParams {
    fn default() -> Self {
        Self {
            radius: 50.0, // 50 m disc, 5 pixels at 10 m
            shape: KernelShape::Circle,
            units: KernelUnits::Meters,
            filter_type: SpeckleFilterType::Median,
        }
    }
}

impl SpeckleFilterParams {
    pub fn validate(&self) -> SarResult<()> {
        if !(self.radius > 0.0) || !self.radius.is_finite() {
            return Err(SarError::InvalidParameter(format!(
                "Speckle filter radius must be positive, got {}",
                self.radius
            )));
        }
        Ok(())
    }
}

/// Speckle filter processor
#[derive(Debug, Clone)]
pub struct SpeckleFilter {
    params: SpeckleFilterParams,
    tile_size: usize,
}

impl SpeckleFilter {
    /// Create a new speckle filter with default parameters
    pub fn new() -> Self {
        Self::with_params(SpeckleFilterParams::default())
    }

    /// Create a speckle filter with custom parameters
    pub fn with_params(params: SpeckleFilterParams) -> Self {
        Self {
            params,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn params(&self) -> &SpeckleFilterParams {
        &self.params
    }

    /// Kernel radius in pixels along (rows, cols) for this raster's grid
    pub fn radius_in_pixels(&self, raster: &Raster) -> SarResult<(f64, f64)> {
        self.params.validate()?;
        match self.params.units {
            KernelUnits::Pixels => Ok((self.params.radius, self.params.radius)),
            KernelUnits::Meters => {
                let (width_m, height_m) = raster.pixel_size_meters();
                if !(width_m > 0.0 && height_m > 0.0) {
                    return Err(SarError::InvalidParameter(format!(
                        "Cannot convert a metric radius on a grid with pixel size {} x {} m",
                        width_m, height_m
                    )));
                }
                Ok((self.params.radius / height_m, self.params.radius / width_m))
            }
        }
    }

    /// Neighbourhood offsets (drow, dcol), always including the centre
    pub fn kernel_offsets(&self, raster: &Raster) -> SarResult<Vec<(isize, isize)>> {
        let (ry, rx) = self.radius_in_pixels(raster)?;
        let span = (2.0 * ry.floor() + 1.0) * (2.0 * rx.floor() + 1.0);
        if !(span <= MAX_KERNEL_OFFSETS as f64) {
            return Err(SarError::InvalidParameter(format!(
                "Speckle kernel of {:.1} x {:.1} pixels is too large",
                ry, rx
            )));
        }
        let (ny, nx) = (ry.floor() as isize, rx.floor() as isize);
        let span = span as usize;

        let mut offsets = Vec::with_capacity(span);
        for dr in -ny..=ny {
            for dc in -nx..=nx {
                let inside = match self.params.shape {
                    KernelShape::Square => true,
                    KernelShape::Circle => {
                        let u = dr as f64 / ry;
                        let v = dc as f64 / rx;
                        u * u + v * v <= 1.0 + 1e-9
                    }
                };
                if inside {
                    offsets.push((dr, dc));
                }
            }
        }
        Ok(offsets)
    }

    /// Apply the focal filter to every band
    pub fn apply(&self, raster: &Raster) -> SarResult<Raster> {
        let offsets = self.kernel_offsets(raster)?;
        log::info!(
            "Applying {:?} speckle filter: radius {} {:?}, {:?} kernel of {} pixels",
            self.params.filter_type,
            self.params.radius,
            self.params.units,
            self.params.shape,
            offsets.len()
        );
        raster.map_bands(|name, band| {
            log::debug!("Filtering band {}", name);
            Ok(self.filter_band(band, &offsets))
        })
    }

    /// Neighbourhood reduction over the in-bounds subset of the kernel.
    fn filter_band(&self, band: &SarRealImage, offsets: &[(isize, isize)]) -> SarRealImage {
        let (rows, cols) = band.dim();
        let filter_type = self.params.filter_type;
        render(
            (rows, cols),
            self.tile_size,
            || Vec::with_capacity(offsets.len()),
            |values: &mut Vec<f32>, r, c| {
                values.clear();
                for &(dr, dc) in offsets {
                    let nr = r as isize + dr;
                    let nc = c as isize + dc;
                    if nr < 0 || nc < 0 || nr as usize >= rows || nc as usize >= cols {
                        continue;
                    }
                    let v = band[[nr as usize, nc as usize]];
                    if v.is_finite() {
                        values.push(v);
                    }
                }
                let reduced = match filter_type {
                    SpeckleFilterType::Median => median_in_place(values),
                    SpeckleFilterType::Mean => sorted_mean(values),
                };
                reduced.unwrap_or(NO_DATA)
            },
        )
    }
}

impl Default for SpeckleFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Focal median of every band
pub fn focal_median(raster: &Raster, radius: f64, shape: KernelShape, units: KernelUnits) -> SarResult<Raster> {
    SpeckleFilter::with_params(SpeckleFilterParams {
        radius,
        shape,
        units,
        filter_type: SpeckleFilterType::Median,
    })
    .apply(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};
    use ndarray::{array, Array2};

    fn grid(data: Array2<f32>, pixel: f64) -> Raster {
        Raster::single_band(
            "VV",
            data,
            GeoTransform::north_up(0.0, 1000.0, pixel, pixel),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap()
    }

    #[test]
    fn test_circular_kernel_from_meters() {
        let raster = grid(Array2::zeros((20, 20)), 10.0);
        let filter = SpeckleFilter::new();
        let offsets = filter.kernel_offsets(&raster).unwrap();
        // Radius 5 pixels: lattice points in a disc of radius 5
        assert_eq!(offsets.len(), 81);
        assert!(offsets.contains(&(0, 0)));
        assert!(offsets.contains(&(5, 0)));
        assert!(offsets.contains(&(3, 4)));
        assert!(!offsets.contains(&(4, 4)));
    }

    #[test]
    fn test_huge_radius_is_rejected() {
        let raster = grid(Array2::zeros((4, 4)), 10.0);
        let err = focal_median(&raster, 1e30, KernelShape::Circle, KernelUnits::Pixels).unwrap_err();
        assert!(matches!(err, SarError::InvalidParameter(_)));
        let err = focal_median(&raster, 3000.0, KernelShape::Square, KernelUnits::Meters).unwrap_err();
        assert!(matches!(err, SarError::InvalidParameter(_)));
    }

    #[test]
    fn test_sub_pixel_radius_is_identity() {
        let data = array![[1.0, 9.0, 3.0], [4.0, -5.0, 6.0], [7.0, 8.0, 2.0]];
        let out = focal_median(&grid(data.clone(), 10.0), 5.0, KernelShape::Circle, KernelUnits::Meters).unwrap();
        assert_eq!(out.band("VV").unwrap(), &data);
    }

    #[test]
    fn test_edges_use_clipped_neighbourhood() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 100.0, 6.0], [7.0, 8.0, 9.0]];
        let out = focal_median(&grid(data, 10.0), 1.0, KernelShape::Square, KernelUnits::Pixels).unwrap();
        let vv = out.band("VV").unwrap();
        // Corner sees {1, 2, 4, 100}
        assert_eq!(vv[[0, 0]], 3.0);
        // Centre sees all nine values
        assert_eq!(vv[[1, 1]], 6.0);
        // Edge sees {1, 2, 3, 4, 100, 6}
        assert_eq!(vv[[0, 1]], 3.5);
    }

    #[test]
    fn test_no_data_excluded() {
        let nan = f32::NAN;
        let data = array![[nan, nan, nan], [nan, 5.0, nan], [nan, nan, 1.0]];
        let out = focal_median(&grid(data, 10.0), 1.0, KernelShape::Square, KernelUnits::Pixels).unwrap();
        let vv = out.band("VV").unwrap();
        assert_eq!(vv[[0, 0]], 5.0);
        assert_eq!(vv[[1, 1]], 3.0);
        assert_eq!(vv[[2, 2]], 3.0);

        let empty = array![[nan, nan], [nan, nan]];
        let out = focal_median(&grid(empty, 10.0), 1.0, KernelShape::Square, KernelUnits::Pixels).unwrap();
        assert!(out.band("VV").unwrap().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_tile_size_does_not_change_result() {
        let data = Array2::from_shape_fn((17, 23), |(r, c)| ((r * 31 + c * 17) % 13) as f32);
        let raster = grid(data, 10.0);
        let a = SpeckleFilter::new().with_tile_size(4).apply(&raster).unwrap();
        let b = SpeckleFilter::new().with_tile_size(256).apply(&raster).unwrap();
        assert_eq!(a.band("VV").unwrap(), b.band("VV").unwrap());
    }

    #[test]
    fn test_invalid_radius() {
        let raster = grid(Array2::zeros((3, 3)), 10.0);
        assert!(focal_median(&raster, 0.0, KernelShape::Circle, KernelUnits::Meters).is_err());
        assert!(focal_median(&raster, f64::NAN, KernelShape::Circle, KernelUnits::Pixels).is_err());
    }
}
