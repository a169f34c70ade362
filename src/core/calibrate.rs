use crate::core::raster::Raster;
use crate::core::tiling::map_pixels;
use crate::io::catalog::{Scene, SceneCollection};
use crate::types::{SarError, SarReal, SarResult};
use serde::{Deserialize, Serialize};

/// Radiometric normalization parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationParams {
    /// Multiplier applied to raw samples before the log (e.g. 1e-4 for scaled integer archives)
    pub scale_factor: f32,
    /// Floor applied before the log; must be strictly positive
    pub epsilon: f32,
}

impl Default for NormalizationParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.0,
            epsilon: 1e-5, // -50 dB
        }
    }
}

impl NormalizationParams {
    /// Multiplier for archives storing intensity as integers scaled by 10^4
    pub const SCALED_INTEGER_FACTOR: f32 = 1e-4;

    /// Parameters for scaled integer archives; the default assumes calibrated linear intensity
    pub fn scaled_integer() -> Self {
        Self {
            scale_factor: Self::SCALED_INTEGER_FACTOR,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> SarResult<()> {
        if !(self.epsilon > 0.0) || !self.epsilon.is_finite() {
            return Err(SarError::InvalidParameter(format!(
                "Normalization epsilon must be a positive finite value, got {}",
                self.epsilon
            )));
        }
        if !self.scale_factor.is_finite() || self.scale_factor == 0.0 {
            return Err(SarError::InvalidParameter(format!(
                "Normalization scale factor must be finite and non-zero, got {}",
                self.scale_factor
            )));
        }
        Ok(())
    }

    /// Floor expressed in dB
    pub fn floor_db(&self) -> f32 {
        10.0 * self.epsilon.log10()
    }
}

/// Converts linear backscatter intensity into decibels, band-wise
#[derive(Debug, Clone)]
pub struct RadiometricNormalizer {
    params: NormalizationParams,
}

impl RadiometricNormalizer {
    pub fn new() -> Self {
        Self {
            params: NormalizationParams::default(),
        }
    }

    pub fn with_params(params: NormalizationParams) -> SarResult<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    pub fn params(&self) -> &NormalizationParams {
        &self.params
    }

    /// `10 * log10(max(x * scale_factor, epsilon))`; no-data stays no-data
    #[inline]
    pub fn db_value(&self, linear: SarReal) -> SarReal {
        if linear.is_nan() {
            return linear;
        }
        10.0 * (linear * self.params.scale_factor).max(self.params.epsilon).log10()
    }

    pub fn to_decibel(&self, raster: &Raster) -> SarResult<Raster> {
        log::debug!(
            "Converting {} band(s) to dB (scale {}, floor {:.1} dB)",
            raster.band_count(),
            self.params.scale_factor,
            self.params.floor_db()
        );

        raster.map_bands(|name, band| {
            let floored = band
                .iter()
                .filter(|&&v| !v.is_nan() && !(v * self.params.scale_factor > self.params.epsilon))
                .count();
            if floored > 0 {
                log::debug!("Band {}: {} pixel(s) clamped to the dB floor", name, floored);
            }
            Ok(map_pixels(band, |v| self.db_value(v)))
        })
    }

    pub fn normalize_scene(&self, scene: &Scene) -> SarResult<Scene> {
        Ok(scene.with_raster(self.to_decibel(scene.raster())?))
    }

    pub fn normalize_collection(&self, collection: &SceneCollection) -> SarResult<SceneCollection> {
        log::info!("Normalizing {} scene(s) to dB", collection.len());
        let scenes = collection
            .iter()
            .map(|scene| self.normalize_scene(scene))
            .collect::<SarResult<Vec<_>>>()?;
        SceneCollection::from_scenes(scenes, collection.label())
    }
}

impl Default for RadiometricNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Band-wise dB conversion of a raster with explicit parameters
pub fn to_decibel(raster: &Raster, scale_factor: f32, epsilon: f32) -> SarResult<Raster> {
    RadiometricNormalizer::with_params(NormalizationParams { scale_factor, epsilon })?.to_decibel(raster)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn raster(data: ndarray::Array2<f32>) -> Raster {
        Raster::single_band(
            "VV",
            data,
            GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap()
    }

    #[test]
    fn test_db_conversion() {
        let db = to_decibel(&raster(array![[100.0, 1.0], [0.1, 0.01]]), 1.0, 1e-5).unwrap();
        let band = db.band("VV").unwrap();
        assert_abs_diff_eq!(band[[0, 0]], 20.0, epsilon = 1e-5);
        assert_abs_diff_eq!(band[[0, 1]], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(band[[1, 0]], -10.0, epsilon = 1e-5);
        assert_abs_diff_eq!(band[[1, 1]], -20.0, epsilon = 1e-5);
    }

    #[test]
    fn test_scale_factor_and_floor() {
        // Scaled integer archive: DN 1000 * 1e-4 = 0.1 -> -10 dB
        let db = to_decibel(&raster(array![[1000.0, 0.0], [-3.0, f32::NAN]]), 1e-4, 1e-5).unwrap();
        let band = db.band("VV").unwrap();
        assert_abs_diff_eq!(band[[0, 0]], -10.0, epsilon = 1e-4);
        assert_abs_diff_eq!(band[[0, 1]], -50.0, epsilon = 1e-4);
        assert_abs_diff_eq!(band[[1, 0]], -50.0, epsilon = 1e-4);
        assert!(band[[1, 1]].is_nan());
    }

    #[test]
    fn test_default_and_scaled_integer_params() {
        let linear = RadiometricNormalizer::new();
        assert_eq!(linear.params().scale_factor, 1.0);
        assert_abs_diff_eq!(linear.db_value(0.1), -10.0, epsilon = 1e-5);

        let scaled = RadiometricNormalizer::with_params(NormalizationParams::scaled_integer()).unwrap();
        assert_abs_diff_eq!(scaled.db_value(1000.0), -10.0, epsilon = 1e-4);
        assert_eq!(scaled.params().epsilon, NormalizationParams::default().epsilon);
    }

    #[test]
    fn test_invalid_epsilon_rejected() {
        let input = raster(array![[1.0]]);
        assert!(matches!(to_decibel(&input, 1.0, 0.0), Err(SarError::InvalidParameter(_))));
        assert!(matches!(to_decibel(&input, 1.0, -1e-3), Err(SarError::InvalidParameter(_))));
        assert!(to_decibel(&input, 0.0, 1e-5).is_err());
    }
}
