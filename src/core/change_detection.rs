//! Before/after differencing of composites.
//!
//! All operations require the two rasters to share one grid exactly;
//! resampling is never implicit. No-data in either input yields no-data.

use crate::core::raster::Raster;
use crate::core::tiling::{map_pixels, zip_pixels};
use crate::types::{Polarization, SarError, SarReal, SarRealImage, SarResult, NO_DATA};

/// Name of the difference band derived from `band`
pub fn diff_band_name(band: &str) -> String {
    format!("{}_diff", band)
}

/// Name of the ratio-change band for `numerator / denominator`
pub fn ratio_change_band_name(numerator: &str, denominator: &str) -> String {
    format!("{}_{}_ratio_change", numerator, denominator)
}

#[inline]
fn safe_ratio(numerator: SarReal, denominator: SarReal) -> SarReal {
    if !numerator.is_finite() || !denominator.is_finite() || denominator == 0.0 {
        return NO_DATA;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        NO_DATA
    }
}

fn subtract(a: &SarRealImage, b: &SarRealImage) -> SarRealImage {
    zip_pixels(a, b, |x, y| {
        let d = x - y;
        if d.is_finite() {
            d
        } else {
            NO_DATA
        }
    })
}

/// `after[band] - before[band]`, as a single band named `{band}_diff`
pub fn difference(after: &Raster, before: &Raster, band: &str) -> SarResult<Raster> {
    before.grid().ensure_matches(&after.grid(), "difference")?;
    let diff = subtract(after.band(band)?, before.band(band)?);
    after.derive(vec![(diff_band_name(band), diff)])
}

/// `(after[num] / after[den]) - (before[num] / before[den])`.
///
/// A zero or no-data denominator in either epoch gives no-data.
pub fn ratio_change(after: &Raster, before: &Raster, numerator: &str, denominator: &str) -> SarResult<Raster> {
    before.grid().ensure_matches(&after.grid(), "ratio change")?;
    let after_ratio = zip_pixels(after.band(numerator)?, after.band(denominator)?, safe_ratio);
    let before_ratio = zip_pixels(before.band(numerator)?, before.band(denominator)?, safe_ratio);
    after.derive(vec![(
        ratio_change_band_name(numerator, denominator),
        subtract(&after_ratio, &before_ratio),
    )])
}

/// `(a - b) / (a + b)`, e.g. NDWI from green and near-infrared bands
pub fn normalized_difference(raster: &Raster, a: &str, b: &str, name: &str) -> SarResult<Raster> {
    let index = zip_pixels(raster.band(a)?, raster.band(b)?, |x, y| safe_ratio(x - y, x + y));
    raster.derive(vec![(name.to_string(), index)])
}

/// Which differences and ratio a change composite contains
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    bands: Vec<String>,
    ratio: Option<(String, String)>,
}

impl Default for ChangeDetector {
    /// VV and VH differences plus the VH/VV ratio change
    fn default() -> Self {
        Self {
            bands: vec![Polarization::VV.to_string(), Polarization::VH.to_string()],
            ratio: Some((Polarization::VH.to_string(), Polarization::VV.to_string())),
        }
    }
}

impl ChangeDetector {
    pub fn new(bands: Vec<String>, ratio: Option<(String, String)>) -> SarResult<Self> {
        if bands.is_empty() && ratio.is_none() {
            return Err(SarError::InvalidParameter(
                "Change detector needs at least one band or a ratio".to_string(),
            ));
        }
        Ok(Self { bands, ratio })
    }

    /// Band names the inputs must carry
    pub fn required_bands(&self) -> Vec<&str> {
        let mut required: Vec<&str> = self.bands.iter().map(String::as_str).collect();
        if let Some((num, den)) = &self.ratio {
            for name in [num.as_str(), den.as_str()] {
                if !required.contains(&name) {
                    required.push(name);
                }
            }
        }
        required
    }

    /// Names of the bands `detect` produces, in order
    pub fn output_bands(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bands.iter().map(|b| diff_band_name(b)).collect();
        if let Some((num, den)) = &self.ratio {
            names.push(ratio_change_band_name(num, den));
        }
        names
    }

    /// Multi-band change raster: one `_diff` band per configured band, then the ratio change
    pub fn detect(&self, after: &Raster, before: &Raster) -> SarResult<Raster> {
        before.grid().ensure_matches(&after.grid(), "change detection")?;
        log::info!("Computing change bands {:?}", self.output_bands());

        let mut bands = Vec::with_capacity(self.bands.len() + 1);
        for band in &self.bands {
            let diff = subtract(after.band(band)?, before.band(band)?);
            bands.push((diff_band_name(band), diff));
        }
        if let Some((num, den)) = &self.ratio {
            let ratio = ratio_change(after, before, num, den)?;
            let (name, data) = ratio.sole_band()?;
            bands.push((name.to_string(), data.clone()));
        }
        after.derive(bands)
    }
}

/// `VV_diff`, `VH_diff` and `VH_VV_ratio_change`
pub fn change_composite(after: &Raster, before: &Raster) -> SarResult<Raster> {
    ChangeDetector::default().detect(after, before)
}

/// Pauli-like band names, in output order
pub const PAULI_BANDS: [&str; 3] = ["Pauli1", "Pauli2", "Pauli3"];

/// Dual-pol Pauli-like decomposition: `VV + VH`, `VV - VH` and `2 * VH`.
///
/// Inputs are taken as-is (dB composites in the default pipeline).
pub fn pauli_components(raster: &Raster) -> SarResult<Raster> {
    let vv = raster.band(&Polarization::VV.to_string())?;
    let vh = raster.band(&Polarization::VH.to_string())?;
    raster.derive(vec![
        (PAULI_BANDS[0].to_string(), zip_pixels(vv, vh, |a, b| a + b)),
        (PAULI_BANDS[1].to_string(), zip_pixels(vv, vh, |a, b| a - b)),
        (PAULI_BANDS[2].to_string(), map_pixels(vh, |b| 2.0 * b)),
    ])
}

/// Band-wise `pauli(after) - pauli(before)`, as `Pauli1_diff` and so on
pub fn pauli_change(after: &Raster, before: &Raster) -> SarResult<Raster> {
    before.grid().ensure_matches(&after.grid(), "pauli change")?;
    let (after, before) = (pauli_components(after)?, pauli_components(before)?);
    let bands = PAULI_BANDS
        .iter()
        .map(|name| Ok((diff_band_name(name), subtract(after.band(name)?, before.band(name)?))))
        .collect::<SarResult<Vec<_>>>()?;
    after.derive(bands)
}
