//! Threshold masks and severity classes over a single-band change raster.
//!
//! Comparisons are strict (`diff < t`). Severity bins are half-open
//! `[lower, upper)` intervals that tile the real line, so each valid
//! pixel falls in exactly one bin. No-data pixels are never classified;
//! masks flag them separately as unclassifiable.

use crate::core::raster::Raster;
use crate::types::{CoordinateSystem, GeoTransform, SarError, SarResult, NO_DATA};
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strictly decreasing cutoffs, e.g. `[-1, -2, -3]` dB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct ThresholdSet {
    thresholds: Vec<f32>,
}

impl ThresholdSet {
    pub fn new(thresholds: Vec<f32>) -> SarResult<Self> {
        if thresholds.is_empty() {
            return Err(SarError::InvalidParameter("Threshold set is empty".to_string()));
        }
        if let Some(bad) = thresholds.iter().find(|t| !t.is_finite()) {
            return Err(SarError::InvalidParameter(format!("Threshold {} is not finite", bad)));
        }
        if let Some(pair) = thresholds.windows(2).find(|w| w[1] >= w[0]) {
            return Err(SarError::InvalidThresholdOrder(format!(
                "{:?}: {} is not below {}",
                thresholds, pair[1], pair[0]
            )));
        }
        Ok(Self { thresholds })
    }

    /// Flood sensitivity sweep `[-1, -2, -3, -4, -5]` dB
    pub fn flood_default() -> Self {
        Self {
            thresholds: vec![-1.0, -2.0, -3.0, -4.0, -5.0],
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.thresholds
    }

    pub fn len(&self) -> usize {
        self.thresholds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }
}

impl TryFrom<Vec<f32>> for ThresholdSet {
    type Error = SarError;

    fn try_from(value: Vec<f32>) -> SarResult<Self> {
        ThresholdSet::new(value)
    }
}

impl From<ThresholdSet> for Vec<f32> {
    fn from(value: ThresholdSet) -> Self {
        value.thresholds
    }
}

/// Ordinal impact classes, least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Unaffected,
    Light,
    Moderate,
    Severe,
}

impl SeverityLevel {
    pub const ALL: [SeverityLevel; 4] = [
        SeverityLevel::Unaffected,
        SeverityLevel::Light,
        SeverityLevel::Moderate,
        SeverityLevel::Severe,
    ];

    /// Small-integer class code used when a severity map is rasterised
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn name(&self) -> &'static str {
        match self {
            SeverityLevel::Unaffected => "unaffected",
            SeverityLevel::Light => "light",
            SeverityLevel::Moderate => "moderate",
            SeverityLevel::Severe => "severe",
        }
    }
}

impl fmt::Display for SeverityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SeverityLevel {
    type Err = SarError;

    fn from_str(s: &str) -> SarResult<Self> {
        let name = s.trim().to_lowercase();
        SeverityLevel::ALL
            .into_iter()
            .find(|level| level.name() == name)
            .ok_or_else(|| SarError::InvalidParameter(format!("Unknown severity level: {}", s)))
    }
}

/// `[lower, upper)`; infinite ends are allowed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeverityBin {
    pub level: SeverityLevel,
    pub lower: f32,
    pub upper: f32,
}

impl SeverityBin {
    pub fn contains(&self, value: f32) -> bool {
        value >= self.lower && value < self.upper
    }
}

/// Upper bound of one severity class, as written in configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityBoundary {
    pub level: SeverityLevel,
    pub upper: f32,
}

/// Partition of the real line into severity bins.
///
/// Built from class upper bounds in increasing severity; each bin's lower
/// bound is the next class's upper bound, the most severe class extends to
/// -inf, and everything at or above the first bound is `Unaffected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<SeverityBoundary>", into = "Vec<SeverityBoundary>")]
pub struct SeverityScheme {
    boundaries: Vec<SeverityBoundary>,
    bins: Vec<SeverityBin>,
}

impl SeverityScheme {
    pub fn from_upper_bounds(boundaries: &[(SeverityLevel, f32)]) -> SarResult<Self> {
        if boundaries.is_empty() {
            return Err(SarError::InvalidParameter("Severity scheme needs at least one class".to_string()));
        }
        let levels: Vec<SeverityLevel> = boundaries.iter().map(|(l, _)| *l).collect();
        if levels.contains(&SeverityLevel::Unaffected) {
            return Err(SarError::InvalidParameter(
                "'unaffected' is implied above the first bound and cannot be configured".to_string(),
            ));
        }
        if levels.windows(2).any(|w| w[1] <= w[0]) {
            return Err(SarError::InvalidThresholdOrder(format!(
                "severity classes must be listed in increasing severity: {:?}",
                levels
            )));
        }
        let uppers: Vec<f32> = boundaries.iter().map(|(_, u)| *u).collect();
        ThresholdSet::new(uppers.clone()).map_err(|e| match e {
            SarError::InvalidThresholdOrder(msg) => SarError::InvalidThresholdOrder(format!("severity bounds {}", msg)),
            other => other,
        })?;

        let mut bins = vec![SeverityBin {
            level: SeverityLevel::Unaffected,
            lower: uppers[0],
            upper: f32::INFINITY,
        }];
        for (i, (level, upper)) in boundaries.iter().enumerate() {
            let lower = uppers.get(i + 1).copied().unwrap_or(f32::NEG_INFINITY);
            bins.push(SeverityBin {
                level: *level,
                lower,
                upper: *upper,
            });
        }

        Ok(Self {
            boundaries: boundaries
                .iter()
                .map(|&(level, upper)| SeverityBoundary { level, upper })
                .collect(),
            bins,
        })
    }

    /// Light `[-1, 0)`, moderate `[-2, -1)`, severe `(-inf, -2)`
    pub fn vegetation_default() -> Self {
        Self {
            boundaries: vec![
                SeverityBoundary { level: SeverityLevel::Light, upper: 0.0 },
                SeverityBoundary { level: SeverityLevel::Moderate, upper: -1.0 },
                SeverityBoundary { level: SeverityLevel::Severe, upper: -2.0 },
            ],
            bins: vec![
                SeverityBin { level: SeverityLevel::Unaffected, lower: 0.0, upper: f32::INFINITY },
                SeverityBin { level: SeverityLevel::Light, lower: -1.0, upper: 0.0 },
                SeverityBin { level: SeverityLevel::Moderate, lower: -2.0, upper: -1.0 },
                SeverityBin { level: SeverityLevel::Severe, lower: f32::NEG_INFINITY, upper: -2.0 },
            ],
        }
    }

    /// All bins including `Unaffected`, least severe first
    pub fn bins(&self) -> &[SeverityBin] {
        &self.bins
    }

    pub fn levels(&self) -> impl Iterator<Item = SeverityLevel> + '_ {
        self.bins.iter().map(|b| b.level)
    }

    /// Class of a value; `None` for no-data
    pub fn level_for(&self, value: f32) -> Option<SeverityLevel> {
        if value.is_nan() {
            return None;
        }
        self.bins.iter().find(|b| b.contains(value)).map(|b| b.level)
    }
}

impl Default for SeverityScheme {
    fn default() -> Self {
        Self::vegetation_default()
    }
}

impl TryFrom<Vec<SeverityBoundary>> for SeverityScheme {
    type Error = SarError;

    fn try_from(value: Vec<SeverityBoundary>) -> SarResult<Self> {
        let pairs: Vec<(SeverityLevel, f32)> = value.iter().map(|b| (b.level, b.upper)).collect();
        SeverityScheme::from_upper_bounds(&pairs)
    }
}

impl From<SeverityScheme> for Vec<SeverityBoundary> {
    fn from(value: SeverityScheme) -> Self {
        value.boundaries
    }
}

/// Boolean raster on the grid of the raster it was derived from
#[derive(Debug, Clone)]
pub struct Mask {
    name: String,
    values: Array2<bool>,
    unclassifiable: Array2<bool>,
    geo_transform: GeoTransform,
    coordinate_system: CoordinateSystem,
}

impl Mask {
    pub fn new(name: impl Into<String>, values: Array2<bool>, unclassifiable: Array2<bool>, source: &Raster) -> SarResult<Self> {
        if values.dim() != source.shape() || unclassifiable.dim() != source.shape() {
            return Err(SarError::GridMismatch(format!(
                "mask is {:?}, source raster is {:?}",
                values.dim(),
                source.shape()
            )));
        }
        Ok(Self {
            name: name.into(),
            values,
            unclassifiable,
            geo_transform: *source.geo_transform(),
            coordinate_system: *source.coordinate_system(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &Array2<bool> {
        &self.values
    }

    /// Pixels that were no-data in the source
    pub fn unclassifiable(&self) -> &Array2<bool> {
        &self.unclassifiable
    }

    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn geo_transform(&self) -> &GeoTransform {
        &self.geo_transform
    }

    pub fn coordinate_system(&self) -> &CoordinateSystem {
        &self.coordinate_system
    }

    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&v| v).count()
    }

    pub fn unclassifiable_count(&self) -> usize {
        self.unclassifiable.iter().filter(|&&v| v).count()
    }

    /// Every flagged pixel of `self` is also flagged in `other`
    pub fn is_subset_of(&self, other: &Mask) -> bool {
        self.shape() == other.shape() && self.values.iter().zip(other.values.iter()).all(|(&a, &b)| !a || b)
    }

    /// 1 where flagged, 0 where not, no-data where unclassifiable
    pub fn to_raster(&self) -> SarResult<Raster> {
        let data = Zip::from(&self.values)
            .and(&self.unclassifiable)
            .map_collect(|&flag, &nodata| {
                if nodata {
                    NO_DATA
                } else if flag {
                    1.0
                } else {
                    0.0
                }
            });
        Raster::single_band(self.name.clone(), data, self.geo_transform, self.coordinate_system)
    }
}

/// Mask for one cutoff of a threshold set
#[derive(Debug, Clone)]
pub struct ThresholdMask {
    pub threshold: f32,
    pub mask: Mask,
}

/// Per-pixel severity class; `None` marks unclassifiable pixels
#[derive(Debug, Clone)]
pub struct SeverityMap {
    band: String,
    levels: Array2<Option<SeverityLevel>>,
    scheme: SeverityScheme,
    geo_transform: GeoTransform,
    coordinate_system: CoordinateSystem,
}

impl SeverityMap {
    pub fn band(&self) -> &str {
        &self.band
    }

    pub fn scheme(&self) -> &SeverityScheme {
        &self.scheme
    }

    pub fn levels(&self) -> &Array2<Option<SeverityLevel>> {
        &self.levels
    }

    pub fn level_at(&self, row: usize, col: usize) -> Option<SeverityLevel> {
        self.levels.get((row, col)).copied().flatten()
    }

    pub fn count(&self, level: SeverityLevel) -> usize {
        self.levels.iter().filter(|l| **l == Some(level)).count()
    }

    pub fn unclassifiable_count(&self) -> usize {
        self.levels.iter().filter(|l| l.is_none()).count()
    }

    /// Boolean mask of one class, named `{band}_{level}`
    pub fn mask_for(&self, level: SeverityLevel) -> Mask {
        Mask {
            name: format!("{}_{}", self.band, level),
            values: self.levels.map(|l| *l == Some(level)),
            unclassifiable: self.levels.map(Option::is_none),
            geo_transform: self.geo_transform,
            coordinate_system: self.coordinate_system,
        }
    }

    /// Class codes (0 unaffected .. 3 severe) with no-data for unclassifiable pixels
    pub fn to_raster(&self) -> SarResult<Raster> {
        let data = self.levels.map(|l| l.map_or(NO_DATA, |level| level.code() as f32));
        Raster::single_band(format!("{}_severity", self.band), data, self.geo_transform, self.coordinate_system)
    }
}

fn threshold_label(band: &str, threshold: f32) -> String {
    format!("{}_lt_{}", band, threshold)
}

/// Applies threshold sets and severity schemes to change rasters
#[derive(Debug, Clone, Default)]
pub struct ThresholdClassifier;

impl ThresholdClassifier {
    pub fn new() -> Self {
        Self
    }

    /// One mask per threshold (`diff < t`), in the order of the set
    pub fn classify(&self, diff: &Raster, thresholds: &ThresholdSet) -> SarResult<Vec<ThresholdMask>> {
        let (band_name, band) = diff.sole_band()?;
        let unclassifiable = band.map(|v| !v.is_finite());
        log::info!(
            "Classifying {} at {} threshold(s); {} pixel(s) unclassifiable",
            band_name,
            thresholds.len(),
            unclassifiable.iter().filter(|&&u| u).count()
        );

        thresholds
            .as_slice()
            .iter()
            .map(|&t| {
                let values = band.map(|&v| v.is_finite() && v < t);
                let mask = Mask::new(threshold_label(band_name, t), values, unclassifiable.clone(), diff)?;
                log::debug!("{}: {} pixel(s) below {}", band_name, mask.count(), t);
                Ok(ThresholdMask { threshold: t, mask })
            })
            .collect()
    }

    /// Assign every valid pixel to exactly one severity bin
    pub fn classify_severity(&self, diff: &Raster, scheme: &SeverityScheme) -> SarResult<SeverityMap> {
        let (band_name, band) = diff.sole_band()?;
        let levels = band.map(|&v| if v.is_finite() { scheme.level_for(v) } else { None });
        let map = SeverityMap {
            band: band_name.to_string(),
            levels,
            scheme: scheme.clone(),
            geo_transform: *diff.geo_transform(),
            coordinate_system: *diff.coordinate_system(),
        };
        for level in scheme.levels() {
            log::debug!("{} {}: {} pixel(s)", band_name, level, map.count(level));
        }
        Ok(map)
    }
}

/// Flat threshold classification of a single-band change raster
pub fn classify(diff: &Raster, thresholds: &ThresholdSet) -> SarResult<Vec<ThresholdMask>> {
    ThresholdClassifier::new().classify(diff, thresholds)
}
