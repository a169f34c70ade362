//! Run summary and map layer descriptors.

use crate::core::change_detection::{diff_band_name, ratio_change_band_name};
use crate::core::classify::SeverityLevel;
use crate::core::pipeline::Window;
use crate::core::zonal::ZonalStatistic;
use crate::types::{DateRange, SarError, SarResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

const M2_PER_KM2: f64 = 1.0e6;

pub fn to_km2(area_m2: f64) -> f64 {
    area_m2 / M2_PER_KM2
}

/// Flooded area below one threshold
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FloodArea {
    pub threshold_db: f32,
    pub area_km2: f64,
    pub pixels: usize,
}

/// Structured result of one change analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeReport {
    pub generated_at: DateTime<Utc>,
    pub before: DateRange,
    pub after: DateRange,
    pub before_scenes: usize,
    pub after_scenes: usize,
    pub scale_m: f64,
    pub flood_band: String,
    pub flood_areas: Vec<FloodArea>,
    pub vegetation_band: String,
    pub vegetation_impact: BTreeMap<SeverityLevel, f64>,
    /// Cutoff on the vegetation difference band counted as loss
    pub vegetation_loss_threshold_db: f32,
    pub vegetation_loss_km2: f64,
    /// Min/max/mean/stddev of every change band over the AOI
    pub change_statistics: BTreeMap<String, ZonalStatistic>,
    /// No-data pixels per classified band
    pub unclassifiable_pixels: BTreeMap<String, usize>,
}

/// Typed key of a report scalar
#[derive(Debug, Clone, PartialEq)]
pub enum ReportKey {
    SceneCount(Window),
    FloodArea { threshold_db: f32 },
    VegetationArea(SeverityLevel),
    VegetationLoss { threshold_db: f32 },
    Unclassifiable(String),
}

impl fmt::Display for ReportKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportKey::SceneCount(window) => write!(f, "scenes ({})", window),
            ReportKey::FloodArea { threshold_db } => write!(f, "flooded area below {} dB (km²)", threshold_db),
            ReportKey::VegetationArea(level) => write!(f, "vegetation impact, {} (km²)", level),
            ReportKey::VegetationLoss { threshold_db } => {
                write!(f, "vegetation loss below {} dB (km²)", threshold_db)
            }
            ReportKey::Unclassifiable(band) => write!(f, "unclassifiable pixels ({})", band),
        }
    }
}

impl ChangeReport {
    /// Every scalar of the report, in a stable order
    pub fn entries(&self) -> Vec<(ReportKey, f64)> {
        let mut entries = vec![
            (ReportKey::SceneCount(Window::Before), self.before_scenes as f64),
            (ReportKey::SceneCount(Window::After), self.after_scenes as f64),
        ];
        entries.extend(
            self.flood_areas
                .iter()
                .map(|a| (ReportKey::FloodArea { threshold_db: a.threshold_db }, a.area_km2)),
        );
        entries.extend(
            self.vegetation_impact
                .iter()
                .map(|(level, area)| (ReportKey::VegetationArea(*level), *area)),
        );
        entries.push((
            ReportKey::VegetationLoss {
                threshold_db: self.vegetation_loss_threshold_db,
            },
            self.vegetation_loss_km2,
        ));
        entries.extend(
            self.unclassifiable_pixels
                .iter()
                .map(|(band, n)| (ReportKey::Unclassifiable(band.clone()), *n as f64)),
        );
        entries
    }

    pub fn flood_area_km2(&self, threshold_db: f32) -> Option<f64> {
        self.flood_areas
            .iter()
            .find(|a| a.threshold_db == threshold_db)
            .map(|a| a.area_km2)
    }

    pub fn vegetation_area_km2(&self, level: SeverityLevel) -> Option<f64> {
        self.vegetation_impact.get(&level).copied()
    }

    pub fn to_json(&self) -> SarResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SarError::Processing(format!("Failed to serialize report: {}", e)))
    }

    pub fn from_json(json: &str) -> SarResult<Self> {
        serde_json::from_str(json).map_err(|e| SarError::InvalidFormat(format!("Invalid report JSON: {}", e)))
    }
}

impl fmt::Display for ChangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Change analysis {} vs {}", self.before, self.after)?;
        for (key, value) in self.entries() {
            writeln!(f, "  {}: {:.4}", key, value)?;
        }
        Ok(())
    }
}

/// Display hints for an external map renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerStyle {
    pub title: String,
    pub band: String,
    pub min: f32,
    pub max: f32,
    pub palette: Vec<String>,
    pub visible: bool,
}

impl LayerStyle {
    pub fn new(title: &str, band: &str, min: f32, max: f32, palette: &[&str], visible: bool) -> Self {
        Self {
            title: title.to_string(),
            band: band.to_string(),
            min,
            max,
            palette: palette.iter().map(|c| c.to_string()).collect(),
            visible,
        }
    }
}

/// Layers shown for a VV/VH change run; only the flood difference is visible by default
pub fn default_layers(flood_band: &str, vegetation_band: &str) -> Vec<LayerStyle> {
    let backscatter = ["black", "white"];
    vec![
        LayerStyle::new(&format!("{} Before (dB)", flood_band), flood_band, -25.0, 0.0, &backscatter, false),
        LayerStyle::new(&format!("{} After (dB)", flood_band), flood_band, -25.0, 0.0, &backscatter, false),
        LayerStyle::new(
            &format!("{} Difference (dB)", flood_band),
            &diff_band_name(flood_band),
            -5.0,
            5.0,
            &["blue", "lightblue", "white", "pink", "red"],
            true,
        ),
        LayerStyle::new(
            &format!("{} Difference (dB)", vegetation_band),
            &diff_band_name(vegetation_band),
            -5.0,
            5.0,
            &["darkgreen", "green", "white", "orange", "red"],
            false,
        ),
        LayerStyle::new(
            "Ratio change",
            &ratio_change_band_name(vegetation_band, flood_band),
            -0.5,
            0.5,
            &["purple", "blue", "white", "yellow", "orange"],
            false,
        ),
    ]
}
