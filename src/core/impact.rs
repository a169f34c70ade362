//! Impact summaries that combine a change mask with an auxiliary layer.

use crate::core::aoi::AreaOfInterest;
use crate::core::classify::Mask;
use crate::core::raster::Raster;
use crate::core::zonal::{Reducer, ZonalAggregator};
use crate::types::{SarError, SarResult, NO_DATA};
use ndarray::Zip;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// ESA WorldCover land cover classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LandcoverClass {
    TreeCover,
    Shrubland,
    Grassland,
    Cropland,
    BuiltUp,
    BareSparseVegetation,
    SnowAndIce,
    PermanentWater,
    HerbaceousWetland,
    Mangroves,
    MossAndLichen,
}

impl LandcoverClass {
    pub const ALL: [LandcoverClass; 11] = [
        LandcoverClass::TreeCover,
        LandcoverClass::Shrubland,
        LandcoverClass::Grassland,
        LandcoverClass::Cropland,
        LandcoverClass::BuiltUp,
        LandcoverClass::BareSparseVegetation,
        LandcoverClass::SnowAndIce,
        LandcoverClass::PermanentWater,
        LandcoverClass::HerbaceousWetland,
        LandcoverClass::Mangroves,
        LandcoverClass::MossAndLichen,
    ];

    pub fn code(&self) -> u8 {
        match self {
            LandcoverClass::TreeCover => 10,
            LandcoverClass::Shrubland => 20,
            LandcoverClass::Grassland => 30,
            LandcoverClass::Cropland => 40,
            LandcoverClass::BuiltUp => 50,
            LandcoverClass::BareSparseVegetation => 60,
            LandcoverClass::SnowAndIce => 70,
            LandcoverClass::PermanentWater => 80,
            LandcoverClass::HerbaceousWetland => 90,
            LandcoverClass::Mangroves => 95,
            LandcoverClass::MossAndLichen => 100,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|class| class.code() == code)
    }

    pub fn label(&self) -> &'static str {
        match self {
            LandcoverClass::TreeCover => "Tree cover",
            LandcoverClass::Shrubland => "Shrubland",
            LandcoverClass::Grassland => "Grassland",
            LandcoverClass::Cropland => "Cropland",
            LandcoverClass::BuiltUp => "Built-up",
            LandcoverClass::BareSparseVegetation => "Bare / sparse vegetation",
            LandcoverClass::SnowAndIce => "Snow and ice",
            LandcoverClass::PermanentWater => "Permanent water bodies",
            LandcoverClass::HerbaceousWetland => "Herbaceous wetland",
            LandcoverClass::Mangroves => "Mangroves",
            LandcoverClass::MossAndLichen => "Moss and lichen",
        }
    }
}

impl fmt::Display for LandcoverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn ensure_same_grid(mask: &Mask, layer: &Raster, what: &str) -> SarResult<()> {
    if mask.shape() != layer.shape()
        || mask.coordinate_system() != layer.coordinate_system()
        || !mask.geo_transform().approx_eq(layer.geo_transform())
    {
        return Err(SarError::GridMismatch(format!(
            "{} layer does not share the grid of mask '{}'",
            what,
            mask.name()
        )));
    }
    Ok(())
}

/// Flagged area (m²) per land cover class.
///
/// `landcover` is a single-band raster of WorldCover codes on the mask's
/// grid. Classes without affected pixels are omitted; unknown codes are
/// ignored.
pub fn landcover_impact(
    mask: &Mask,
    landcover: &Raster,
    aoi: &AreaOfInterest,
    scale: f64,
    max_pixels: u64,
) -> SarResult<BTreeMap<LandcoverClass, f64>> {
    ensure_same_grid(mask, landcover, "land cover")?;
    let (_, codes) = landcover.sole_band()?;

    let bands = LandcoverClass::ALL
        .iter()
        .map(|class| {
            let code = class.code() as f32;
            let data = Zip::from(mask.values())
                .and(mask.unclassifiable())
                .and(codes)
                .map_collect(|&flag, &nodata, &value| {
                    if nodata || !value.is_finite() {
                        NO_DATA
                    } else if flag && value == code {
                        1.0
                    } else {
                        0.0
                    }
                });
            (format!("{:?}", class), data)
        })
        .collect();
    let layers = landcover.derive(bands)?;

    let stats = ZonalAggregator::new(&[Reducer::Sum], scale, max_pixels)?
        .area_weighted(true)
        .aggregate(&layers, aoi)?;

    let mut impact = BTreeMap::new();
    for class in LandcoverClass::ALL {
        let area = stats
            .get(&format!("{:?}", class))
            .and_then(|s| s.sum)
            .unwrap_or(0.0);
        if area > 0.0 {
            log::debug!("{}: {:.1} m² affected", class, area);
            impact.insert(class, area);
        }
    }
    Ok(impact)
}

/// Sum of `weights` (e.g. population counts) over flagged pixels inside the AOI
pub fn exposure(
    mask: &Mask,
    weights: &Raster,
    aoi: &AreaOfInterest,
    scale: f64,
    max_pixels: u64,
) -> SarResult<f64> {
    ensure_same_grid(mask, weights, "weight")?;
    let (_, values) = weights.sole_band()?;
    let exposed = Zip::from(mask.values())
        .and(mask.unclassifiable())
        .and(values)
        .map_collect(|&flag, &nodata, &w| {
            if nodata || !w.is_finite() {
                NO_DATA
            } else if flag {
                w
            } else {
                0.0
            }
        });
    let layer = weights.derive(vec![("exposed".to_string(), exposed)])?;
    let stats = ZonalAggregator::new(&[Reducer::Sum], scale, max_pixels)?.aggregate(&layer, aoi)?;
    Ok(stats.get("exposed").and_then(|s| s.sum).unwrap_or(0.0))
}
