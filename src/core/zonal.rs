//! Reductions of rasters and masks over an AOI.
//!
//! Work is split into tiles of the sampling grid; each tile produces
//! independent partial statistics and partials are merged in tile order.
//! The pixel budget is checked before any sample is read.

use crate::core::aoi::AreaOfInterest;
use crate::core::classify::Mask;
use crate::core::raster::Raster;
use crate::core::sampling::SamplingGrid;
use crate::core::statistics::RunningStats;
use crate::core::tiling::{map_tiles, tile_grid, DEFAULT_TILE_SIZE};
use crate::types::{SarError, SarRealImage, SarResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default pixel budget for a single aggregation
pub const DEFAULT_MAX_PIXELS: u64 = 1_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reducer {
    Sum,
    Min,
    Max,
    Mean,
    /// Population standard deviation
    StdDev,
    Count,
}

impl Reducer {
    /// Sum, min, max, mean and stddev
    pub const SUMMARY: [Reducer; 5] = [Reducer::Sum, Reducer::Min, Reducer::Max, Reducer::Mean, Reducer::StdDev];
}

/// Requested statistics of one band over an AOI. Fields the caller did
/// not ask for, or that are undefined for zero valid samples, are `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ZonalStatistic {
    /// Valid samples inside the AOI
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
}

impl ZonalStatistic {
    fn from_stats(stats: &RunningStats, reducers: &[Reducer]) -> Self {
        let wants = |r: Reducer| reducers.contains(&r);
        Self {
            count: stats.count(),
            sum: wants(Reducer::Sum).then(|| stats.sum()),
            min: if wants(Reducer::Min) { stats.min() } else { None },
            max: if wants(Reducer::Max) { stats.max() } else { None },
            mean: if wants(Reducer::Mean) { stats.mean() } else { None },
            std_dev: if wants(Reducer::StdDev) { stats.std_dev() } else { None },
        }
    }

    pub fn get(&self, reducer: Reducer) -> Option<f64> {
        match reducer {
            Reducer::Sum => self.sum,
            Reducer::Min => self.min,
            Reducer::Max => self.max,
            Reducer::Mean => self.mean,
            Reducer::StdDev => self.std_dev,
            Reducer::Count => Some(self.count as f64),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZonalAggregator {
    reducers: Vec<Reducer>,
    scale: f64,
    max_pixels: u64,
    area_weighted: bool,
    tile_size: usize,
}

impl ZonalAggregator {
    pub fn new(reducers: &[Reducer], scale: f64, max_pixels: u64) -> SarResult<Self> {
        if reducers.is_empty() {
            return Err(SarError::InvalidParameter("At least one reducer is required".to_string()));
        }
        if !(scale > 0.0) || !scale.is_finite() {
            return Err(SarError::InvalidParameter(format!("Scale must be positive, got {}", scale)));
        }
        if max_pixels == 0 {
            return Err(SarError::InvalidParameter("Pixel budget must be positive".to_string()));
        }
        Ok(Self {
            reducers: reducers.to_vec(),
            scale,
            max_pixels,
            area_weighted: false,
            tile_size: DEFAULT_TILE_SIZE,
        })
    }

    /// Multiply every sample by its cell's ground area (m²) before reducing
    pub fn area_weighted(mut self, weighted: bool) -> Self {
        self.area_weighted = weighted;
        self
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn aggregate(&self, raster: &Raster, aoi: &AreaOfInterest) -> SarResult<BTreeMap<String, ZonalStatistic>> {
        let sampling = SamplingGrid::covering(&raster.grid(), aoi, self.scale)?;
        sampling.ensure_within_budget(self.max_pixels)?;
        log::debug!(
            "Aggregating {} band(s) over {} cell(s){}",
            raster.band_count(),
            sampling.cell_count(),
            if self.area_weighted { ", area weighted" } else { "" }
        );

        let bands: Vec<&SarRealImage> = raster.iter().map(|(_, band)| band).collect();
        let stats = self.reduce(&bands, raster, &sampling, aoi);
        Ok(raster
            .band_names()
            .iter()
            .zip(stats.iter())
            .map(|(name, s)| (name.clone(), ZonalStatistic::from_stats(s, &self.reducers)))
            .collect())
    }

    /// Statistics of a mask rasterised as 1 (flagged) / 0 / no-data
    pub fn aggregate_mask(&self, mask: &Mask, aoi: &AreaOfInterest) -> SarResult<ZonalStatistic> {
        let raster = mask.to_raster()?;
        self.aggregate(&raster, aoi)?
            .remove(mask.name())
            .ok_or_else(|| SarError::MissingBand(mask.name().to_string()))
    }

    fn reduce(
        &self,
        bands: &[&SarRealImage],
        raster: &Raster,
        sampling: &SamplingGrid,
        aoi: &AreaOfInterest,
    ) -> Vec<RunningStats> {
        let gt = *raster.geo_transform();
        let (src_rows, src_cols) = raster.shape();
        let tiles = tile_grid((sampling.rows, sampling.cols), self.tile_size);

        let partials = map_tiles(&tiles, |tile| {
            let mut stats = vec![RunningStats::new(); bands.len()];
            for r in tile.row_range() {
                let weight = if self.area_weighted { sampling.cell_area_m2(r) } else { 1.0 };
                for c in tile.col_range() {
                    let (x, y) = sampling.cell_center(r, c);
                    if !aoi.contains(x, y) {
                        continue;
                    }
                    let (sr, sc) = gt.locate(x, y);
                    if sr < 0 || sc < 0 || sr as usize >= src_rows || sc as usize >= src_cols {
                        continue;
                    }
                    for (acc, band) in stats.iter_mut().zip(bands) {
                        let v = band[[sr as usize, sc as usize]];
                        if v.is_finite() {
                            acc.push(v as f64 * weight);
                        }
                    }
                }
            }
            stats
        });

        partials.into_iter().fold(vec![RunningStats::new(); bands.len()], |mut total, partial| {
            for (acc, p) in total.iter_mut().zip(&partial) {
                acc.merge(p);
            }
            total
        })
    }
}

/// Reduce every band of `raster` over `aoi` at `scale` metres
pub fn aggregate(
    raster: &Raster,
    aoi: &AreaOfInterest,
    reducers: &[Reducer],
    scale: f64,
    max_pixels: u64,
) -> SarResult<BTreeMap<String, ZonalStatistic>> {
    ZonalAggregator::new(reducers, scale, max_pixels)?.aggregate(raster, aoi)
}

/// Ground area (m²) of the flagged pixels of `mask` inside `aoi`
pub fn masked_area(mask: &Mask, aoi: &AreaOfInterest, scale: f64, max_pixels: u64) -> SarResult<f64> {
    let stat = ZonalAggregator::new(&[Reducer::Sum], scale, max_pixels)?
        .area_weighted(true)
        .aggregate_mask(mask, aoi)?;
    Ok(stat.sum.unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classify::{classify, ThresholdSet};
    use crate::types::{BoundingBox, CoordinateSystem, GeoTransform};
    use approx::assert_relative_eq;
    use ndarray::{array, Array2};

    fn utm(data: Array2<f32>) -> Raster {
        Raster::single_band(
            "VV_diff",
            data,
            GeoTransform::north_up(500000.0, 3000030.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap()
    }

    fn full_aoi(raster: &Raster) -> AreaOfInterest {
        AreaOfInterest::rectangle(raster.extent(), *raster.coordinate_system()).unwrap()
    }

    #[test]
    fn test_sub_nanometre_scale_hits_budget() {
        let raster = utm(Array2::zeros((3, 3)));
        let err = aggregate(&raster, &full_aoi(&raster), &[Reducer::Sum], 1e-9, 1_000_000).unwrap_err();
        assert!(matches!(err, SarError::PixelBudgetExceeded { max_pixels: 1_000_000, .. }));
    }

    #[test]
    fn test_summary_statistics() {
        let raster = utm(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
        let stats = aggregate(&raster, &full_aoi(&raster), &Reducer::SUMMARY, 10.0, 1_000).unwrap();
        let s = &stats["VV_diff"];
        assert_eq!(s.count, 9);
        assert_eq!(s.sum, Some(45.0));
        assert_eq!(s.min, Some(1.0));
        assert_eq!(s.max, Some(9.0));
        assert_relative_eq!(s.mean.unwrap(), 5.0);
        assert_relative_eq!(s.std_dev.unwrap(), (60.0f64 / 9.0).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_no_data_excluded_from_denominators() {
        let nan = f32::NAN;
        let with_gaps = utm(array![[1.0, nan, 3.0], [nan, 5.0, nan], [nan, nan, nan]]);
        let stats = aggregate(&with_gaps, &full_aoi(&with_gaps), &[Reducer::Mean, Reducer::StdDev], 10.0, 1_000).unwrap();
        let s = &stats["VV_diff"];
        assert_eq!(s.count, 3);
        assert_relative_eq!(s.mean.unwrap(), 3.0);
        assert_relative_eq!(s.std_dev.unwrap(), (8.0f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_eq!(s.sum, None);
    }

    #[test]
    fn test_single_changed_pixel_area() {
        let band = |data: Array2<f32>| {
            Raster::single_band(
                "VV",
                data,
                GeoTransform::north_up(500000.0, 3000030.0, 10.0, 10.0),
                CoordinateSystem::Projected { epsg: 32646 },
            )
            .unwrap()
        };
        let after = band(array![[-10.0, -10.0, -10.0], [-10.0, -10.0, -10.0], [-10.0, -10.0, -12.0]]);
        let before = band(Array2::from_elem((3, 3), -10.0));
        let diff = crate::core::change_detection::difference(&after, &before, "VV").unwrap();
        let masks = classify(&diff, &ThresholdSet::new(vec![-1.0]).unwrap()).unwrap();
        assert_eq!(masks[0].mask.count(), 1);
        let area = masked_area(&masks[0].mask, &full_aoi(&diff), 10.0, 1_000).unwrap();
        assert_relative_eq!(area, 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_all_true_mask_equals_aoi_area() {
        let raster = Raster::single_band(
            "flag",
            Array2::from_elem((100, 100), -5.0),
            GeoTransform::north_up(500000.0, 3001000.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap();
        let aoi = AreaOfInterest::rectangle(
            BoundingBox::new(500100.0, 3000200.0, 500300.0, 3000500.0),
            *raster.coordinate_system(),
        )
        .unwrap();
        let masks = classify(&raster, &ThresholdSet::new(vec![0.0]).unwrap()).unwrap();
        let area = masked_area(&masks[0].mask, &aoi, 10.0, 1_000_000).unwrap();
        assert_relative_eq!(area, aoi.area_m2(), max_relative = 1e-9);

        let none = classify(&raster, &ThresholdSet::new(vec![-10.0]).unwrap()).unwrap();
        assert_eq!(masked_area(&none[0].mask, &aoi, 10.0, 1_000_000).unwrap(), 0.0);
    }

    #[test]
    fn test_geographic_area_weighting() {
        // Square-on-the-ground cells centred on 60N: area must follow the ellipsoid
        use crate::core::geodesy::{meters_per_degree_lat, meters_per_degree_lon, quadrangle_area};
        let ph = 0.01 * meters_per_degree_lon(60.0) / meters_per_degree_lat(60.0);
        let raster = Raster::single_band(
            "flag",
            Array2::from_elem((10, 10), 1.0),
            GeoTransform::north_up(10.0, 60.0 + 5.0 * ph, 0.01, ph),
            CoordinateSystem::Geographic,
        )
        .unwrap();
        let aoi = AreaOfInterest::rectangle(raster.extent(), CoordinateSystem::Geographic).unwrap();
        let cell_width_m = 0.01 * meters_per_degree_lon(60.0);
        let stats = ZonalAggregator::new(&[Reducer::Sum], cell_width_m, 1_000)
            .unwrap()
            .area_weighted(true)
            .aggregate(&raster, &aoi)
            .unwrap();
        assert_eq!(stats["flag"].count, 100);
        let expected = quadrangle_area(60.0 - 5.0 * ph, 60.0 + 5.0 * ph, 0.1);
        assert_relative_eq!(stats["flag"].sum.unwrap(), expected, max_relative = 1e-6);
    }

    #[test]
    fn test_budget_exceeded_before_reading() {
        let raster = utm(Array2::zeros((3, 3)));
        let err = aggregate(&raster, &full_aoi(&raster), &[Reducer::Sum], 10.0, 8).unwrap_err();
        assert!(matches!(err, SarError::PixelBudgetExceeded { required: 9, max_pixels: 8 }));
    }

    #[test]
    fn test_tiling_does_not_change_result() {
        let data = Array2::from_shape_fn((37, 41), |(r, c)| ((r * 7 + c * 3) % 11) as f32 - 5.0);
        let raster = Raster::single_band(
            "VV_diff",
            data,
            GeoTransform::north_up(500000.0, 3001000.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap();
        let aoi = full_aoi(&raster);
        let small = ZonalAggregator::new(&Reducer::SUMMARY, 10.0, 10_000).unwrap().with_tile_size(5);
        let large = ZonalAggregator::new(&Reducer::SUMMARY, 10.0, 10_000).unwrap();
        let a = &small.aggregate(&raster, &aoi).unwrap()["VV_diff"];
        let b = &large.aggregate(&raster, &aoi).unwrap()["VV_diff"];
        assert_eq!(a.count, b.count);
        assert_relative_eq!(a.sum.unwrap(), b.sum.unwrap(), epsilon = 1e-9);
        assert_relative_eq!(a.mean.unwrap(), b.mean.unwrap(), epsilon = 1e-12);
        assert_relative_eq!(a.std_dev.unwrap(), b.std_dev.unwrap(), epsilon = 1e-12);
    }
}
