use crate::core::raster::Raster;
use crate::core::statistics::{median_in_place, sorted_mean};
use crate::core::tiling::{render, DEFAULT_TILE_SIZE};
use crate::io::catalog::SceneCollection;
use crate::types::{SarError, SarRealImage, SarResult, NO_DATA};
use serde::{Deserialize, Serialize};

/// Pixel-wise reducer across a scene stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemporalReducer {
    #[default]
    Median,
    Mean,
    Min,
    Max,
}

impl TemporalReducer {
    /// Reduce the valid samples of one pixel; `None` if there are none
    fn reduce(&self, values: &mut [f32]) -> Option<f32> {
        match self {
            TemporalReducer::Median => median_in_place(values),
            TemporalReducer::Mean => sorted_mean(values),
            TemporalReducer::Min => values.iter().copied().reduce(f32::min),
            TemporalReducer::Max => values.iter().copied().reduce(f32::max),
        }
    }
}

/// Reduces a scene collection to one raster per time window
#[derive(Debug, Clone)]
pub struct TemporalCompositor {
    reducer: TemporalReducer,
    tile_size: usize,
}

impl TemporalCompositor {
    pub fn new(reducer: TemporalReducer) -> Self {
        Self {
            reducer,
            tile_size: DEFAULT_TILE_SIZE,
        }
    }

    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size.max(1);
        self
    }

    pub fn reducer(&self) -> TemporalReducer {
        self.reducer
    }

    pub fn composite(&self, collection: &SceneCollection) -> SarResult<Raster> {
        let rasters: Vec<&Raster> = collection.iter().map(|scene| scene.raster()).collect();
        log::info!(
            "Compositing {} scene(s) for {} with {:?}",
            rasters.len(),
            collection.label(),
            self.reducer
        );
        self.composite_rasters(&rasters)
    }

    /// Composite rasters that share one grid.
    ///
    /// Output bands are those present in every input, in the order of the
    /// first. A pixel with no valid observation becomes no-data.
    pub fn composite_rasters(&self, rasters: &[&Raster]) -> SarResult<Raster> {
        let Some(first) = rasters.first() else {
            return Err(SarError::EmptyCollection {
                window: "composite input".to_string(),
            });
        };
        let grid = first.grid();
        for raster in &rasters[1..] {
            grid.ensure_matches(&raster.grid(), "temporal composite")?;
        }

        let common: Vec<&str> = first
            .band_names()
            .iter()
            .map(String::as_str)
            .filter(|name| rasters.iter().all(|r| r.has_band(name)))
            .collect();
        if common.is_empty() {
            return Err(SarError::MissingBand("no band common to all scenes".to_string()));
        }

        let mut bands = Vec::with_capacity(common.len());
        for name in common {
            let stack = rasters
                .iter()
                .map(|r| r.band(name))
                .collect::<SarResult<Vec<&SarRealImage>>>()?;
            log::debug!("Compositing band {} over {} layer(s)", name, stack.len());
            bands.push((name.to_string(), self.reduce_stack(&stack, first.shape())));
        }
        first.derive(bands)
    }

    fn reduce_stack(&self, stack: &[&SarRealImage], shape: (usize, usize)) -> SarRealImage {
        let reducer = self.reducer;
        render(
            shape,
            self.tile_size,
            || Vec::with_capacity(stack.len()),
            |values: &mut Vec<f32>, r, c| {
                values.clear();
                values.extend(stack.iter().map(|band| band[[r, c]]).filter(|v| v.is_finite()));
                reducer.reduce(values).unwrap_or(NO_DATA)
            },
        )
    }
}

impl Default for TemporalCompositor {
    fn default() -> Self {
        Self::new(TemporalReducer::Median)
    }
}

/// Median composite of a collection
pub fn composite(collection: &SceneCollection) -> SarResult<Raster> {
    TemporalCompositor::default().composite(collection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CoordinateSystem, GeoTransform};
    use ndarray::array;

    fn layer(vv: ndarray::Array2<f32>) -> Raster {
        Raster::single_band(
            "VV",
            vv,
            GeoTransform::north_up(0.0, 20.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap()
    }

    #[test]
    fn test_median_ignores_no_data() {
        let nan = f32::NAN;
        let a = layer(array![[1.0, nan], [5.0, nan]]);
        let b = layer(array![[3.0, 2.0], [nan, nan]]);
        let c = layer(array![[2.0, 4.0], [7.0, nan]]);
        let out = TemporalCompositor::default().with_tile_size(1).composite_rasters(&[&a, &b, &c]).unwrap();
        let vv = out.band("VV").unwrap();
        assert_eq!(vv[[0, 0]], 2.0);
        assert_eq!(vv[[0, 1]], 3.0);
        assert_eq!(vv[[1, 0]], 6.0);
        assert!(vv[[1, 1]].is_nan());
    }

    #[test]
    fn test_order_independence() {
        let a = layer(array![[1.0, -4.0]]);
        let b = layer(array![[9.0, 0.5]]);
        let c = layer(array![[-2.0, 3.0]]);
        let d = layer(array![[4.0, 3.5]]);
        for reducer in [TemporalReducer::Median, TemporalReducer::Mean, TemporalReducer::Min, TemporalReducer::Max] {
            let compositor = TemporalCompositor::new(reducer);
            let x = compositor.composite_rasters(&[&a, &b, &c, &d]).unwrap();
            let y = compositor.composite_rasters(&[&d, &c, &b, &a]).unwrap();
            assert_eq!(x.band("VV").unwrap(), y.band("VV").unwrap());
        }
    }

    #[test]
    fn test_mismatched_grids_rejected() {
        let a = layer(array![[1.0, 2.0]]);
        let b = Raster::single_band(
            "VV",
            array![[1.0, 2.0]],
            GeoTransform::north_up(5.0, 20.0, 10.0, 10.0),
            CoordinateSystem::Projected { epsg: 32646 },
        )
        .unwrap();
        let err = TemporalCompositor::default().composite_rasters(&[&a, &b]).unwrap_err();
        assert!(matches!(err, SarError::GridMismatch(_)));
    }
}
