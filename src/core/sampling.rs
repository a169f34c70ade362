//! Regular grid of sample cells covering an AOI at a requested ground scale.
//!
//! The grid is aligned to the source raster origin. Cells are sampled at
//! their centres by nearest neighbour and belong to the AOI when their
//! centre does.

use crate::core::aoi::AreaOfInterest;
use crate::core::geodesy;
use crate::core::raster::{GridSpec, Raster};
use crate::core::tiling::{render, DEFAULT_TILE_SIZE};
use crate::types::{CoordinateSystem, GeoTransform, SarError, SarResult, NO_DATA};

/// Relative tolerance within which a requested scale snaps to the native pixel size
const NATIVE_SNAP_TOLERANCE: f64 = 1e-3;
const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingGrid {
    /// Top-left corner of the first cell
    pub origin_x: f64,
    pub origin_y: f64,
    /// Cell size in CRS units (positive)
    pub step_x: f64,
    pub step_y: f64,
    pub rows: usize,
    pub cols: usize,
    pub coordinate_system: CoordinateSystem,
}

impl SamplingGrid {
    /// Cells at `scale_m` metres covering the AOI's bounding box clipped to the raster extent
    pub fn covering(grid: &GridSpec, aoi: &AreaOfInterest, scale_m: f64) -> SarResult<Self> {
        if !(scale_m > 0.0) || !scale_m.is_finite() {
            return Err(SarError::InvalidParameter(format!("Scale must be positive, got {}", scale_m)));
        }
        if grid.coordinate_system != *aoi.coordinate_system() {
            return Err(SarError::GridMismatch(format!(
                "AOI is in {} but the raster is in {}",
                aoi.coordinate_system(),
                grid.coordinate_system
            )));
        }
        let gt = &grid.geo_transform;
        if !gt.is_north_up() {
            return Err(SarError::InvalidParameter(
                "Sampling requires a north-up geotransform".to_string(),
            ));
        }

        let Some(clip) = grid.extent().intersection(&aoi.bounding_box()) else {
            return Ok(Self {
                origin_x: gt.top_left_x,
                origin_y: gt.top_left_y,
                step_x: gt.pixel_width,
                step_y: gt.pixel_height.abs(),
                rows: 0,
                cols: 0,
                coordinate_system: grid.coordinate_system,
            });
        };

        let (_, center_y) = clip.center();
        let (mut step_x, mut step_y) = geodesy::meters_to_crs_units(&grid.coordinate_system, scale_m, center_y);
        let (native_x, native_y) = (gt.pixel_width, gt.pixel_height.abs());
        if (step_x - native_x).abs() <= NATIVE_SNAP_TOLERANCE * native_x {
            step_x = native_x;
        }
        if (step_y - native_y).abs() <= NATIVE_SNAP_TOLERANCE * native_y {
            step_y = native_y;
        }

        let first_col = ((clip.min_x - gt.top_left_x) / step_x + EDGE_EPSILON).floor();
        let first_row = ((gt.top_left_y - clip.max_y) / step_y + EDGE_EPSILON).floor();
        let origin_x = gt.top_left_x + first_col * step_x;
        let origin_y = gt.top_left_y - first_row * step_y;
        let cols = ((clip.max_x - origin_x) / step_x - EDGE_EPSILON).ceil().max(0.0) as usize;
        let rows = ((origin_y - clip.min_y) / step_y - EDGE_EPSILON).ceil().max(0.0) as usize;

        log::debug!(
            "Sampling grid {}x{} at {:.6} x {:.6} CRS units ({} m)",
            rows,
            cols,
            step_x,
            step_y,
            scale_m
        );

        Ok(Self {
            origin_x,
            origin_y,
            step_x,
            step_y,
            rows,
            cols,
            coordinate_system: grid.coordinate_system,
        })
    }

    /// Number of cells, saturating at `u64::MAX` for absurdly fine scales
    pub fn cell_count(&self) -> u64 {
        (self.rows as u64).saturating_mul(self.cols as u64)
    }

    /// Fails with `PixelBudgetExceeded` when the grid holds more than `max_pixels` cells
    pub fn ensure_within_budget(&self, max_pixels: u64) -> SarResult<()> {
        let required = self.cell_count();
        if required > max_pixels {
            return Err(SarError::PixelBudgetExceeded { required, max_pixels });
        }
        Ok(())
    }

    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.step_x,
            self.origin_y - (row as f64 + 0.5) * self.step_y,
        )
    }

    /// Ground area (m²) of any cell in `row`
    pub fn cell_area_m2(&self, row: usize) -> f64 {
        let (_, y) = self.cell_center(row, 0);
        geodesy::cell_area(&self.coordinate_system, y, self.step_x, self.step_y)
    }

    pub fn geo_transform(&self) -> GeoTransform {
        GeoTransform::north_up(self.origin_x, self.origin_y, self.step_x, self.step_y)
    }

    /// Nearest-neighbour resample of `raster` onto this grid; cells outside
    /// the AOI or the source extent become no-data
    pub fn resample(&self, raster: &Raster, aoi: &AreaOfInterest) -> SarResult<Raster> {
        if self.rows == 0 || self.cols == 0 {
            return Err(SarError::InvalidParameter(
                "The AOI does not overlap the raster".to_string(),
            ));
        }
        let gt = *raster.geo_transform();
        let (src_rows, src_cols) = raster.shape();
        let bands = raster
            .iter()
            .map(|(name, band)| {
                let data = render((self.rows, self.cols), DEFAULT_TILE_SIZE, || (), |_, r, c| {
                    let (x, y) = self.cell_center(r, c);
                    if !aoi.contains(x, y) {
                        return NO_DATA;
                    }
                    let (sr, sc) = gt.locate(x, y);
                    if sr < 0 || sc < 0 || sr as usize >= src_rows || sc as usize >= src_cols {
                        return NO_DATA;
                    }
                    band[[sr as usize, sc as usize]]
                });
                (name.to_string(), data)
            })
            .collect();
        Raster::from_bands(bands, self.geo_transform(), self.coordinate_system)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use ndarray::Array2;

    fn utm_grid(rows: usize, cols: usize) -> GridSpec {
        GridSpec {
            rows,
            cols,
            geo_transform: GeoTransform::north_up(500000.0, 3001000.0, 10.0, 10.0),
            coordinate_system: CoordinateSystem::Projected { epsg: 32646 },
        }
    }

    #[test]
    fn test_native_alignment() {
        let grid = utm_grid(100, 100);
        let aoi = AreaOfInterest::rectangle(
            BoundingBox::new(500100.0, 3000200.0, 500300.0, 3000500.0),
            grid.coordinate_system,
        )
        .unwrap();
        let sampling = SamplingGrid::covering(&grid, &aoi, 10.0).unwrap();
        assert_eq!((sampling.rows, sampling.cols), (30, 20));
        assert_eq!(sampling.origin_x, 500100.0);
        assert_eq!(sampling.origin_y, 3000500.0);
        assert_eq!(sampling.cell_area_m2(0), 100.0);
    }

    #[test]
    fn test_tiny_scale_exceeds_budget() {
        let grid = utm_grid(3, 3);
        let aoi = AreaOfInterest::rectangle(grid.extent(), grid.coordinate_system).unwrap();
        let sampling = SamplingGrid::covering(&grid, &aoi, 1e-9).unwrap();
        assert_eq!(sampling.cell_count(), u64::MAX);
        assert!(matches!(
            sampling.ensure_within_budget(1_000_000),
            Err(SarError::PixelBudgetExceeded { required: u64::MAX, max_pixels: 1_000_000 })
        ));
    }

    #[test]
    fn test_budget_and_clipping() {
        let grid = utm_grid(10, 10);
        let big = AreaOfInterest::point_buffer(500050.0, 3000950.0, 1e6, grid.coordinate_system).unwrap();
        let sampling = SamplingGrid::covering(&grid, &big, 10.0).unwrap();
        assert_eq!(sampling.cell_count(), 100);
        assert!(sampling.ensure_within_budget(100).is_ok());
        assert!(matches!(
            sampling.ensure_within_budget(99),
            Err(SarError::PixelBudgetExceeded { required: 100, max_pixels: 99 })
        ));

        let coarse = SamplingGrid::covering(&grid, &big, 30.0).unwrap();
        assert_eq!((coarse.rows, coarse.cols), (4, 4));
    }

    #[test]
    fn test_crs_mismatch() {
        let grid = utm_grid(10, 10);
        let aoi = AreaOfInterest::point_buffer(93.4, 26.6, 100.0, CoordinateSystem::Geographic).unwrap();
        assert!(matches!(SamplingGrid::covering(&grid, &aoi, 10.0), Err(SarError::GridMismatch(_))));
    }

    #[test]
    fn test_resample_clips_to_aoi() {
        let grid = utm_grid(4, 4);
        let raster = Raster::single_band(
            "VV",
            Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32),
            grid.geo_transform,
            grid.coordinate_system,
        )
        .unwrap();
        let aoi = AreaOfInterest::rectangle(
            BoundingBox::new(500000.0, 3000970.0, 500020.0, 3001000.0),
            grid.coordinate_system,
        )
        .unwrap();
        let sampling = SamplingGrid::covering(&raster.grid(), &aoi, 10.0).unwrap();
        let clipped = sampling.resample(&raster, &aoi).unwrap();
        assert_eq!(clipped.shape(), (3, 2));
        assert_eq!(clipped.band("VV").unwrap()[[2, 1]], 9.0);
    }
}
