//! Monthly composites and per-pixel linear trends.

use crate::core::aoi::AreaOfInterest;
use crate::core::calibrate::RadiometricNormalizer;
use crate::core::composite::TemporalCompositor;
use crate::core::raster::Raster;
use crate::core::speckle_filter::SpeckleFilter;
use crate::core::tiling::{render, DEFAULT_TILE_SIZE};
use crate::io::catalog::{RasterSource, SceneFilter};
use crate::types::{DateRange, SarError, SarRealImage, SarResult, NO_DATA};

/// Trend slope band, units per day
pub const SLOPE_BAND: &str = "scale";
/// Trend intercept band, at the first sample time
pub const OFFSET_BAND: &str = "offset";

/// One despeckled composite per calendar month of `range`.
///
/// Months with no matching scenes are skipped; any other error aborts.
pub fn monthly_composites(
    source: &dyn RasterSource,
    aoi: &AreaOfInterest,
    range: &DateRange,
    filter: &SceneFilter,
    normalizer: &RadiometricNormalizer,
    compositor: &TemporalCompositor,
    speckle: &SpeckleFilter,
) -> SarResult<Vec<(DateRange, Raster)>> {
    let mut series = Vec::new();
    for month in range.monthly() {
        let scenes = match source.query(aoi, &month, filter) {
            Ok(scenes) => scenes,
            Err(SarError::EmptyCollection { window }) => {
                log::warn!("No scenes for {}; month skipped", window);
                continue;
            }
            Err(e) => return Err(e),
        };
        let normalized = normalizer.normalize_collection(&scenes)?;
        let composite = compositor.composite(&normalized)?;
        series.push((month, speckle.apply(&composite)?));
    }
    log::info!("Built {} monthly composite(s) for {}", series.len(), range);
    Ok(series)
}

/// Places each composite at its window midpoint, in days since the epoch
pub fn trend_series(composites: &[(DateRange, Raster)]) -> Vec<(f64, &Raster)> {
    composites
        .iter()
        .map(|(window, raster)| (window.midpoint_days(), raster))
        .collect()
}

/// Least-squares line through each pixel's valid samples.
///
/// `series` pairs a time (days) with a raster; all rasters share one grid.
/// Output bands are `scale` (slope per day) and `offset` (value at the
/// earliest time). Pixels with fewer than two valid samples, or with all
/// samples at one time, are no-data.
pub fn linear_trend(series: &[(f64, &Raster)], band: &str) -> SarResult<Raster> {
    let Some((_, first)) = series.first() else {
        return Err(SarError::InvalidParameter("Trend needs at least one raster".to_string()));
    };
    for (_, raster) in &series[1..] {
        first.grid().ensure_matches(&raster.grid(), "linear trend")?;
    }
    if series.iter().any(|(t, _)| !t.is_finite()) {
        return Err(SarError::InvalidParameter("Trend sample times must be finite".to_string()));
    }

    let t0 = series.iter().map(|(t, _)| *t).fold(f64::INFINITY, f64::min);
    let samples: Vec<(f64, &SarRealImage)> = series
        .iter()
        .map(|(t, raster)| Ok((t - t0, raster.band(band)?)))
        .collect::<SarResult<_>>()?;

    let fit = |r: usize, c: usize| -> Option<(f64, f64)> {
        let (mut n, mut st, mut sy, mut stt, mut sty) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (t, data) in &samples {
            let y = data[[r, c]];
            if y.is_finite() {
                let y = y as f64;
                n += 1.0;
                st += t;
                sy += y;
                stt += t * t;
                sty += t * y;
            }
        }
        let denominator = n * stt - st * st;
        if n < 2.0 || denominator.abs() < 1e-12 {
            return None;
        }
        let slope = (n * sty - st * sy) / denominator;
        Some((slope, (sy - slope * st) / n))
    };

    let shape = first.shape();
    let slope = render(shape, DEFAULT_TILE_SIZE, || (), |_, r, c| {
        fit(r, c).map_or(NO_DATA, |(s, _)| s as f32)
    });
    let offset = render(shape, DEFAULT_TILE_SIZE, || (), |_, r, c| {
        fit(r, c).map_or(NO_DATA, |(_, o)| o as f32)
    });
    first.derive(vec![(SLOPE_BAND.to_string(), slope), (OFFSET_BAND.to_string(), offset)])
}
