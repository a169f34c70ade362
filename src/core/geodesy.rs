//! WGS84 helpers for turning grid geometry into ground distances and areas.
//!
//! Geographic grids have cells whose ground size shrinks with latitude, so
//! conversions between metres and degrees are always evaluated at a latitude.

use crate::types::{CoordinateSystem, GeoTransform};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;

fn eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

/// Prime vertical radius of curvature N(φ)
pub fn prime_vertical_radius(lat_deg: f64) -> f64 {
    let sin_lat = lat_deg.to_radians().sin();
    WGS84_A / (1.0 - eccentricity_squared() * sin_lat * sin_lat).sqrt()
}

/// Meridional radius of curvature M(φ)
pub fn meridian_radius(lat_deg: f64) -> f64 {
    let e2 = eccentricity_squared();
    let sin_lat = lat_deg.to_radians().sin();
    WGS84_A * (1.0 - e2) / (1.0 - e2 * sin_lat * sin_lat).powf(1.5)
}

/// Ground length of one degree of longitude at `lat_deg`
pub fn meters_per_degree_lon(lat_deg: f64) -> f64 {
    prime_vertical_radius(lat_deg) * lat_deg.to_radians().cos() * 1f64.to_radians()
}

/// Ground length of one degree of latitude at `lat_deg`
pub fn meters_per_degree_lat(lat_deg: f64) -> f64 {
    meridian_radius(lat_deg) * 1f64.to_radians()
}

/// Authalic latitude term q(φ) used by the exact zone-area formula
fn authalic_q(lat_deg: f64) -> f64 {
    let e2 = eccentricity_squared();
    let e = e2.sqrt();
    let s = lat_deg.to_radians().sin();
    s / (1.0 - e2 * s * s) + (1.0 / (2.0 * e)) * ((1.0 + e * s) / (1.0 - e * s)).ln()
}

/// Exact ellipsoidal area (m²) of the quadrangle between two parallels
/// spanning `dlon_deg` of longitude.
pub fn quadrangle_area(lat_a_deg: f64, lat_b_deg: f64, dlon_deg: f64) -> f64 {
    let b = WGS84_A * (1.0 - WGS84_F);
    let lat_a = lat_a_deg.clamp(-90.0, 90.0);
    let lat_b = lat_b_deg.clamp(-90.0, 90.0);
    (dlon_deg.to_radians() * b * b / 2.0 * (authalic_q(lat_b) - authalic_q(lat_a))).abs()
}

/// Latitude of a Web Mercator northing
pub fn mercator_latitude(northing: f64) -> f64 {
    (northing / WGS84_A).sinh().atan().to_degrees()
}

/// Ground area of a cell centred on northing/latitude `y` with sizes (dx, dy) in CRS units
pub fn cell_area(crs: &CoordinateSystem, y: f64, dx: f64, dy: f64) -> f64 {
    let (dx, dy) = (dx.abs(), dy.abs());
    match crs {
        CoordinateSystem::Geographic => quadrangle_area(y - dy / 2.0, y + dy / 2.0, dx),
        CoordinateSystem::Projected { epsg: 3857 } => {
            let scale = mercator_latitude(y).to_radians().cos();
            dx * dy * scale * scale
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Radar => dx * dy,
    }
}

/// Ground size (metres) of one pixel as (width, height), evaluated at latitude `y`
/// for geographic grids and at the northing `y` for Web Mercator.
pub fn pixel_size_meters(crs: &CoordinateSystem, gt: &GeoTransform, y: f64) -> (f64, f64) {
    let (w, h) = (gt.pixel_width.abs(), gt.pixel_height.abs());
    match crs {
        CoordinateSystem::Geographic => (w * meters_per_degree_lon(y), h * meters_per_degree_lat(y)),
        CoordinateSystem::Projected { epsg: 3857 } => {
            let scale = mercator_latitude(y).to_radians().cos();
            (w * scale, h * scale)
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Radar => (w, h),
    }
}

/// Convert a ground distance in metres into CRS units along (x, y) at `y`
pub fn meters_to_crs_units(crs: &CoordinateSystem, meters: f64, y: f64) -> (f64, f64) {
    match crs {
        CoordinateSystem::Geographic => (meters / meters_per_degree_lon(y), meters / meters_per_degree_lat(y)),
        CoordinateSystem::Projected { epsg: 3857 } => {
            let scale = mercator_latitude(y).to_radians().cos();
            (meters / scale, meters / scale)
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Radar => (meters, meters),
    }
}
