//! Area of interest: a point buffer or polygon tied to a coordinate system.

use crate::core::geodesy::{meters_per_degree_lat, meters_per_degree_lon};
use crate::types::{BoundingBox, CoordinateSystem, SarError, SarResult};
use serde::{Deserialize, Serialize};

/// AOI shape, in the units of the AOI's coordinate system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Geometry {
    /// Disc of `radius_m` metres around (x, y)
    PointBuffer { x: f64, y: f64, radius_m: f64 },
    /// Simple polygon; the ring may or may not repeat its first vertex
    Polygon { exterior: Vec<[f64; 2]> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaOfInterest {
    geometry: Geometry,
    coordinate_system: CoordinateSystem,
}

impl AreaOfInterest {
    pub fn new(geometry: Geometry, coordinate_system: CoordinateSystem) -> SarResult<Self> {
        let aoi = Self {
            geometry,
            coordinate_system,
        };
        aoi.validate()?;
        Ok(aoi)
    }

    pub fn point_buffer(x: f64, y: f64, radius_m: f64, coordinate_system: CoordinateSystem) -> SarResult<Self> {
        Self::new(Geometry::PointBuffer { x, y, radius_m }, coordinate_system)
    }

    pub fn polygon(exterior: Vec<[f64; 2]>, coordinate_system: CoordinateSystem) -> SarResult<Self> {
        Self::new(Geometry::Polygon { exterior }, coordinate_system)
    }

    pub fn rectangle(bbox: BoundingBox, coordinate_system: CoordinateSystem) -> SarResult<Self> {
        Self::polygon(
            vec![
                [bbox.min_x, bbox.min_y],
                [bbox.max_x, bbox.min_y],
                [bbox.max_x, bbox.max_y],
                [bbox.min_x, bbox.max_y],
            ],
            coordinate_system,
        )
    }

    pub fn validate(&self) -> SarResult<()> {
        match &self.geometry {
            Geometry::PointBuffer { x, y, radius_m } => {
                if !x.is_finite() || !y.is_finite() {
                    return Err(SarError::InvalidParameter("AOI centre must be finite".to_string()));
                }
                if !(*radius_m > 0.0) || !radius_m.is_finite() {
                    return Err(SarError::InvalidParameter(format!(
                        "AOI buffer radius must be positive, got {}",
                        radius_m
                    )));
                }
                if self.coordinate_system.is_geographic() && y.abs() >= 90.0 {
                    return Err(SarError::InvalidParameter(format!("AOI latitude {} out of range", y)));
                }
            }
            Geometry::Polygon { exterior } => {
                let distinct = self.ring().len();
                if distinct < 3 {
                    return Err(SarError::InvalidParameter(format!(
                        "AOI polygon needs at least 3 distinct vertices, got {}",
                        distinct
                    )));
                }
                if exterior.iter().flatten().any(|v| !v.is_finite()) {
                    return Err(SarError::InvalidParameter("AOI polygon has non-finite vertices".to_string()));
                }
                if self.area_m2() <= 0.0 {
                    return Err(SarError::InvalidParameter("AOI polygon is degenerate".to_string()));
                }
            }
        }
        Ok(())
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    pub fn coordinate_system(&self) -> &CoordinateSystem {
        &self.coordinate_system
    }

    /// Polygon ring without a repeated closing vertex
    fn ring(&self) -> &[[f64; 2]] {
        match &self.geometry {
            Geometry::Polygon { exterior } => match (exterior.first(), exterior.last()) {
                (Some(first), Some(last)) if exterior.len() > 1 && first == last => &exterior[..exterior.len() - 1],
                _ => exterior.as_slice(),
            },
            Geometry::PointBuffer { .. } => &[],
        }
    }

    /// Buffer radius in CRS units along (x, y)
    fn buffer_half_extent(&self, y: f64, radius_m: f64) -> (f64, f64) {
        if self.coordinate_system.is_geographic() {
            (radius_m / meters_per_degree_lon(y), radius_m / meters_per_degree_lat(y))
        } else {
            (radius_m, radius_m)
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match &self.geometry {
            Geometry::PointBuffer { x, y, radius_m } => {
                let (hx, hy) = self.buffer_half_extent(*y, *radius_m);
                BoundingBox::new(x - hx, y - hy, x + hx, y + hy)
            }
            Geometry::Polygon { .. } => {
                let points: Vec<(f64, f64)> = self.ring().iter().map(|p| (p[0], p[1])).collect();
                BoundingBox::from_points(&points).unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 0.0, 0.0))
            }
        }
    }

    /// Whether the point lies inside the AOI.
    ///
    /// Geographic buffers are evaluated on the local tangent plane at the
    /// centre, which stays within the bounding box by construction.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        match &self.geometry {
            Geometry::PointBuffer { x, y, radius_m } => {
                let (hx, hy) = self.buffer_half_extent(*y, *radius_m);
                let u = (px - x) / hx;
                let v = (py - y) / hy;
                u * u + v * v <= 1.0
            }
            Geometry::Polygon { .. } => {
                let ring = self.ring();
                if ring.len() < 3 {
                    return false;
                }
                let mut inside = false;
                let mut j = ring.len() - 1;
                for i in 0..ring.len() {
                    let (xi, yi) = (ring[i][0], ring[i][1]);
                    let (xj, yj) = (ring[j][0], ring[j][1]);
                    if (yi > py) != (yj > py) && px < (xj - xi) * (py - yi) / (yj - yi) + xi {
                        inside = !inside;
                    }
                    j = i;
                }
                inside
            }
        }
    }

    /// Ground area in m², planar for polygons (geographic rings are
    /// projected onto the tangent plane at their centre)
    pub fn area_m2(&self) -> f64 {
        match &self.geometry {
            Geometry::PointBuffer { radius_m, .. } => std::f64::consts::PI * radius_m * radius_m,
            Geometry::Polygon { .. } => {
                let ring = self.ring();
                let (sx, sy) = if self.coordinate_system.is_geographic() {
                    let (_, cy) = self.bounding_box().center();
                    (meters_per_degree_lon(cy), meters_per_degree_lat(cy))
                } else {
                    (1.0, 1.0)
                };
                let twice: f64 = ring
                    .iter()
                    .zip(ring.iter().cycle().skip(1))
                    .map(|(a, b)| a[0] * sx * b[1] * sy - b[0] * sx * a[1] * sy)
                    .sum();
                twice.abs() / 2.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geographic_point_buffer() {
        // 25 km around a point in the Brahmaputra valley
        let aoi = AreaOfInterest::point_buffer(93.4, 26.6, 25_000.0, CoordinateSystem::Geographic).unwrap();
        let bbox = aoi.bounding_box();
        assert!(bbox.width() > bbox.height());
        assert!(aoi.contains(93.4, 26.6));
        assert!(aoi.contains(93.4, 26.6 + 0.2));
        assert!(!aoi.contains(93.4, 26.6 + 0.3));
        assert!(!aoi.contains(bbox.max_x, bbox.max_y));
        assert_relative_eq!(aoi.area_m2(), std::f64::consts::PI * 625e6, max_relative = 1e-12);
    }

    #[test]
    fn test_polygon_containment_and_area() {
        let crs = CoordinateSystem::Projected { epsg: 32646 };
        let aoi = AreaOfInterest::rectangle(BoundingBox::new(0.0, 0.0, 200.0, 300.0), crs).unwrap();
        assert!(aoi.contains(100.0, 150.0));
        assert!(!aoi.contains(250.0, 150.0));
        assert_relative_eq!(aoi.area_m2(), 60_000.0);

        let closed = AreaOfInterest::polygon(
            vec![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [0.0, 0.0]],
            crs,
        )
        .unwrap();
        assert_relative_eq!(closed.area_m2(), 50.0);
        assert!(closed.contains(2.0, 2.0));
        assert!(!closed.contains(8.0, 8.0));
    }

    #[test]
    fn test_invalid_geometries() {
        let crs = CoordinateSystem::Projected { epsg: 32646 };
        assert!(AreaOfInterest::point_buffer(0.0, 0.0, 0.0, crs).is_err());
        assert!(AreaOfInterest::polygon(vec![[0.0, 0.0], [1.0, 1.0]], crs).is_err());
        assert!(AreaOfInterest::polygon(vec![[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]], crs).is_err());
    }

    #[test]
    fn test_aoi_from_json() {
        let json = r#"{"geometry": {"type": "point_buffer", "x": 93.4, "y": 26.6, "radius_m": 25000.0},
                       "coordinate_system": "Geographic"}"#;
        let aoi: AreaOfInterest = serde_json::from_str(json).unwrap();
        assert!(aoi.validate().is_ok());
        assert!(aoi.coordinate_system().is_geographic());
    }
}
