use chrono::{DateTime, Datelike, NaiveDate, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::pipeline::Stage;

/// Real-valued backscatter sample (linear intensity or dB)
pub type SarReal = f32;

/// 2D real-valued band (rows x cols)
pub type SarRealImage = Array2<SarReal>;

/// No-data sentinel carried through every band
pub const NO_DATA: SarReal = f32::NAN;

/// A sample is valid when it is finite; NaN and infinities are no-data.
#[inline]
pub fn is_valid(value: SarReal) -> bool {
    value.is_finite()
}

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Native image geometry, pixel spacing taken as metres
    Radar,
    /// Geographic coordinates (longitude, latitude) on WGS84
    Geographic,
    /// Projected coordinates (e.g., UTM)
    Projected { epsg: u32 },
}

impl CoordinateSystem {
    pub fn is_geographic(&self) -> bool {
        matches!(self, CoordinateSystem::Geographic)
    }

    /// EPSG code, if the system has one
    pub fn epsg(&self) -> Option<u32> {
        match self {
            CoordinateSystem::Radar => None,
            CoordinateSystem::Geographic => Some(4326),
            CoordinateSystem::Projected { epsg } => Some(*epsg),
        }
    }

    pub fn from_epsg(epsg: u32) -> Self {
        if epsg == 4326 {
            CoordinateSystem::Geographic
        } else {
            CoordinateSystem::Projected { epsg }
        }
    }
}

impl fmt::Display for CoordinateSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.epsg() {
            Some(code) => write!(f, "EPSG:{}", code),
            None => write!(f, "RADAR"),
        }
    }
}

impl FromStr for CoordinateSystem {
    type Err = SarError;

    fn from_str(s: &str) -> SarResult<Self> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("radar") {
            return Ok(CoordinateSystem::Radar);
        }
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        code.parse::<u32>()
            .map(CoordinateSystem::from_epsg)
            .map_err(|_| SarError::InvalidParameter(format!("Unrecognised CRS: {}", s)))
    }
}

/// Polarization modes for Sentinel-1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
    HV,
    HH,
}

impl Polarization {
    /// Band name used for this channel in rasters
    pub fn band_name(&self) -> &'static str {
        match self {
            Polarization::VV => "VV",
            Polarization::VH => "VH",
            Polarization::HV => "HV",
            Polarization::HH => "HH",
        }
    }
}

impl fmt::Display for Polarization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.band_name())
    }
}

impl FromStr for Polarization {
    type Err = SarError;

    fn from_str(s: &str) -> SarResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "VV" => Ok(Polarization::VV),
            "VH" => Ok(Polarization::VH),
            "HV" => Ok(Polarization::HV),
            "HH" => Ok(Polarization::HH),
            other => Err(SarError::InvalidParameter(format!("Invalid polarization: {}", other))),
        }
    }
}

/// Sentinel-1 acquisition mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionMode {
    IW, // Interferometric Wide swath
    EW, // Extra Wide swath
    SM, // StripMap
    WV, // Wave
}

impl fmt::Display for AcquisitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AcquisitionMode::IW => "IW",
            AcquisitionMode::EW => "EW",
            AcquisitionMode::SM => "SM",
            AcquisitionMode::WV => "WV",
        };
        f.write_str(name)
    }
}

impl FromStr for AcquisitionMode {
    type Err = SarError;

    fn from_str(s: &str) -> SarResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "IW" => Ok(AcquisitionMode::IW),
            "EW" => Ok(AcquisitionMode::EW),
            // Stripmap products report their beam (S1..S6) as the mode
            "SM" | "S1" | "S2" | "S3" | "S4" | "S5" | "S6" => Ok(AcquisitionMode::SM),
            "WV" => Ok(AcquisitionMode::WV),
            other => Err(SarError::InvalidParameter(format!("Invalid acquisition mode: {}", other))),
        }
    }
}

/// Orbit direction of the platform during acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrbitPass {
    Ascending,
    Descending,
}

impl fmt::Display for OrbitPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbitPass::Ascending => f.write_str("ASCENDING"),
            OrbitPass::Descending => f.write_str("DESCENDING"),
        }
    }
}

impl FromStr for OrbitPass {
    type Err = SarError;

    fn from_str(s: &str) -> SarResult<Self> {
        match s.trim().to_uppercase().as_str() {
            "ASCENDING" => Ok(OrbitPass::Ascending),
            "DESCENDING" => Ok(OrbitPass::Descending),
            other => Err(SarError::InvalidParameter(format!("Invalid orbit pass: {}", other))),
        }
    }
}

/// Axis-aligned bounding box in the units of its coordinate system
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x: min_x.min(max_x),
            min_y: min_y.min(max_y),
            max_x: min_x.max(max_x),
            max_y: min_y.max(max_y),
        }
    }

    /// Smallest box containing all points; `None` for an empty slice
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        Some(rest.iter().fold(Self::new(x0, y0, x0, y0), |b, &(x, y)| Self {
            min_x: b.min_x.min(x),
            min_y: b.min_y.min(y),
            max_x: b.max_x.max(x),
            max_y: b.max_y.max(y),
        }))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn center(&self) -> (f64, f64) {
        ((self.min_x + self.max_x) / 2.0, (self.min_y + self.max_y) / 2.0)
    }

    /// True when the two boxes share interior area
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_x < other.max_x
            && other.min_x < self.max_x
            && self.min_y < other.max_y
            && other.min_y < self.max_y
    }

    pub fn intersection(&self, other: &BoundingBox) -> Option<BoundingBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BoundingBox {
            min_x: self.min_x.max(other.min_x),
            min_y: self.min_y.max(other.min_y),
            max_x: self.max_x.min(other.max_x),
            max_y: self.max_y.min(other.max_y),
        })
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

/// Geospatial transformation parameters (GDAL affine convention)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform; `pixel_height` is given as a positive size
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(coefficients: [f64; 6]) -> Self {
        Self {
            top_left_x: coefficients[0],
            pixel_width: coefficients[1],
            rotation_x: coefficients[2],
            top_left_y: coefficients[3],
            rotation_y: coefficients[4],
            pixel_height: coefficients[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_width > 0.0 && self.pixel_height < 0.0
    }

    /// Coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Pixel containing (x, y) for a north-up transform, possibly outside the grid
    pub fn locate(&self, x: f64, y: f64) -> (i64, i64) {
        let col = ((x - self.top_left_x) / self.pixel_width).floor() as i64;
        let row = ((y - self.top_left_y) / self.pixel_height).floor() as i64;
        (row, col)
    }

    /// Extent of a (rows, cols) grid under this transform
    pub fn extent(&self, shape: (usize, usize)) -> BoundingBox {
        let (rows, cols) = (shape.0 as f64, shape.1 as f64);
        let corners = [
            (self.top_left_x, self.top_left_y),
            (self.top_left_x + cols * self.pixel_width, self.top_left_y + cols * self.rotation_y),
            (self.top_left_x + rows * self.rotation_x, self.top_left_y + rows * self.pixel_height),
            (
                self.top_left_x + cols * self.pixel_width + rows * self.rotation_x,
                self.top_left_y + cols * self.rotation_y + rows * self.pixel_height,
            ),
        ];
        BoundingBox::from_points(&corners).unwrap_or_else(|| BoundingBox::new(0.0, 0.0, 0.0, 0.0))
    }

    /// Coefficient-wise comparison with a tolerance relative to pixel size
    pub fn approx_eq(&self, other: &GeoTransform) -> bool {
        let tolerance = 1e-6 * self.pixel_width.abs().max(self.pixel_height.abs()).max(f64::MIN_POSITIVE);
        self.to_gdal()
            .iter()
            .zip(other.to_gdal().iter())
            .all(|(a, b)| (a - b).abs() <= tolerance)
    }
}

/// Half-open calendar window `[start, end)` in UTC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> SarResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    /// Parse two `YYYY-MM-DD` dates
    pub fn parse(start: &str, end: &str) -> SarResult<Self> {
        let parse = |s: &str| {
            NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
                .map_err(|e| SarError::InvalidParameter(format!("Invalid date '{}': {}", s, e)))
        };
        Self::new(parse(start)?, parse(end)?)
    }

    pub fn validate(&self) -> SarResult<()> {
        if self.start >= self.end {
            return Err(SarError::InvalidParameter(format!(
                "Date range {} must end after it starts",
                self
            )));
        }
        Ok(())
    }

    pub fn contains(&self, time: &DateTime<Utc>) -> bool {
        let day = time.date_naive();
        day >= self.start && day < self.end
    }

    /// Calendar-month windows covering this range, clipped to its bounds
    pub fn monthly(&self) -> Vec<DateRange> {
        let mut windows = Vec::new();
        let mut cursor = self.start;
        while cursor < self.end {
            let (year, month) = if cursor.month() == 12 {
                (cursor.year() + 1, 1)
            } else {
                (cursor.year(), cursor.month() + 1)
            };
            let next_month = NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(self.end);
            let end = next_month.min(self.end);
            windows.push(DateRange { start: cursor, end });
            cursor = end;
        }
        windows
    }

    /// Midpoint in days since the Unix epoch, used as the time axis of trends
    pub fn midpoint_days(&self) -> f64 {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(self.start);
        let start = (self.start - epoch).num_days() as f64;
        let end = (self.end - epoch).num_days() as f64;
        (start + end) / 2.0
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Error types for change detection processing
#[derive(Debug, thiserror::Error)]
pub enum SarError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("XML parsing error: {0}")]
    XmlParsing(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Band '{0}' not found")]
    MissingBand(String),

    #[error("No scenes matched the query for window {window}")]
    EmptyCollection { window: String },

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Invalid threshold order: {0}")]
    InvalidThresholdOrder(String),

    #[error("Aggregation needs {required} pixels, over the budget of {max_pixels}")]
    PixelBudgetExceeded { required: u64, max_pixels: u64 },

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<SarError>,
    },

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

impl SarError {
    /// Innermost error, looking through stage wrappers
    pub fn root_cause(&self) -> &SarError {
        match self {
            SarError::Stage { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Stage that failed, if the error came out of a pipeline run
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            SarError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Result type for change detection operations
pub type SarResult<T> = Result<T, SarError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_enum_parsing() {
        assert_eq!("vv".parse::<Polarization>().unwrap(), Polarization::VV);
        assert_eq!("IW".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::IW);
        assert_eq!("S3".parse::<AcquisitionMode>().unwrap(), AcquisitionMode::SM);
        assert_eq!("ASCENDING".parse::<OrbitPass>().unwrap(), OrbitPass::Ascending);
        assert!("XX".parse::<Polarization>().is_err());
        assert_eq!("EPSG:32646".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Projected { epsg: 32646 });
        assert_eq!("EPSG:4326".parse::<CoordinateSystem>().unwrap(), CoordinateSystem::Geographic);
    }

    #[test]
    fn test_date_range_is_end_exclusive() {
        let range = DateRange::parse("2024-05-01", "2024-05-30").unwrap();
        assert!(range.contains(&Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
        assert!(range.contains(&Utc.with_ymd_and_hms(2024, 5, 29, 23, 59, 59).unwrap()));
        assert!(!range.contains(&Utc.with_ymd_and_hms(2024, 5, 30, 0, 0, 0).unwrap()));
        assert!(DateRange::parse("2024-05-30", "2024-05-01").is_err());
    }

    #[test]
    fn test_monthly_windows() {
        let range = DateRange::parse("2023-11-15", "2024-02-10").unwrap();
        let months = range.monthly();
        assert_eq!(months.len(), 4);
        assert_eq!(months[0].start, NaiveDate::from_ymd_opt(2023, 11, 15).unwrap());
        assert_eq!(months[1].start, NaiveDate::from_ymd_opt(2023, 12, 1).unwrap());
        assert_eq!(months[2].end, NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(months[3].end, range.end);
    }

    #[test]
    fn test_geotransform_pixel_center_and_extent() {
        let gt = GeoTransform::north_up(500000.0, 3000030.0, 10.0, 10.0);
        assert_eq!(gt.pixel_center(0, 0), (500005.0, 3000025.0));
        assert_eq!(gt.locate(500015.0, 3000005.0), (2, 1));
        let extent = gt.extent((3, 3));
        assert_eq!(extent, BoundingBox::new(500000.0, 3000000.0, 500030.0, 3000030.0));
        assert!(gt.is_north_up());
    }

    #[test]
    fn test_stage_error_root_cause() {
        let err = SarError::Stage {
            stage: Stage::Difference,
            source: Box::new(SarError::GridMismatch("shape".into())),
        };
        assert!(matches!(err.root_cause(), SarError::GridMismatch(_)));
        assert_eq!(err.failed_stage(), Some(Stage::Difference));
        assert!(err.to_string().contains("difference"));
    }
}
