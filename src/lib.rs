//! sarchange: Sentinel-1 backscatter change detection
//!
//! Builds before/after median composites from calibrated scenes, suppresses
//! speckle, differences the VV and VH channels, and turns the differences
//! into flood masks, vegetation severity classes and area statistics over
//! an area of interest.

pub mod core;
pub mod io;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    AcquisitionMode, BoundingBox, CoordinateSystem, DateRange, GeoTransform, OrbitPass, Polarization, SarError,
    SarRealImage, SarResult,
};

pub use crate::core::{
    AreaOfInterest, ChangeAnalysis, ChangePipeline, ChangeReport, PipelineContext, Raster, Stage,
};
pub use io::{InMemoryCatalog, RasterSource, Scene, SceneCollection, SceneFilter};
