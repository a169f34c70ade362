//! Change detection processing stages

pub mod aoi;
pub mod calibrate;
pub mod change_detection;
pub mod classify;
pub mod composite;
pub mod geodesy;
pub mod impact;
pub mod pipeline;
pub mod raster;
pub mod report;
pub mod sampling;
pub mod speckle_filter;
pub mod statistics;
pub mod tiling;
pub mod trend;
pub mod zonal;

// Re-export main types
pub use aoi::{AreaOfInterest, Geometry};
pub use calibrate::{NormalizationParams, RadiometricNormalizer};
pub use change_detection::{
    change_composite, difference, normalized_difference, pauli_change, pauli_components, ratio_change, ChangeDetector,
};
pub use classify::{
    classify, Mask, SeverityLevel, SeverityMap, SeverityScheme, ThresholdClassifier, ThresholdMask, ThresholdSet,
};
pub use composite::{TemporalCompositor, TemporalReducer};
pub use impact::{exposure, landcover_impact, LandcoverClass};
pub use pipeline::{ChangeAnalysis, ChangePipeline, PipelineContext, Stage, StageNode, Window};
pub use raster::{GridSpec, Raster};
pub use report::{default_layers, ChangeReport, LayerStyle, ReportKey};
pub use sampling::SamplingGrid;
pub use speckle_filter::{focal_median, KernelShape, KernelUnits, SpeckleFilter, SpeckleFilterParams, SpeckleFilterType};
pub use trend::{linear_trend, monthly_composites, trend_series};
pub use zonal::{aggregate, masked_area, Reducer, ZonalAggregator, ZonalStatistic};
