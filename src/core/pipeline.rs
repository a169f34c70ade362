//! Before/after change analysis as an explicit build-then-execute pipeline.
//!
//! `ChangePipeline::build` validates a `PipelineContext` and records the
//! stage graph without touching any data. `plan` describes the fixed order
//! that `execute` runs the stages in against a `RasterSource`; the graph is
//! not interpreted at run time. The first failing stage aborts the run and is
//! named in the returned `SarError::Stage`.

use crate::core::aoi::AreaOfInterest;
use crate::core::calibrate::{NormalizationParams, RadiometricNormalizer};
use crate::core::change_detection::{diff_band_name, ChangeDetector};
use crate::core::classify::{SeverityLevel, SeverityMap, SeverityScheme, ThresholdClassifier, ThresholdMask, ThresholdSet};
use crate::core::composite::{TemporalCompositor, TemporalReducer};
use crate::core::raster::Raster;
use crate::core::report::{to_km2, ChangeReport, FloodArea};
use crate::core::speckle_filter::{SpeckleFilter, SpeckleFilterParams};
use crate::core::tiling::DEFAULT_TILE_SIZE;
use crate::core::zonal::{Reducer, ZonalAggregator, DEFAULT_MAX_PIXELS};
use crate::io::catalog::{RasterSource, SceneFilter};
use crate::types::{DateRange, Polarization, SarError, SarResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

/// Which side of the event a branch of the pipeline covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Window {
    Before,
    After,
}

impl Window {
    pub const BOTH: [Window; 2] = [Window::Before, Window::After];
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Window::Before => write!(f, "before"),
            Window::After => write!(f, "after"),
        }
    }
}

/// One node kind of the change pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    FetchScenes(Window),
    Normalize(Window),
    Composite(Window),
    Despeckle(Window),
    Difference,
    Classify,
    Aggregate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::FetchScenes(w) => write!(f, "fetch({})", w),
            Stage::Normalize(w) => write!(f, "normalize({})", w),
            Stage::Composite(w) => write!(f, "composite({})", w),
            Stage::Despeckle(w) => write!(f, "despeckle({})", w),
            Stage::Difference => write!(f, "difference"),
            Stage::Classify => write!(f, "classify"),
            Stage::Aggregate => write!(f, "aggregate"),
        }
    }
}

fn default_flood_band() -> String {
    Polarization::VV.band_name().to_string()
}

fn default_vegetation_band() -> String {
    Polarization::VH.band_name().to_string()
}

fn default_flood_thresholds() -> ThresholdSet {
    ThresholdSet::flood_default()
}

fn default_vegetation_loss_threshold() -> f32 {
    -1.0
}

fn default_scale() -> f64 {
    10.0
}

fn default_max_pixels() -> u64 {
    DEFAULT_MAX_PIXELS
}

fn default_tile_size() -> usize {
    DEFAULT_TILE_SIZE
}

/// Everything a run depends on. Constructed once, never mutated by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineContext {
    pub aoi: AreaOfInterest,
    pub before: DateRange,
    pub after: DateRange,
    #[serde(default)]
    pub filter: SceneFilter,
    #[serde(default)]
    pub normalization: NormalizationParams,
    #[serde(default)]
    pub reducer: TemporalReducer,
    #[serde(default)]
    pub speckle: SpeckleFilterParams,
    /// Band whose difference drives flood masks
    #[serde(default = "default_flood_band")]
    pub flood_band: String,
    /// Band whose difference drives vegetation severity
    #[serde(default = "default_vegetation_band")]
    pub vegetation_band: String,
    #[serde(default = "default_flood_thresholds")]
    pub flood_thresholds: ThresholdSet,
    #[serde(default)]
    pub vegetation_bins: SeverityScheme,
    /// Vegetation difference below this many dB counts as loss
    #[serde(default = "default_vegetation_loss_threshold")]
    pub vegetation_loss_threshold: f32,
    /// Ground sample distance for aggregation, metres
    #[serde(default = "default_scale")]
    pub scale: f64,
    #[serde(default = "default_max_pixels")]
    pub max_pixels: u64,
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
}

impl PipelineContext {
    /// Context with default processing parameters
    pub fn new(aoi: AreaOfInterest, before: DateRange, after: DateRange) -> Self {
        Self {
            aoi,
            before,
            after,
            filter: SceneFilter::default(),
            normalization: NormalizationParams::default(),
            reducer: TemporalReducer::default(),
            speckle: SpeckleFilterParams::default(),
            flood_band: default_flood_band(),
            vegetation_band: default_vegetation_band(),
            flood_thresholds: default_flood_thresholds(),
            vegetation_bins: SeverityScheme::default(),
            vegetation_loss_threshold: default_vegetation_loss_threshold(),
            scale: default_scale(),
            max_pixels: default_max_pixels(),
            tile_size: default_tile_size(),
        }
    }

    pub fn from_json_str(json: &str) -> SarResult<Self> {
        let context: Self = serde_json::from_str(json)
            .map_err(|e| SarError::InvalidFormat(format!("Invalid pipeline configuration: {}", e)))?;
        context.validate()?;
        Ok(context)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loaded pipeline configuration from {}", path.as_ref().display());
        Self::from_json_str(&json)
    }

    pub fn range(&self, window: Window) -> &DateRange {
        match window {
            Window::Before => &self.before,
            Window::After => &self.after,
        }
    }

    pub fn validate(&self) -> SarResult<()> {
        self.aoi.validate()?;
        self.before.validate()?;
        self.after.validate()?;
        self.filter.validate()?;
        self.normalization.validate()?;
        self.speckle.validate()?;

        for band in [&self.flood_band, &self.vegetation_band] {
            let polarization: Polarization = band.parse()?;
            if !self.filter.polarizations.contains(&polarization) {
                return Err(SarError::InvalidParameter(format!(
                    "Band {} is not requested by the scene filter {:?}",
                    band, self.filter.polarizations
                )));
            }
        }
        if !self.vegetation_loss_threshold.is_finite() {
            return Err(SarError::InvalidParameter(format!(
                "Vegetation loss threshold must be finite, got {}",
                self.vegetation_loss_threshold
            )));
        }
        if self.flood_thresholds.is_empty() {
            return Err(SarError::InvalidParameter("At least one flood threshold is required".to_string()));
        }
        if !(self.scale > 0.0) || !self.scale.is_finite() {
            return Err(SarError::InvalidParameter(format!("Scale must be positive, got {}", self.scale)));
        }
        if self.max_pixels == 0 || self.tile_size == 0 {
            return Err(SarError::InvalidParameter(
                "max_pixels and tile_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// A node of the stage graph; `inputs` are ids of earlier nodes
#[derive(Debug, Clone, PartialEq)]
pub struct StageNode {
    pub id: usize,
    pub stage: Stage,
    pub inputs: Vec<usize>,
}

/// Outputs of a successful run
#[derive(Debug, Clone)]
pub struct ChangeAnalysis {
    pub before: Raster,
    pub after: Raster,
    pub change: Raster,
    pub flood_masks: Vec<ThresholdMask>,
    pub vegetation: SeverityMap,
    /// Pixels whose vegetation difference falls below the loss threshold
    pub vegetation_loss: ThresholdMask,
    pub report: ChangeReport,
}

/// A validated, not yet executed change analysis
#[derive(Debug, Clone)]
pub struct ChangePipeline {
    context: PipelineContext,
    nodes: Vec<StageNode>,
    normalizer: RadiometricNormalizer,
    compositor: TemporalCompositor,
    speckle: SpeckleFilter,
    detector: ChangeDetector,
    classifier: ThresholdClassifier,
}

impl ChangePipeline {
    /// Validate `context` and lay out the stage graph
    pub fn build(context: PipelineContext) -> SarResult<Self> {
        context.validate()?;

        let normalizer = RadiometricNormalizer::with_params(context.normalization)?;
        let compositor = TemporalCompositor::new(context.reducer).with_tile_size(context.tile_size);
        let speckle = SpeckleFilter::with_params(context.speckle).with_tile_size(context.tile_size);

        let mut bands = vec![context.flood_band.clone()];
        let ratio = if context.vegetation_band != context.flood_band {
            bands.push(context.vegetation_band.clone());
            Some((context.vegetation_band.clone(), context.flood_band.clone()))
        } else {
            None
        };
        let detector = ChangeDetector::new(bands, ratio)?;

        let nodes = Self::layout();
        log::debug!(
            "Built change pipeline with {} stages: {}",
            nodes.len(),
            nodes.iter().map(|n| n.stage.to_string()).collect::<Vec<_>>().join(" -> ")
        );

        Ok(Self {
            context,
            nodes,
            normalizer,
            compositor,
            speckle,
            detector,
            classifier: ThresholdClassifier::new(),
        })
    }

    fn layout() -> Vec<StageNode> {
        let mut nodes: Vec<StageNode> = Vec::new();
        let mut push = |stage: Stage, inputs: Vec<usize>| {
            let id = nodes.len();
            nodes.push(StageNode { id, stage, inputs });
            id
        };

        let fetched: Vec<usize> = Window::BOTH.iter().map(|&w| push(Stage::FetchScenes(w), vec![])).collect();
        let normalized: Vec<usize> = Window::BOTH
            .iter()
            .zip(&fetched)
            .map(|(&w, &input)| push(Stage::Normalize(w), vec![input]))
            .collect();
        let composited: Vec<usize> = Window::BOTH
            .iter()
            .zip(&normalized)
            .map(|(&w, &input)| push(Stage::Composite(w), vec![input]))
            .collect();
        let filtered: Vec<usize> = Window::BOTH
            .iter()
            .zip(&composited)
            .map(|(&w, &input)| push(Stage::Despeckle(w), vec![input]))
            .collect();
        let difference = push(Stage::Difference, filtered);
        let classified = push(Stage::Classify, vec![difference]);
        push(Stage::Aggregate, vec![classified, difference]);
        nodes
    }

    /// Stage graph in execution order
    pub fn plan(&self) -> &[StageNode] {
        &self.nodes
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    fn run<T>(stage: Stage, f: impl FnOnce() -> SarResult<T>) -> SarResult<T> {
        log::debug!("Stage {} started", stage);
        f().map_err(|e| {
            log::warn!("Stage {} failed: {}", stage, e);
            SarError::Stage {
                stage,
                source: Box::new(e),
            }
        })
    }

    /// Run every stage against `source`
    pub fn execute(&self, source: &dyn RasterSource) -> SarResult<ChangeAnalysis> {
        let ctx = &self.context;
        log::info!("Running change analysis {} vs {}", ctx.before, ctx.after);

        let scenes = each_window([(), ()], |window, ()| {
            Self::run(Stage::FetchScenes(window), || {
                let collection = source
                    .query(&ctx.aoi, ctx.range(window), &ctx.filter)
                    .map_err(|e| match e {
                        SarError::EmptyCollection { .. } => SarError::EmptyCollection {
                            window: format!("{} {}", window, ctx.range(window)),
                        },
                        other => other,
                    })?;
                log::info!("{} window: {} scene(s)", window, collection.len());
                Ok(collection)
            })
        })?;
        let scene_counts = [scenes[0].len(), scenes[1].len()];

        let normalized = each_window(scenes, |window, collection| {
            Self::run(Stage::Normalize(window), || self.normalizer.normalize_collection(&collection))
        })?;

        let required = self.detector.required_bands();
        let composites = each_window(normalized, |window, collection| {
            Self::run(Stage::Composite(window), || {
                self.compositor.composite(&collection)?.select(&required)
            })
        })?;

        let [before, after] = each_window(composites, |window, composite| {
            Self::run(Stage::Despeckle(window), || self.speckle.apply(&composite))
        })?;

        let change = Self::run(Stage::Difference, || self.detector.detect(&after, &before))?;

        let flood_diff = diff_band_name(&ctx.flood_band);
        let vegetation_diff = diff_band_name(&ctx.vegetation_band);
        let (flood_masks, vegetation, vegetation_loss) = Self::run(Stage::Classify, || {
            let masks = self
                .classifier
                .classify(&change.select(&[flood_diff.as_str()])?, &ctx.flood_thresholds)?;
            let vegetation_change = change.select(&[vegetation_diff.as_str()])?;
            let severity = self.classifier.classify_severity(&vegetation_change, &ctx.vegetation_bins)?;
            let loss = self
                .classifier
                .classify(&vegetation_change, &ThresholdSet::new(vec![ctx.vegetation_loss_threshold])?)?
                .into_iter()
                .next()
                .ok_or_else(|| SarError::Processing("Vegetation loss produced no mask".to_string()))?;
            Ok((masks, severity, loss))
        })?;

        let report = Self::run(Stage::Aggregate, || {
            self.summarize(&change, &flood_masks, &vegetation, &vegetation_loss, scene_counts)
        })?;
        log::info!("Change analysis complete");

        Ok(ChangeAnalysis {
            before,
            after,
            change,
            flood_masks,
            vegetation,
            vegetation_loss,
            report,
        })
    }

    fn summarize(
        &self,
        change: &Raster,
        flood_masks: &[ThresholdMask],
        vegetation: &SeverityMap,
        vegetation_loss: &ThresholdMask,
        scene_counts: [usize; 2],
    ) -> SarResult<ChangeReport> {
        let ctx = &self.context;
        let areas = ZonalAggregator::new(&[Reducer::Sum], ctx.scale, ctx.max_pixels)?
            .area_weighted(true)
            .with_tile_size(ctx.tile_size);
        let cells = ZonalAggregator::new(&[Reducer::Sum], ctx.scale, ctx.max_pixels)?.with_tile_size(ctx.tile_size);

        let mut flood_areas = Vec::with_capacity(flood_masks.len());
        for entry in flood_masks {
            let area = areas.aggregate_mask(&entry.mask, &ctx.aoi)?.sum.unwrap_or(0.0);
            let pixels = cells.aggregate_mask(&entry.mask, &ctx.aoi)?.sum.unwrap_or(0.0);
            log::info!("Flooded area below {} dB: {:.4} km²", entry.threshold, to_km2(area));
            flood_areas.push(FloodArea {
                threshold_db: entry.threshold,
                area_km2: to_km2(area),
                pixels: pixels.round() as usize,
            });
        }

        let mut vegetation_impact = BTreeMap::new();
        for level in vegetation.scheme().levels().filter(|l| *l != SeverityLevel::Unaffected) {
            let area = areas.aggregate_mask(&vegetation.mask_for(level), &ctx.aoi)?.sum.unwrap_or(0.0);
            log::info!("Vegetation impact {}: {:.4} km²", level, to_km2(area));
            vegetation_impact.insert(level, to_km2(area));
        }

        let loss = areas.aggregate_mask(&vegetation_loss.mask, &ctx.aoi)?.sum.unwrap_or(0.0);
        log::info!(
            "Vegetation loss below {} dB: {:.4} km²",
            vegetation_loss.threshold,
            to_km2(loss)
        );

        let change_statistics = ZonalAggregator::new(
            &[Reducer::Min, Reducer::Max, Reducer::Mean, Reducer::StdDev, Reducer::Count],
            ctx.scale,
            ctx.max_pixels,
        )?
        .with_tile_size(ctx.tile_size)
        .aggregate(change, &ctx.aoi)?;

        let mut unclassifiable_pixels = BTreeMap::new();
        if let Some(first) = flood_masks.first() {
            unclassifiable_pixels.insert(diff_band_name(&ctx.flood_band), first.mask.unclassifiable_count());
        }
        unclassifiable_pixels.insert(vegetation.band().to_string(), vegetation.unclassifiable_count());

        Ok(ChangeReport {
            generated_at: Utc::now(),
            before: ctx.before,
            after: ctx.after,
            before_scenes: scene_counts[0],
            after_scenes: scene_counts[1],
            scale_m: ctx.scale,
            flood_band: ctx.flood_band.clone(),
            flood_areas,
            vegetation_band: ctx.vegetation_band.clone(),
            vegetation_impact,
            vegetation_loss_threshold_db: vegetation_loss.threshold,
            vegetation_loss_km2: to_km2(loss),
            change_statistics,
            unclassifiable_pixels,
        })
    }
}

/// Apply `f` to the before input, then the after input, stopping at the first error
fn each_window<T, U>(inputs: [T; 2], mut f: impl FnMut(Window, T) -> SarResult<U>) -> SarResult<[U; 2]> {
    let [before, after] = inputs;
    let before = f(Window::Before, before)?;
    let after = f(Window::After, after)?;
    Ok([before, after])
}

/// Build and execute in one call
pub fn run_change_analysis(context: PipelineContext, source: &dyn RasterSource) -> SarResult<ChangeAnalysis> {
    ChangePipeline::build(context)?.execute(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BoundingBox, CoordinateSystem};

    fn context() -> PipelineContext {
        PipelineContext::new(
            AreaOfInterest::rectangle(
                BoundingBox::new(500000.0, 3000000.0, 500030.0, 3000030.0),
                CoordinateSystem::Projected { epsg: 32646 },
            )
            .unwrap(),
            DateRange::parse("2023-05-01", "2023-06-01").unwrap(),
            DateRange::parse("2023-07-01", "2023-08-01").unwrap(),
        )
    }

    #[test]
    fn test_plan_is_ordered_dag() {
        let pipeline = ChangePipeline::build(context()).unwrap();
        let plan = pipeline.plan();
        assert_eq!(plan.len(), 11);
        assert_eq!(plan[0].stage, Stage::FetchScenes(Window::Before));
        assert_eq!(plan[1].stage, Stage::FetchScenes(Window::After));
        assert_eq!(plan.last().map(|n| n.stage), Some(Stage::Aggregate));
        for node in plan {
            assert!(node.inputs.iter().all(|&i| i < node.id));
        }
        assert_eq!(plan[8].stage, Stage::Difference);
        assert_eq!(plan[8].inputs, vec![6, 7]);
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::FetchScenes(Window::Before).to_string(), "fetch(before)");
        assert_eq!(Stage::Despeckle(Window::After).to_string(), "despeckle(after)");
        assert_eq!(Stage::Aggregate.to_string(), "aggregate");
    }

    #[test]
    fn test_build_validates_eagerly() {
        let mut ctx = context();
        ctx.scale = 0.0;
        assert!(matches!(ChangePipeline::build(ctx), Err(SarError::InvalidParameter(_))));

        let mut ctx = context();
        ctx.flood_band = "HH".to_string();
        assert!(ChangePipeline::build(ctx).is_err());

        let mut ctx = context();
        ctx.speckle.radius = -1.0;
        assert!(ChangePipeline::build(ctx).is_err());

        let mut ctx = context();
        ctx.vegetation_loss_threshold = f32::NAN;
        assert!(matches!(ChangePipeline::build(ctx), Err(SarError::InvalidParameter(_))));
    }

    #[test]
    fn test_json_config() {
        let json = r#"{
            "aoi": {
                "geometry": { "type": "point_buffer", "x": 500015.0, "y": 3000015.0, "radius_m": 15.0 },
                "coordinate_system": { "Projected": { "epsg": 32646 } }
            },
            "before": { "start": "2023-05-01", "end": "2023-06-01" },
            "after": { "start": "2023-07-01", "end": "2023-08-01" },
            "flood_thresholds": [-1.5, -3.0],
            "scale": 20.0
        }"#;
        let ctx = PipelineContext::from_json_str(json).unwrap();
        assert_eq!(ctx.flood_thresholds.as_slice(), &[-1.5, -3.0]);
        assert_eq!(ctx.scale, 20.0);
        assert_eq!(ctx.flood_band, "VV");
        assert_eq!(ctx.vegetation_loss_threshold, -1.0);
        assert_eq!(ctx.filter, SceneFilter::default());

        let increasing = json.replace("[-1.5, -3.0]", "[-3.0, -1.5]");
        assert!(PipelineContext::from_json_str(&increasing).is_err());
    }
}
