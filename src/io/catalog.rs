//! Scene catalog abstraction and the predicates used to query it.

use crate::core::aoi::AreaOfInterest;
use crate::core::raster::Raster;
use crate::types::{AcquisitionMode, BoundingBox, DateRange, OrbitPass, Polarization, SarError, SarResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Catalog properties used for filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneProperties {
    pub mode: AcquisitionMode,
    pub polarizations: Vec<Polarization>,
    pub orbit_pass: OrbitPass,
}

/// One acquisition. Immutable once fetched.
#[derive(Debug, Clone)]
pub struct Scene {
    id: String,
    acquired: DateTime<Utc>,
    properties: SceneProperties,
    raster: Raster,
}

impl Scene {
    pub fn new(
        id: impl Into<String>,
        acquired: DateTime<Utc>,
        properties: SceneProperties,
        raster: Raster,
    ) -> Self {
        Self {
            id: id.into(),
            acquired,
            properties,
            raster,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn acquired(&self) -> &DateTime<Utc> {
        &self.acquired
    }

    pub fn properties(&self) -> &SceneProperties {
        &self.properties
    }

    pub fn raster(&self) -> &Raster {
        &self.raster
    }

    pub fn footprint(&self) -> BoundingBox {
        self.raster.extent()
    }

    /// Same acquisition carrying a derived raster
    pub(crate) fn with_raster(&self, raster: Raster) -> Scene {
        Scene {
            id: self.id.clone(),
            acquired: self.acquired,
            properties: self.properties.clone(),
            raster,
        }
    }
}

/// Equality and list-contains predicates for a catalog query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneFilter {
    /// Acquisition mode must equal this value
    pub mode: AcquisitionMode,
    /// Scene polarization list must contain every entry
    pub polarizations: Vec<Polarization>,
    /// Orbit pass must equal this value
    pub orbit_pass: OrbitPass,
}

impl Default for SceneFilter {
    fn default() -> Self {
        Self {
            mode: AcquisitionMode::IW,
            polarizations: vec![Polarization::VV, Polarization::VH],
            orbit_pass: OrbitPass::Ascending,
        }
    }
}

impl SceneFilter {
    pub fn validate(&self) -> SarResult<()> {
        if self.polarizations.is_empty() {
            return Err(SarError::InvalidParameter(
                "Scene filter needs at least one polarization".to_string(),
            ));
        }
        Ok(())
    }

    pub fn matches(&self, properties: &SceneProperties) -> bool {
        properties.mode == self.mode
            && properties.orbit_pass == self.orbit_pass
            && self
                .polarizations
                .iter()
                .all(|p| properties.polarizations.contains(p))
    }
}

/// Non-empty set of scenes satisfying one query
#[derive(Debug, Clone)]
pub struct SceneCollection {
    label: String,
    scenes: Vec<Scene>,
}

impl SceneCollection {
    /// Fails with `EmptyCollection` when `scenes` is empty
    pub fn from_scenes(scenes: Vec<Scene>, label: impl Into<String>) -> SarResult<Self> {
        let label = label.into();
        if scenes.is_empty() {
            return Err(SarError::EmptyCollection { window: label });
        }
        Ok(Self { label, scenes })
    }

    /// Query window this collection answers, used in messages
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scene> {
        self.scenes.iter()
    }

    pub fn scenes(&self) -> &[Scene] {
        &self.scenes
    }
}

/// A catalog of acquisitions that can be queried by space, time and properties
pub trait RasterSource {
    /// Scenes intersecting `aoi`, acquired within `range`, and matching `filter`.
    ///
    /// Returns `EmptyCollection` when nothing matches.
    fn query(&self, aoi: &AreaOfInterest, range: &DateRange, filter: &SceneFilter) -> SarResult<SceneCollection>;
}

/// Whether `scene` satisfies every query predicate
pub fn scene_matches(scene: &Scene, aoi: &AreaOfInterest, range: &DateRange, filter: &SceneFilter) -> bool {
    if !filter.matches(scene.properties()) || !range.contains(scene.acquired()) {
        return false;
    }
    if scene.raster().coordinate_system() != aoi.coordinate_system() {
        log::warn!(
            "Scene {} is in {} but the AOI is in {}; skipping",
            scene.id(),
            scene.raster().coordinate_system(),
            aoi.coordinate_system()
        );
        return false;
    }
    if !scene.footprint().intersects(&aoi.bounding_box()) {
        return false;
    }
    let missing: Vec<&Polarization> = filter
        .polarizations
        .iter()
        .filter(|p| !scene.raster().has_band(p.band_name()))
        .collect();
    if !missing.is_empty() {
        log::warn!("Scene {} lacks band(s) {:?}; skipping", scene.id(), missing);
        return false;
    }
    true
}

/// Apply the query predicates to candidate scenes
pub fn select_scenes<'a, I>(
    candidates: I,
    aoi: &AreaOfInterest,
    range: &DateRange,
    filter: &SceneFilter,
) -> SarResult<SceneCollection>
where
    I: IntoIterator<Item = &'a Scene>,
{
    let mut scenes: Vec<Scene> = candidates
        .into_iter()
        .filter(|scene| scene_matches(scene, aoi, range, filter))
        .cloned()
        .collect();
    scenes.sort_by(|a, b| a.acquired().cmp(b.acquired()).then_with(|| a.id().cmp(b.id())));
    log::info!("Query {} matched {} scene(s)", range, scenes.len());
    SceneCollection::from_scenes(scenes, range.to_string())
}

/// Catalog backed by scenes already in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    scenes: Vec<Scene>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scene: Scene) {
        self.scenes.push(scene);
    }

    pub fn len(&self) -> usize {
        self.scenes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenes.is_empty()
    }
}

impl FromIterator<Scene> for InMemoryCatalog {
    fn from_iter<I: IntoIterator<Item = Scene>>(iter: I) -> Self {
        Self {
            scenes: iter.into_iter().collect(),
        }
    }
}

impl RasterSource for InMemoryCatalog {
    fn query(&self, aoi: &AreaOfInterest, range: &DateRange, filter: &SceneFilter) -> SarResult<SceneCollection> {
        select_scenes(&self.scenes, aoi, range, filter)
    }
}
