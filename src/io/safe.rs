//! Zipped Sentinel-1 SAFE products as a scene catalog.
//!
//! Only `manifest.safe` is read while scanning a directory. Measurement
//! rasters are loaded on demand, per polarisation, for products that pass
//! the metadata pre-filter.

use crate::core::aoi::AreaOfInterest;
use crate::core::raster::Raster;
use crate::io::catalog::{select_scenes, RasterSource, Scene, SceneCollection, SceneFilter, SceneProperties};
use crate::types::{AcquisitionMode, BoundingBox, DateRange, OrbitPass, Polarization, SarError, SarResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Acquisition metadata from `manifest.safe`
#[derive(Debug, Clone, PartialEq)]
pub struct SafeManifest {
    pub mode: AcquisitionMode,
    pub polarizations: Vec<Polarization>,
    pub orbit_pass: OrbitPass,
    pub start_time: DateTime<Utc>,
    /// Footprint in longitude/latitude
    pub footprint: BoundingBox,
}

impl SafeManifest {
    pub fn parse(xml: &str) -> SarResult<Self> {
        let mut reader = Reader::from_str(xml);
        reader.trim_text(true);

        let mut current = String::new();
        let mut mode = None;
        let mut pass = None;
        let mut start_time = None;
        let mut footprint = None;
        let mut polarizations = Vec::new();

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    current = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                }
                Ok(Event::End(_)) => current.clear(),
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|e| SarError::XmlParsing(format!("Bad text in <{}>: {}", current, e)))?;
                    let text = text.trim();
                    match current.as_str() {
                        "mode" if mode.is_none() => mode = Some(text.parse::<AcquisitionMode>()?),
                        "pass" if pass.is_none() => pass = Some(text.parse::<OrbitPass>()?),
                        "transmitterReceiverPolarisation" => {
                            let pol: Polarization = text.parse()?;
                            if !polarizations.contains(&pol) {
                                polarizations.push(pol);
                            }
                        }
                        "startTime" if start_time.is_none() => start_time = Some(parse_utc(text)?),
                        "coordinates" if footprint.is_none() => footprint = Some(parse_footprint(text)?),
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    return Err(SarError::XmlParsing(format!(
                        "manifest.safe at byte {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
            }
        }

        let missing = |what: &str| SarError::Metadata(format!("manifest.safe has no {}", what));
        if polarizations.is_empty() {
            return Err(missing("polarisation"));
        }
        Ok(Self {
            mode: mode.ok_or_else(|| missing("acquisition mode"))?,
            polarizations,
            orbit_pass: pass.ok_or_else(|| missing("orbit pass"))?,
            start_time: start_time.ok_or_else(|| missing("start time"))?,
            footprint: footprint.ok_or_else(|| missing("footprint"))?,
        })
    }

    pub fn properties(&self) -> SceneProperties {
        SceneProperties {
            mode: self.mode,
            polarizations: self.polarizations.clone(),
            orbit_pass: self.orbit_pass,
        }
    }
}

/// Manifest times carry no zone designator and are UTC
fn parse_utc(text: &str) -> SarResult<DateTime<Utc>> {
    if let Ok(time) = DateTime::parse_from_rfc3339(text) {
        return Ok(time.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text.trim_end_matches('Z'), "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc))
        .map_err(|e| SarError::Metadata(format!("Invalid time '{}': {}", text, e)))
}

/// GML `lat,lon lat,lon ...` to a lon/lat bounding box
fn parse_footprint(text: &str) -> SarResult<BoundingBox> {
    let points = text
        .split_whitespace()
        .map(|pair| {
            let (lat, lon) = pair
                .split_once(',')
                .ok_or_else(|| SarError::Metadata(format!("Bad footprint coordinate '{}'", pair)))?;
            let parse = |v: &str| {
                v.parse::<f64>()
                    .map_err(|e| SarError::Metadata(format!("Bad footprint coordinate '{}': {}", pair, e)))
            };
            Ok((parse(lon)?, parse(lat)?))
        })
        .collect::<SarResult<Vec<(f64, f64)>>>()?;
    BoundingBox::from_points(&points).ok_or_else(|| SarError::Metadata("Empty footprint".to_string()))
}

/// Polarisation encoded in a measurement file name (`...-vv-...`)
fn measurement_polarization(name: &str) -> Option<Polarization> {
    let lower = name.to_lowercase();
    [Polarization::VV, Polarization::VH, Polarization::HV, Polarization::HH]
        .into_iter()
        .find(|p| lower.contains(&format!("-{}-", p.band_name().to_lowercase())))
}

/// A zipped SAFE product
pub struct SafeArchive {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl SafeArchive {
    pub fn open<P: AsRef<Path>>(path: P) -> SarResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let archive = ZipArchive::new(file)
            .map_err(|e| SarError::InvalidFormat(format!("Failed to open ZIP {}: {}", path.display(), e)))?;
        Ok(Self { path, archive })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Product name without the `.zip` / `.SAFE` suffixes
    pub fn product_id(&self) -> String {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        stem.trim_end_matches(".SAFE").to_string()
    }

    pub fn list_files(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }

    fn read_to_string(&mut self, name: &str) -> SarResult<String> {
        let mut entry = self
            .archive
            .by_name(name)
            .map_err(|e| SarError::InvalidFormat(format!("Failed to read {}: {}", name, e)))?;
        let mut content = String::new();
        entry.read_to_string(&mut content)?;
        Ok(content)
    }

    pub fn manifest(&mut self) -> SarResult<SafeManifest> {
        let name = self
            .list_files()
            .into_iter()
            .find(|f| f.ends_with("manifest.safe"))
            .ok_or_else(|| SarError::InvalidFormat(format!("{} has no manifest.safe", self.path.display())))?;
        SafeManifest::parse(&self.read_to_string(&name)?)
    }

    /// Measurement raster entries keyed by polarisation
    pub fn measurement_files(&self) -> BTreeMap<Polarization, String> {
        self.list_files()
            .into_iter()
            .filter(|f| f.contains("measurement/") && (f.ends_with(".tiff") || f.ends_with(".tif")))
            .filter_map(|f| measurement_polarization(&f).map(|p| (p, f)))
            .collect()
    }

    /// Copy one archive entry into `writer`
    pub fn extract_to<W: Write>(&mut self, name: &str, writer: &mut W) -> SarResult<u64> {
        let mut entry = self
            .archive
            .by_name(name)
            .map_err(|e| SarError::InvalidFormat(format!("Failed to access {}: {}", name, e)))?;
        Ok(std::io::copy(&mut entry, writer)?)
    }
}

/// Turns one measurement entry into a single georeferenced band
pub trait MeasurementLoader {
    fn load(&self, archive: &mut SafeArchive, polarization: Polarization, entry: &str) -> SarResult<Raster>;
}

/// Directory of zipped SAFE products
pub struct SafeArchiveCatalog<L: MeasurementLoader> {
    products: Vec<(PathBuf, SafeManifest)>,
    loader: L,
}

impl<L: MeasurementLoader> SafeArchiveCatalog<L> {
    /// Index every `*.zip` in `directory`; unreadable products are skipped with a warning
    pub fn from_directory<P: AsRef<Path>>(directory: P, loader: L) -> SarResult<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(directory.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("zip")))
            .collect();
        paths.sort();

        let mut products = Vec::with_capacity(paths.len());
        for path in paths {
            match SafeArchive::open(&path).and_then(|mut archive| archive.manifest()) {
                Ok(manifest) => products.push((path, manifest)),
                Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
            }
        }
        log::info!(
            "Indexed {} SAFE product(s) in {}",
            products.len(),
            directory.as_ref().display()
        );
        Ok(Self { products, loader })
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    fn candidate(&self, manifest: &SafeManifest, aoi: &AreaOfInterest, range: &DateRange, filter: &SceneFilter) -> bool {
        if !filter.matches(&manifest.properties()) || !range.contains(&manifest.start_time) {
            return false;
        }
        // Footprints are lon/lat; projected AOIs are checked against the loaded raster instead
        !aoi.coordinate_system().is_geographic() || manifest.footprint.intersects(&aoi.bounding_box())
    }

    fn load_scene(&self, path: &Path, manifest: &SafeManifest, filter: &SceneFilter) -> SarResult<Scene> {
        let mut archive = SafeArchive::open(path)?;
        let files = archive.measurement_files();
        let mut bands = Vec::with_capacity(filter.polarizations.len());
        let mut grid = None;
        for pol in &filter.polarizations {
            let entry = files
                .get(pol)
                .ok_or_else(|| SarError::MissingBand(format!("{} in {}", pol, path.display())))?;
            let raster = self.loader.load(&mut archive, *pol, entry)?;
            let (_, data) = raster.sole_band()?;
            bands.push((pol.band_name().to_string(), data.clone()));
            grid.get_or_insert((*raster.geo_transform(), *raster.coordinate_system()));
        }
        let (gt, crs) = grid.ok_or_else(|| SarError::MissingBand(path.display().to_string()))?;
        let raster = Raster::from_bands(bands, gt, crs)?;
        Ok(Scene::new(archive.product_id(), manifest.start_time, manifest.properties(), raster))
    }
}

impl<L: MeasurementLoader> RasterSource for SafeArchiveCatalog<L> {
    fn query(&self, aoi: &AreaOfInterest, range: &DateRange, filter: &SceneFilter) -> SarResult<SceneCollection> {
        let mut scenes = Vec::new();
        for (path, manifest) in &self.products {
            if !self.candidate(manifest, aoi, range, filter) {
                continue;
            }
            match self.load_scene(path, manifest, filter) {
                Ok(scene) => scenes.push(scene),
                Err(e) => log::warn!("Failed to load {}: {}", path.display(), e),
            }
        }
        log::debug!("{} SAFE product(s) loaded for {}", scenes.len(), range);
        select_scenes(&scenes, aoi, range, filter)
    }
}

/// Reads measurement GeoTIFFs through GDAL
#[cfg(feature = "gdal")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalMeasurementLoader;

#[cfg(feature = "gdal")]
impl MeasurementLoader for GdalMeasurementLoader {
    fn load(&self, archive: &mut SafeArchive, polarization: Polarization, entry: &str) -> SarResult<Raster> {
        use tempfile::NamedTempFile;

        let start = std::time::Instant::now();
        let mut temp_file = NamedTempFile::new()?;
        let bytes = archive.extract_to(entry, &mut temp_file)?;
        log::debug!("Extracted {} ({} bytes) in {:?}", entry, bytes, start.elapsed());

        crate::io::export::read_geotiff(temp_file.path(), polarization.band_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<xfdu:XFDU xmlns:xfdu="urn:ccsds:schema:xfdu:1" xmlns:safe="http://www.esa.int/safe/sentinel-1.0"
           xmlns:s1="http://www.esa.int/safe/sentinel-1.0/sentinel-1"
           xmlns:s1sarl1="http://www.esa.int/safe/sentinel-1.0/sentinel-1/sar/level-1"
           xmlns:gml="http://www.opengis.net/gml">
  <metadataSection>
    <metadataObject ID="platform">
      <safe:platform>
        <safe:familyName>SENTINEL-1</safe:familyName>
        <safe:instrument>
          <safe:extension>
            <s1sarl1:instrumentMode><s1sarl1:mode>IW</s1sarl1:mode></s1sarl1:instrumentMode>
          </safe:extension>
        </safe:instrument>
      </safe:platform>
    </metadataObject>
    <metadataObject ID="acquisitionPeriod">
      <safe:acquisitionPeriod>
        <safe:startTime>2023-07-08T11:58:12.345678</safe:startTime>
        <safe:stopTime>2023-07-08T11:58:37.345678</safe:stopTime>
      </safe:acquisitionPeriod>
    </metadataObject>
    <metadataObject ID="measurementOrbitReference">
      <safe:orbitReference>
        <safe:extension><s1:orbitProperties><s1:pass>ASCENDING</s1:pass></s1:orbitProperties></safe:extension>
      </safe:orbitReference>
    </metadataObject>
    <metadataObject ID="generalProductInformation">
      <s1sarl1:standAloneProductInformation>
        <s1sarl1:transmitterReceiverPolarisation>VV</s1sarl1:transmitterReceiverPolarisation>
        <s1sarl1:transmitterReceiverPolarisation>VH</s1sarl1:transmitterReceiverPolarisation>
      </s1sarl1:standAloneProductInformation>
    </metadataObject>
    <metadataObject ID="measurementFrameSet">
      <safe:frameSet><safe:frame><safe:footPrint>
        <gml:coordinates>26.1,92.9 26.5,95.4 28.0,95.1 27.6,92.6</gml:coordinates>
      </safe:footPrint></safe:frame></safe:frameSet>
    </metadataObject>
  </metadataSection>
</xfdu:XFDU>"#;

    #[test]
    fn test_parse_manifest() {
        let manifest = SafeManifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.mode, AcquisitionMode::IW);
        assert_eq!(manifest.orbit_pass, OrbitPass::Ascending);
        assert_eq!(manifest.polarizations, vec![Polarization::VV, Polarization::VH]);
        assert_eq!(
            manifest.start_time.date_naive(),
            Utc.with_ymd_and_hms(2023, 7, 8, 0, 0, 0).unwrap().date_naive()
        );
        assert_eq!(manifest.footprint, BoundingBox::new(92.6, 26.1, 95.4, 28.0));
    }

    #[test]
    fn test_missing_fields() {
        let xml = MANIFEST.replace("<s1:pass>ASCENDING</s1:pass>", "");
        assert!(matches!(SafeManifest::parse(&xml), Err(SarError::Metadata(_))));
    }

    #[test]
    fn test_measurement_names() {
        assert_eq!(
            measurement_polarization("S1A.SAFE/measurement/s1a-iw-grd-vh-20230708t115812-001.tiff"),
            Some(Polarization::VH)
        );
        assert_eq!(measurement_polarization("S1A.SAFE/measurement/readme.txt"), None);
    }
}
