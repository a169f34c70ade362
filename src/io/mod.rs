//! Scene catalogs and raster export

pub mod catalog;
pub mod export;
pub mod safe;

pub use catalog::{InMemoryCatalog, RasterSource, Scene, SceneCollection, SceneFilter, SceneProperties};
pub use export::{ExportRequest, RasterExporter};
pub use safe::{MeasurementLoader, SafeArchive, SafeArchiveCatalog, SafeManifest};

#[cfg(feature = "gdal")]
pub use export::{read_geotiff, GeoTiffExporter};
#[cfg(feature = "gdal")]
pub use safe::GdalMeasurementLoader;
