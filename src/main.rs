//! Command-line change analysis over a directory of zipped SAFE products.
//!
//! Usage: sarchange <config.json> <safe-directory> [export-directory]

use anyhow::{bail, Context, Result};
use sarchange::core::change_detection::diff_band_name;
use sarchange::io::{ExportRequest, GdalMeasurementLoader, GeoTiffExporter, RasterExporter, SafeArchiveCatalog};
use sarchange::{ChangePipeline, PipelineContext};
use std::path::PathBuf;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.len() < 2 || args.len() > 3 {
        bail!("usage: sarchange <config.json> <safe-directory> [export-directory]");
    }
    let config = PathBuf::from(&args[0]);
    let products = PathBuf::from(&args[1]);

    let context = PipelineContext::from_file(&config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    let pipeline = ChangePipeline::build(context).context("Invalid pipeline configuration")?;

    let catalog = SafeArchiveCatalog::from_directory(&products, GdalMeasurementLoader)
        .with_context(|| format!("Failed to index {}", products.display()))?;
    if catalog.is_empty() {
        bail!("No readable SAFE products in {}", products.display());
    }

    let analysis = pipeline.execute(&catalog).context("Change analysis failed")?;
    println!("{}", analysis.report.to_json()?);

    if let Some(directory) = args.get(2) {
        let ctx = pipeline.context();
        let exporter = GeoTiffExporter::new(directory).with_compression("DEFLATE");
        let change = ExportRequest::new("change", ctx.aoi.clone(), ctx.scale, ctx.max_pixels);
        let path = exporter.export(&analysis.change, &change)?;
        log::info!("Change raster written to {}", path.display());

        let primary = analysis
            .flood_masks
            .iter()
            .find(|m| m.threshold == -2.0)
            .or_else(|| analysis.flood_masks.first());
        if let Some(entry) = primary {
            let request = ExportRequest::new(
                format!("{}_flood_{}db", diff_band_name(&ctx.flood_band), entry.threshold),
                ctx.aoi.clone(),
                ctx.scale,
                ctx.max_pixels,
            );
            let path = exporter.export(&entry.mask.to_raster()?, &request)?;
            log::info!("Flood mask written to {}", path.display());
        }
    }
    Ok(())
}
