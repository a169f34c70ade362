//! Python bindings over numpy arrays.
//!
//! Arrays are wrapped as single-band rasters on a north-up grid with the
//! given pixel size, so kernel radii in metres behave as in the pipeline.

use crate::core::calibrate;
use crate::core::classify::{SeverityLevel, SeverityScheme, ThresholdClassifier, ThresholdSet};
use crate::core::raster::Raster;
use crate::core::speckle_filter::{self, KernelShape, KernelUnits};
use crate::types::{CoordinateSystem, GeoTransform, SarError};
use numpy::{PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use pyo3::types::PyList;

/// Convert PyReadonlyArray2 to ndarray Array2
fn numpy_to_array2<T>(arr: PyReadonlyArray2<T>) -> ndarray::Array2<T>
where
    T: Copy + numpy::Element,
{
    arr.as_array().to_owned()
}

fn to_py_err(e: SarError) -> PyErr {
    PyValueError::new_err(e.to_string())
}

fn wrap(name: &str, data: PyReadonlyArray2<f32>, pixel_size: f64) -> PyResult<Raster> {
    let rows = data.as_array().nrows() as f64;
    Raster::single_band(
        name,
        numpy_to_array2(data),
        GeoTransform::north_up(0.0, rows * pixel_size, pixel_size, pixel_size),
        CoordinateSystem::Radar,
    )
    .map_err(to_py_err)
}

/// 10*log10(max(x * scale_factor, epsilon)), NaN preserved
#[pyfunction]
#[pyo3(signature = (data, scale_factor = 1.0, epsilon = 1e-5))]
fn to_decibel(py: Python, data: PyReadonlyArray2<f32>, scale_factor: f32, epsilon: f32) -> PyResult<PyObject> {
    let raster = wrap("band", data, 1.0)?;
    let db = calibrate::to_decibel(&raster, scale_factor, epsilon).map_err(to_py_err)?;
    let (_, band) = db.sole_band().map_err(to_py_err)?;
    Ok(band.to_pyarray(py).into())
}

/// Focal median; `shape` is "circle" or "square", `units` is "meters" or "pixels"
#[pyfunction]
#[pyo3(signature = (data, radius, pixel_size = 10.0, shape = "circle", units = "meters"))]
fn focal_median(
    py: Python,
    data: PyReadonlyArray2<f32>,
    radius: f64,
    pixel_size: f64,
    shape: &str,
    units: &str,
) -> PyResult<PyObject> {
    let shape = match shape.to_lowercase().as_str() {
        "circle" => KernelShape::Circle,
        "square" => KernelShape::Square,
        other => return Err(PyValueError::new_err(format!("Unknown kernel shape: {}", other))),
    };
    let units = match units.to_lowercase().as_str() {
        "meters" | "metres" => KernelUnits::Meters,
        "pixels" => KernelUnits::Pixels,
        other => return Err(PyValueError::new_err(format!("Unknown kernel units: {}", other))),
    };
    let raster = wrap("band", data, pixel_size)?;
    let filtered = speckle_filter::focal_median(&raster, radius, shape, units).map_err(to_py_err)?;
    let (_, band) = filtered.sole_band().map_err(to_py_err)?;
    Ok(band.to_pyarray(py).into())
}

/// List of (threshold, bool mask) for strictly decreasing thresholds
#[pyfunction]
fn threshold_masks(py: Python, diff: PyReadonlyArray2<f32>, thresholds: Vec<f32>) -> PyResult<PyObject> {
    let thresholds = ThresholdSet::new(thresholds).map_err(to_py_err)?;
    let raster = wrap("diff", diff, 1.0)?;
    let masks = ThresholdClassifier::new()
        .classify(&raster, &thresholds)
        .map_err(to_py_err)?;

    let result = PyList::empty(py);
    for entry in masks {
        result.append((entry.threshold, entry.mask.values().to_pyarray(py)))?;
    }
    Ok(result.into())
}

/// Severity codes (0 unaffected .. 3 severe, NaN unclassifiable).
///
/// `bounds` lists (level, upper bound) pairs in increasing severity; the
/// default is light [-1, 0), moderate [-2, -1), severe below -2.
#[pyfunction]
#[pyo3(signature = (diff, bounds = None))]
fn severity_classes(py: Python, diff: PyReadonlyArray2<f32>, bounds: Option<Vec<(String, f32)>>) -> PyResult<PyObject> {
    let scheme = match bounds {
        Some(bounds) => {
            let pairs = bounds
                .iter()
                .map(|(name, upper)| Ok((name.parse::<SeverityLevel>()?, *upper)))
                .collect::<Result<Vec<_>, SarError>>()
                .map_err(to_py_err)?;
            SeverityScheme::from_upper_bounds(&pairs).map_err(to_py_err)?
        }
        None => SeverityScheme::default(),
    };
    let raster = wrap("diff", diff, 1.0)?;
    let severity = ThresholdClassifier::new()
        .classify_severity(&raster, &scheme)
        .and_then(|map| map.to_raster())
        .map_err(to_py_err)?;
    let (_, codes) = severity.sole_band().map_err(to_py_err)?;
    Ok(codes.to_pyarray(py).into())
}

#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(to_decibel, m)?)?;
    m.add_function(wrap_pyfunction!(focal_median, m)?)?;
    m.add_function(wrap_pyfunction!(threshold_masks, m)?)?;
    m.add_function(wrap_pyfunction!(severity_classes, m)?)?;
    Ok(())
}
