use chrono::{DateTime, Utc};
use gdal::raster::GdalType;
use ndarray::{Array3, Array4, ArrayD, ArrayView3, Ix3};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the temporal axis
pub const TIME_DIM: &str = "time";
/// Name of the north-south axis
pub const LAT_DIM: &str = "latitude";
/// Name of the east-west axis
pub const LON_DIM: &str = "longitude";

/// Axis order every cube in this crate is expected to have
pub const CUBE_DIMS: [&str; 3] = [TIME_DIM, LAT_DIM, LON_DIM];

/// Per-pixel, per-time-step validity mask (time x lat x lon)
pub type CombinedMask = Array3<bool>;

/// Per-flag validity masks (flag x time x lat x lon)
pub type MaskCube = Array4<bool>;

/// Check that a list of axis names is exactly (time, latitude, longitude)
pub fn validate_cube_dims(dims: &[String], what: &str) -> QaResult<()> {
    if dims.len() != CUBE_DIMS.len() {
        return Err(QaError::Dimension(format!(
            "{} has {} axes {:?}, expected {:?}",
            what,
            dims.len(),
            dims,
            CUBE_DIMS
        )));
    }

    for (axis, (found, expected)) in dims.iter().zip(CUBE_DIMS.iter()).enumerate() {
        if found != expected {
            return Err(QaError::Dimension(format!(
                "{} axis {} is '{}', expected '{}' (axes {:?})",
                what, axis, found, expected, dims
            )));
        }
    }

    Ok(())
}

/// Coordinate vectors attached to a (time, latitude, longitude) cube
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub time: Vec<DateTime<Utc>>,
    pub latitude: Vec<f64>,
    pub longitude: Vec<f64>,
}

impl Coordinates {
    pub fn new(time: Vec<DateTime<Utc>>, latitude: Vec<f64>, longitude: Vec<f64>) -> Self {
        Self {
            time,
            latitude,
            longitude,
        }
    }

    /// Lengths as (time, latitude, longitude)
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.time.len(), self.latitude.len(), self.longitude.len())
    }
}

/// Multi-temporal raster cube with labelled axes, coordinates and opaque metadata.
///
/// Values are never mutated after construction; processing steps build a
/// sibling series with [`TimeSeries::with_values`].
#[derive(Debug, Clone)]
pub struct TimeSeries<T> {
    name: String,
    values: ArrayD<T>,
    dims: Vec<String>,
    coords: Coordinates,
    attrs: BTreeMap<String, String>,
}

impl<T: Clone> TimeSeries<T> {
    /// Default variable name for a series read without band metadata
    pub const DEFAULT_NAME: &'static str = "data";

    /// Create a series from raw values and their axis names.
    ///
    /// Only the axis count is checked here; axis names and coordinate lengths
    /// are validated by the stages that need them.
    pub fn new(
        name: impl Into<String>,
        values: ArrayD<T>,
        dims: Vec<String>,
        coords: Coordinates,
        attrs: BTreeMap<String, String>,
    ) -> QaResult<Self> {
        if dims.len() != values.ndim() {
            return Err(QaError::Dimension(format!(
                "{} axis names {:?} given for a {}-dimensional array",
                dims.len(),
                dims,
                values.ndim()
            )));
        }

        Ok(Self {
            name: name.into(),
            values,
            dims,
            coords,
            attrs,
        })
    }

    /// Convenience constructor for an already (time, lat, lon) shaped cube
    pub fn from_cube(
        name: impl Into<String>,
        values: Array3<T>,
        coords: Coordinates,
        attrs: BTreeMap<String, String>,
    ) -> QaResult<Self> {
        let dims = CUBE_DIMS.iter().map(|d| d.to_string()).collect();
        Self::new(name, values.into_dyn(), dims, coords, attrs)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &ArrayD<T> {
        &self.values
    }

    pub fn dims(&self) -> &[String] {
        &self.dims
    }

    pub fn coords(&self) -> &Coordinates {
        &self.coords
    }

    pub fn attrs(&self) -> &BTreeMap<String, String> {
        &self.attrs
    }

    /// Validate axes and coordinates, returning a (time, lat, lon) view
    pub fn cube_view(&self) -> QaResult<ArrayView3<'_, T>> {
        validate_cube_dims(&self.dims, &format!("time series '{}'", self.name))?;

        let view = self
            .values
            .view()
            .into_dimensionality::<Ix3>()
            .map_err(|e| QaError::Dimension(format!("time series '{}': {}", self.name, e)))?;

        if view.dim() != self.coords.shape() {
            return Err(QaError::Dimension(format!(
                "time series '{}' has shape {:?} but coordinates have lengths {:?}",
                self.name,
                view.dim(),
                self.coords.shape()
            )));
        }

        Ok(view)
    }

    /// Build a sibling series sharing name, axes, coordinates and attributes
    pub fn with_values(&self, values: Array3<T>) -> QaResult<Self> {
        if values.dim() != self.coords.shape() {
            return Err(QaError::Dimension(format!(
                "replacement values have shape {:?}, series '{}' expects {:?}",
                values.dim(),
                self.name,
                self.coords.shape()
            )));
        }

        Ok(Self {
            name: self.name.clone(),
            values: values.into_dyn(),
            dims: self.dims.clone(),
            coords: self.coords.clone(),
            attrs: self.attrs.clone(),
        })
    }
}

/// Storage type of a raster cube
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Float32,
    Float64,
}

impl DataType {
    /// Bytes per element
    pub fn item_size(&self) -> usize {
        match self {
            DataType::UInt8 => 1,
            DataType::Int16 | DataType::UInt16 => 2,
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => 4,
            DataType::Float64 => 8,
        }
    }

    /// Size of a rows x cols x bands array in human readable units.
    ///
    /// Returns the scaled size and its unit ("", "kB", "MB" or "GB").
    pub fn array_size(&self, rows: usize, cols: usize, bands: usize) -> (f64, &'static str) {
        const UNITS: [&str; 4] = ["", "kB", "MB", "GB"];

        let mut size = (rows * cols * bands * self.item_size()) as f64;
        for unit in UNITS.iter() {
            if size.abs() < 1024.0 || *unit == UNITS[UNITS.len() - 1] {
                return (size, unit);
            }
            size /= 1024.0;
        }

        (size, UNITS[UNITS.len() - 1])
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::UInt8 => write!(f, "uint8"),
            DataType::Int16 => write!(f, "int16"),
            DataType::UInt16 => write!(f, "uint16"),
            DataType::Int32 => write!(f, "int32"),
            DataType::UInt32 => write!(f, "uint32"),
            DataType::Float32 => write!(f, "float32"),
            DataType::Float64 => write!(f, "float64"),
        }
    }
}

/// Numeric element of a raster cube that can be smoothed and persisted
pub trait RasterElement: Copy + NumCast + GdalType + Send + Sync + 'static {
    const DATA_TYPE: DataType;
}

macro_rules! raster_element {
    ($($ty:ty => $dtype:ident),* $(,)?) => {
        $(
            impl RasterElement for $ty {
                const DATA_TYPE: DataType = DataType::$dtype;
            }
        )*
    };
}

raster_element!(
    u8 => UInt8,
    i16 => Int16,
    u16 => UInt16,
    i32 => Int32,
    u32 => UInt32,
    f32 => Float32,
    f64 => Float64,
);

/// Error types for QA analytics and smoothing
#[derive(Debug, thiserror::Error)]
pub enum QaError {
    #[error("Selection error: {0}")]
    Selection(String),

    #[error("Dimension error: {0}")]
    Dimension(String),

    #[error("QA definition error: {0}")]
    Definition(String),

    #[error("QA layer {layer} has no field '{field}'")]
    MissingField { layer: u32, field: String },

    #[error("Computation error at pixel (lat {lat}, lon {lon}): {reason}")]
    Computation { lat: usize, lon: usize, reason: String },

    #[error("Persistence error: {0}")]
    Persistence(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Invalid product: {0}")]
    InvalidProduct(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),
}

/// Result type for QA operations
pub type QaResult<T> = Result<T, QaError>;
