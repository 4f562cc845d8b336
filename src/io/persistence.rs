use crate::types::{QaError, QaResult, RasterElement, TimeSeries};
use gdal::raster::Buffer;
use gdal::{DriverManager, Metadata};
use ndarray::Axis;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage chunking hints (time x rows x cols)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingHints {
    pub time: usize,
    pub rows: usize,
    pub cols: usize,
}

impl Default for ChunkingHints {
    fn default() -> Self {
        Self {
            time: 1,
            rows: 256, // tile size
            cols: 256,
        }
    }
}

/// Terminal sink for finished arrays.
///
/// Implementations own the storage format; errors are returned as
/// [`QaError::Persistence`] and are never retried by the caller.
pub trait ArrayPersistence {
    fn save<T: RasterElement>(
        &self,
        path: &Path,
        series: &TimeSeries<T>,
        variable: &str,
        method_tag: &str,
        hints: &ChunkingHints,
    ) -> QaResult<()>;
}

/// Dataset metadata key holding the variable name
pub const DATA_VAR_KEY: &str = "data_var";
/// Dataset metadata key holding the smoothing method tag
pub const METHOD_KEY: &str = "smoothing_method";
/// Dataset metadata key holding the chunking hints as `time,rows,cols`
pub const CHUNK_SIZES_KEY: &str = "chunk_sizes";
/// Band metadata key holding the RFC 3339 timestamp of the band
pub const TIME_KEY: &str = "time";

const RESERVED_KEYS: [&str; 3] = [DATA_VAR_KEY, METHOD_KEY, CHUNK_SIZES_KEY];

fn persistence_error(message: String) -> QaError {
    QaError::Persistence(message.into())
}

fn gdal_error(e: gdal::errors::GdalError) -> QaError {
    QaError::Persistence(Box::new(e))
}

/// Writes a cube as a multi-band GeoTIFF through GDAL.
///
/// Each time step becomes one band tagged with its timestamp. The variable
/// name, method tag, chunking hints and series attributes are stored as
/// dataset metadata. The file is written under a temporary sibling name and
/// only moved to `path` once complete, so a failed save leaves nothing behind.
#[derive(Debug, Default, Clone)]
pub struct GeoTiffWriter;

impl GeoTiffWriter {
    pub fn new() -> Self {
        Self
    }

    /// Temporary sibling used while the dataset is being written
    pub fn partial_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!(".{}.partial", name))
    }

    /// Attribute keys must be usable as GDAL metadata names
    fn check_attr_key(key: &str) -> QaResult<()> {
        if key.is_empty() || key.contains('=') || key.chars().any(char::is_control) {
            return Err(persistence_error(format!(
                "attribute name {:?} cannot be stored as metadata",
                key
            )));
        }
        if RESERVED_KEYS.contains(&key) {
            return Err(persistence_error(format!(
                "attribute name '{}' is reserved",
                key
            )));
        }
        Ok(())
    }

    fn write_dataset<T: RasterElement>(
        target: &Path,
        series: &TimeSeries<T>,
        variable: &str,
        method_tag: &str,
        hints: &ChunkingHints,
    ) -> QaResult<()> {
        let cube = series.cube_view()?;
        let (bands, height, width) = cube.dim();

        let driver = DriverManager::get_driver_by_name("GTiff").map_err(gdal_error)?;
        let mut dataset = driver
            .create_with_band_type::<T, _>(target, width as isize, height as isize, bands as isize)
            .map_err(gdal_error)?;

        dataset
            .set_metadata_item(DATA_VAR_KEY, variable, "")
            .map_err(gdal_error)?;
        dataset
            .set_metadata_item(METHOD_KEY, method_tag, "")
            .map_err(gdal_error)?;
        dataset
            .set_metadata_item(
                CHUNK_SIZES_KEY,
                &format!("{},{},{}", hints.time, hints.rows, hints.cols),
                "",
            )
            .map_err(gdal_error)?;
        for (key, value) in series.attrs() {
            dataset.set_metadata_item(key, value, "").map_err(gdal_error)?;
        }

        for (t, (slice, time)) in cube.axis_iter(Axis(0)).zip(&series.coords().time).enumerate() {
            let mut band = dataset.rasterband(t as isize + 1).map_err(gdal_error)?;
            let buffer = Buffer::new((width, height), slice.iter().copied().collect());
            band.write((0, 0), (width, height), &buffer).map_err(gdal_error)?;
            band.set_metadata_item(TIME_KEY, &time.to_rfc3339(), "")
                .map_err(gdal_error)?;
        }

        // Dropping the dataset flushes it to disk
        Ok(())
    }
}

impl ArrayPersistence for GeoTiffWriter {
    fn save<T: RasterElement>(
        &self,
        path: &Path,
        series: &TimeSeries<T>,
        variable: &str,
        method_tag: &str,
        hints: &ChunkingHints,
    ) -> QaResult<()> {
        log::info!("Saving '{}' ({}) to {}", variable, method_tag, path.display());

        series.cube_view()?;
        for key in series.attrs().keys() {
            Self::check_attr_key(key)?;
        }

        let partial = Self::partial_path(path);
        let written = Self::write_dataset(&partial, series, variable, method_tag, hints).and_then(|_| {
            std::fs::rename(&partial, path).map_err(|e| QaError::Persistence(Box::new(e)))
        });

        if let Err(e) = written {
            if partial.exists() {
                if let Err(cleanup) = std::fs::remove_file(&partial) {
                    log::warn!("Could not remove {}: {}", partial.display(), cleanup);
                }
            }
            return Err(e);
        }

        log::info!(
            "✅ Saved {} bands of {}",
            series.coords().time.len(),
            T::DATA_TYPE
        );
        Ok(())
    }
}
