use crate::core::chunking::{process_row_chunks, row_chunks};
use crate::core::progress::{CancellationToken, ProgressSink, ProgressTracker};
use crate::core::smoothn::{RobustSmoother, SmoothnParams};
use crate::io::{ArrayPersistence, ChunkingHints};
use crate::types::{QaError, QaResult, RasterElement, TimeSeries};
use ndarray::{s, Array3, ArrayView3, Axis};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::path::Path;

const SMOOTHING_LABEL: &str = "Smoothing time series";

/// Temporal smoothing algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmoothingMethod {
    /// Robust penalized least squares in the DCT domain
    Smoothn,
}

impl SmoothingMethod {
    /// Short name stored next to persisted results
    pub fn tag(&self) -> &'static str {
        match self {
            SmoothingMethod::Smoothn => "smoothn",
        }
    }
}

impl std::fmt::Display for SmoothingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// Temporal smoothing parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothingParams {
    /// Per-pixel smoother settings
    pub smoothn: SmoothnParams,
    /// Latitude rows per unit of parallel work
    pub chunk_rows: usize,
    /// Process chunks with rayon
    pub enable_parallel: bool,
}

impl Default for SmoothingParams {
    fn default() -> Self {
        Self {
            smoothn: SmoothnParams::default(),
            chunk_rows: 16,
            enable_parallel: true,
        }
    }
}

/// Smooths every pixel of a (time, lat, lon) series along time
#[derive(Debug, Clone, Default)]
pub struct TemporalSmoother {
    params: SmoothingParams,
}

impl TemporalSmoother {
    pub fn new(params: SmoothingParams) -> Self {
        Self { params }
    }

    /// Create a smoother with default settings
    pub fn standard() -> Self {
        Self::new(SmoothingParams::default())
    }

    pub fn params(&self) -> &SmoothingParams {
        &self.params
    }

    /// Smooth every pixel's time series.
    ///
    /// The result has the input's name, axes, coordinates, attributes and
    /// element type. Pixels without any finite sample are copied through.
    /// Pixels that hit the iteration cap keep their last iterate and are
    /// counted in one warning. The first pixel that cannot be smoothed (not
    /// finite, not representable, or not converged when convergence is
    /// required) fails the whole call with [`QaError::Computation`] naming
    /// that pixel.
    pub fn smooth<T: RasterElement>(
        &self,
        series: &TimeSeries<T>,
        method: SmoothingMethod,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<TimeSeries<T>> {
        let cube = series.cube_view()?;
        let (time_steps, rows, cols) = cube.dim();
        if time_steps == 0 {
            return Err(QaError::Dimension(format!(
                "time series '{}' has no time steps",
                series.name()
            )));
        }

        let (size, unit) = T::DATA_TYPE.array_size(rows, cols, time_steps);
        log::info!(
            "Smoothing '{}' with {}: {} time steps of {}x{} {} pixels ({:.1} {}B)",
            series.name(),
            method,
            time_steps,
            rows,
            cols,
            T::DATA_TYPE,
            size,
            unit
        );

        let smoother = match method {
            SmoothingMethod::Smoothn => RobustSmoother::new(time_steps, self.params.smoothn.clone())
                .map_err(|e| QaError::Dimension(format!("time series '{}': {}", series.name(), e)))?,
        };

        let chunks = row_chunks(rows, self.params.chunk_rows);
        let tracker = ProgressTracker::new(progress, SMOOTHING_LABEL, chunks.len());
        let blocks = process_row_chunks(
            &chunks,
            self.params.enable_parallel,
            "temporal smoothing",
            &tracker,
            cancel,
            |range| Self::smooth_block(&smoother, &cube, range),
        )?;

        let unconverged: usize = blocks.iter().map(|(_, n)| n).sum();
        if unconverged > 0 {
            log::warn!(
                "{} of {} pixels did not reach tolerance {:e} within {} iterations",
                unconverged,
                rows * cols,
                self.params.smoothn.tolerance,
                self.params.smoothn.max_iterations
            );
        }

        let smoothed = if blocks.is_empty() {
            cube.to_owned()
        } else {
            let views: Vec<_> = blocks.iter().map(|(b, _)| b.view()).collect();
            ndarray::concatenate(Axis(1), &views)
                .map_err(|e| QaError::Dimension(format!("cannot assemble smoothed rows: {}", e)))?
        };

        log::info!("Smoothed '{}' ({} pixels)", series.name(), rows * cols);
        series.with_values(smoothed)
    }

    /// Smooth, then hand the result to `store`.
    ///
    /// Nothing is persisted when smoothing fails. The series name is used as
    /// the stored variable name.
    #[allow(clippy::too_many_arguments)]
    pub fn smooth_and_save<T, P>(
        &self,
        series: &TimeSeries<T>,
        method: SmoothingMethod,
        store: &P,
        path: &Path,
        hints: &ChunkingHints,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<TimeSeries<T>>
    where
        T: RasterElement,
        P: ArrayPersistence + ?Sized,
    {
        let smoothed = self.smooth(series, method, progress, cancel)?;

        log::info!("Saving '{}' to {}", smoothed.name(), path.display());
        store.save(path, &smoothed, smoothed.name(), method.tag(), hints)?;

        Ok(smoothed)
    }

    fn smooth_block<T: RasterElement>(
        smoother: &RobustSmoother,
        cube: &ArrayView3<'_, T>,
        rows: Range<usize>,
    ) -> QaResult<(Array3<T>, usize)> {
        let block = cube.slice(s![.., rows.clone(), ..]);
        let mut out = block.to_owned();
        let mut samples = vec![0.0; smoother.len()];
        let mut unconverged = 0;

        for (i, lat) in rows.enumerate() {
            for lon in 0..block.len_of(Axis(2)) {
                for (dst, v) in samples.iter_mut().zip(block.slice(s![.., i, lon])) {
                    *dst = v.to_f64().unwrap_or(f64::NAN);
                }

                if !samples.iter().any(|v| v.is_finite()) {
                    continue;
                }

                let fit = smoother.smooth(&samples).map_err(|e| QaError::Computation {
                    lat,
                    lon,
                    reason: e.to_string(),
                })?;
                if !fit.converged {
                    unconverged += 1;
                }

                for (dst, &z) in out.slice_mut(s![.., i, lon]).iter_mut().zip(&fit.values) {
                    *dst = <T as NumCast>::from(z).ok_or_else(|| QaError::Computation {
                        lat,
                        lon,
                        reason: format!("smoothed value {} does not fit {}", z, T::DATA_TYPE),
                    })?;
                }
            }
        }

        Ok((out, unconverged))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::progress::NoProgress;
    use crate::types::Coordinates;
    use approx::assert_abs_diff_eq;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn coords(t: usize, rows: usize, cols: usize) -> Coordinates {
        Coordinates::new(
            (0..t)
                .map(|d| Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::days(16 * d as i64))
                .collect(),
            (0..rows).map(|r| 45.0 - r as f64 * 0.01).collect(),
            (0..cols).map(|c| 7.0 + c as f64 * 0.01).collect(),
        )
    }

    #[test]
    fn test_method_tag() {
        assert_eq!(SmoothingMethod::Smoothn.tag(), "smoothn");
        assert_eq!(SmoothingMethod::Smoothn.to_string(), "smoothn");
    }

    #[test]
    fn test_integer_series_keeps_type_and_metadata() {
        let mut values = Array3::<i16>::from_elem((20, 3, 2), 100);
        values[[9, 1, 1]] = 1000;
        let mut attrs = BTreeMap::new();
        attrs.insert("units".to_string(), "NDVI x 1e4".to_string());
        let series = TimeSeries::from_cube("ndvi", values, coords(20, 3, 2), attrs).unwrap();

        let smoothed = TemporalSmoother::standard()
            .smooth(&series, SmoothingMethod::Smoothn, &NoProgress, &CancellationToken::new())
            .unwrap();

        assert_eq!(smoothed.name(), "ndvi");
        assert_eq!(smoothed.dims(), series.dims());
        assert_eq!(smoothed.coords(), series.coords());
        assert_eq!(smoothed.attrs(), series.attrs());

        let cube = smoothed.cube_view().unwrap();
        assert!((cube[[9, 1, 1]] - 100).abs() <= 10, "spike kept at {}", cube[[9, 1, 1]]);
        assert!((cube[[5, 0, 0]] - 100).abs() <= 1);
    }

    #[test]
    fn test_missing_pixel_passes_through() {
        let mut values = Array3::<f32>::from_elem((8, 1, 2), 0.5);
        values.slice_mut(s![.., 0, 1]).fill(f32::NAN);
        let series = TimeSeries::from_cube("ndvi", values, coords(8, 1, 2), BTreeMap::new()).unwrap();

        let smoothed = TemporalSmoother::standard()
            .smooth(&series, SmoothingMethod::Smoothn, &NoProgress, &CancellationToken::new())
            .unwrap();
        let cube = smoothed.cube_view().unwrap();

        assert!(cube.slice(s![.., 0, 1]).iter().all(|v| v.is_nan()));
        for v in cube.slice(s![.., 0, 0]) {
            assert_abs_diff_eq!(*v, 0.5, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_non_convergence_names_pixel() {
        let mut values = Array3::<f64>::from_elem((20, 2, 2), 10.0);
        values[[9, 1, 0]] = 50.0;
        let series = TimeSeries::from_cube("ndvi", values, coords(20, 2, 2), BTreeMap::new()).unwrap();

        let params = SmoothingParams {
            smoothn: SmoothnParams {
                max_iterations: 1,
                require_convergence: true,
                ..SmoothnParams::default()
            },
            ..SmoothingParams::default()
        };

        let result = TemporalSmoother::new(params).smooth(
            &series,
            SmoothingMethod::Smoothn,
            &NoProgress,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(QaError::Computation { lat: 1, lon: 0, .. })));
    }

    #[test]
    fn test_unrepresentable_result_is_an_error() {
        // A smoothed step undershoots below 0 and overshoots above 255
        let mut values = Array3::<u8>::zeros((12, 1, 1));
        for t in 6..12 {
            values[[t, 0, 0]] = 255;
        }
        let series = TimeSeries::from_cube("q", values, coords(12, 1, 1), BTreeMap::new()).unwrap();

        let params = SmoothingParams {
            smoothn: SmoothnParams {
                smoothing: 1.0,
                robust: false,
                ..SmoothnParams::default()
            },
            ..SmoothingParams::default()
        };

        let result = TemporalSmoother::new(params).smooth(
            &series,
            SmoothingMethod::Smoothn,
            &NoProgress,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(QaError::Computation { lat: 0, lon: 0, .. })));
    }

    #[test]
    fn test_empty_time_axis() {
        let series =
            TimeSeries::from_cube("ndvi", Array3::<f32>::zeros((0, 2, 2)), coords(0, 2, 2), BTreeMap::new())
                .unwrap();
        let result = TemporalSmoother::standard().smooth(
            &series,
            SmoothingMethod::Smoothn,
            &NoProgress,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(QaError::Dimension(_))));
    }
}
