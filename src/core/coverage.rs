use crate::core::chunking::{process_row_chunks, row_chunks};
use crate::core::progress::{CancellationToken, ProgressSink, ProgressTracker};
use crate::core::run_length::longest_false_run;
use crate::types::{CombinedMask, QaError, QaResult};
use ndarray::{s, Array2, ArrayView3, Axis};
use serde::{Deserialize, Serialize};

const GAP_LABEL: &str = "Computing max gap length";

/// Coverage analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageParams {
    /// Latitude rows per unit of parallel work
    pub chunk_rows: usize,
    /// Process chunks with rayon
    pub enable_parallel: bool,
}

impl Default for CoverageParams {
    fn default() -> Self {
        Self {
            chunk_rows: 32,
            enable_parallel: true,
        }
    }
}

/// Per-pixel coverage statistics of a combined mask
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageStats {
    /// Percentage of valid time steps, in [0, 100]
    pub percent_valid: Array2<f32>,
    /// Longest run of consecutive invalid time steps
    pub max_gap_length: Array2<u32>,
}

/// Computes coverage statistics from a (time, lat, lon) validity mask
#[derive(Debug, Clone, Default)]
pub struct CoverageAnalyzer {
    params: CoverageParams,
}

impl CoverageAnalyzer {
    pub fn new(params: CoverageParams) -> Self {
        Self { params }
    }

    /// Create an analyzer with default chunking
    pub fn standard() -> Self {
        Self::new(CoverageParams::default())
    }

    /// Compute both statistics
    pub fn analyze(
        &self,
        mask: &CombinedMask,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<CoverageStats> {
        let percent_valid = self.percent_valid(mask)?;
        let max_gap_length = self.max_gap_length(mask, progress, cancel)?;

        Ok(CoverageStats {
            percent_valid,
            max_gap_length,
        })
    }

    /// `100 * valid steps / total steps` for every pixel
    pub fn percent_valid(&self, mask: &CombinedMask) -> QaResult<Array2<f32>> {
        let time_steps = Self::time_steps(mask)?;

        let percent = mask.map_axis(Axis(0), |lane| {
            let valid = lane.iter().filter(|&&v| v).count();
            (valid as f32 * 100.0) / time_steps as f32
        });

        if !percent.is_empty() {
            let mean = percent.iter().map(|&p| p as f64).sum::<f64>() / percent.len() as f64;
            log::info!("Data available after masking: {:.1}% on average", mean);
        }

        Ok(percent)
    }

    /// Longest run of invalid steps for every pixel.
    ///
    /// Each pixel is scanned independently, so the result does not depend
    /// on chunk size or on parallel execution.
    pub fn max_gap_length(
        &self,
        mask: &CombinedMask,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<Array2<u32>> {
        Self::time_steps(mask)?;
        let (_, rows, cols) = mask.dim();

        let chunks = row_chunks(rows, self.params.chunk_rows);
        log::debug!(
            "Scanning gaps of {}x{} pixels in {} chunks of up to {} rows",
            rows,
            cols,
            chunks.len(),
            self.params.chunk_rows
        );

        let tracker = ProgressTracker::new(progress, GAP_LABEL, chunks.len());
        let results = process_row_chunks(
            &chunks,
            self.params.enable_parallel,
            "max gap length",
            &tracker,
            cancel,
            |range| Ok(Self::gap_chunk(mask.slice(s![.., range, ..]))),
        )?;

        let mut max_gap = Array2::<u32>::zeros((rows, cols));
        for (range, chunk) in chunks.iter().zip(results) {
            max_gap.slice_mut(s![range.clone(), ..]).assign(&chunk);
        }

        if let Some(longest) = max_gap.iter().max() {
            log::info!("Max gap length computed, longest gap: {} steps", longest);
        }

        Ok(max_gap)
    }

    fn gap_chunk(block: ArrayView3<'_, bool>) -> Array2<u32> {
        block.map_axis(Axis(0), |lane| longest_false_run(lane.iter().copied()) as u32)
    }

    fn time_steps(mask: &CombinedMask) -> QaResult<usize> {
        match mask.len_of(Axis(0)) {
            0 => Err(QaError::Dimension("mask has no time steps".to_string())),
            t => Ok(t),
        }
    }
}
