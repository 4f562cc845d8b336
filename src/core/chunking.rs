use crate::core::progress::{CancellationToken, ProgressTracker};
use crate::types::QaResult;
use std::ops::Range;

/// Split `rows` into consecutive ranges of at most `chunk_rows` rows
pub(crate) fn row_chunks(rows: usize, chunk_rows: usize) -> Vec<Range<usize>> {
    let chunk_rows = chunk_rows.max(1);
    (0..rows)
        .step_by(chunk_rows)
        .map(|start| start..(start + chunk_rows).min(rows))
        .collect()
}

/// Run `work` on every row chunk, in parallel when enabled.
///
/// Cancellation is checked before each chunk starts and progress advances
/// after each chunk finishes. Results come back in chunk order; the first
/// error aborts the whole run.
pub(crate) fn process_row_chunks<R, F>(
    chunks: &[Range<usize>],
    parallel: bool,
    stage: &str,
    tracker: &ProgressTracker<'_>,
    cancel: &CancellationToken,
    work: F,
) -> QaResult<Vec<R>>
where
    R: Send,
    F: Fn(Range<usize>) -> QaResult<R> + Sync,
{
    let run_chunk = |range: &Range<usize>| -> QaResult<R> {
        cancel.check(stage)?;
        let result = work(range.clone())?;
        tracker.advance();
        Ok(result)
    };

    tracker.start();

    if parallel {
        run_parallel(chunks, &run_chunk)
    } else {
        chunks.iter().map(run_chunk).collect()
    }
}

#[cfg(feature = "parallel")]
fn run_parallel<R, F>(chunks: &[Range<usize>], run_chunk: &F) -> QaResult<Vec<R>>
where
    R: Send,
    F: Fn(&Range<usize>) -> QaResult<R> + Sync,
{
    use rayon::prelude::*;

    chunks.par_iter().map(run_chunk).collect()
}

#[cfg(not(feature = "parallel"))]
fn run_parallel<R, F>(chunks: &[Range<usize>], run_chunk: &F) -> QaResult<Vec<R>>
where
    R: Send,
    F: Fn(&Range<usize>) -> QaResult<R> + Sync,
{
    // Fallback to sequential processing if parallel feature is not available
    chunks.iter().map(run_chunk).collect()
}
