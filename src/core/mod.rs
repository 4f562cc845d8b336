//! Core QA analytics and smoothing modules

pub mod analytics;
pub mod chunking;
pub mod coverage;
pub mod progress;
pub mod qa_mask;
pub mod run_length;
pub mod selection;
pub mod smoothn;
pub mod temporal_smoothing;

// Re-export main types
pub use analytics::{QaAnalytics, QaAnalyticsReport, QaSession};
pub use coverage::{CoverageAnalyzer, CoverageParams, CoverageStats};
pub use progress::{CancellationToken, LogProgress, NoProgress, ProgressSink};
pub use qa_mask::{MaskStack, QaMaskBuilder};
pub use run_length::{longest_false_run, run_lengths, Run};
pub use selection::{FlagSelection, UserSelection};
pub use smoothn::{RobustSmoother, SmoothnError, SmoothnFit, SmoothnParams};
pub use temporal_smoothing::{SmoothingMethod, SmoothingParams, TemporalSmoother};
