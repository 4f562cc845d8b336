//! qaseries: QA masking, coverage statistics and robust temporal smoothing
//! for satellite time series
//!
//! Builds validity masks from per-pixel quality layers, derives coverage
//! statistics (percent valid, longest gap) and smooths every pixel's time
//! series with a robust penalized least-squares smoother.

pub mod types;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    Coordinates, CombinedMask, DataType, MaskCube, QaError, QaResult, RasterElement, TimeSeries,
    LAT_DIM, LON_DIM, TIME_DIM,
};

pub use io::{
    ArrayPersistence, BitPattern, ChunkingHints, GeoTiffWriter, InMemoryCatalogue, ProductId,
    QaDefinition, QaDefinitionSource, QaDefinitionTable, QaLayerArray, QaLayerSource,
};

pub use crate::core::{
    CancellationToken, CoverageAnalyzer, CoverageParams, CoverageStats, LogProgress, NoProgress,
    ProgressSink, QaAnalytics, QaAnalyticsReport, QaMaskBuilder, QaSession, SmoothingMethod,
    SmoothingParams, SmoothnParams, TemporalSmoother, UserSelection,
};
