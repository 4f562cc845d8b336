//! Explicit QA analytics pipeline.
//!
//! [`QaSession`] is the value a stepwise workflow carries between steps:
//! the definition table, the targeted QA layer and the current selection.
//! Every edit returns a new session. [`QaAnalytics`] runs mask building and
//! coverage analysis for a selection and returns everything it produced.

use crate::core::coverage::{CoverageAnalyzer, CoverageParams, CoverageStats};
use crate::core::progress::{CancellationToken, ProgressSink};
use crate::core::qa_mask::QaMaskBuilder;
use crate::core::selection::UserSelection;
use crate::io::{ProductId, QaDefinitionSource, QaDefinitionTable, QaLayerSource};
use crate::types::{CombinedMask, Coordinates, QaError, QaResult};

/// Definitions, target layer and selection of one QA workflow
#[derive(Debug, Clone, PartialEq)]
pub struct QaSession {
    definitions: QaDefinitionTable,
    layer_id: u32,
    selection: UserSelection,
}

impl QaSession {
    /// Load the definitions of `product` and target `layer_id`, or the first
    /// layer of the table when none is given
    pub fn open(
        source: &dyn QaDefinitionSource,
        product: &ProductId,
        layer_id: Option<u32>,
    ) -> QaResult<Self> {
        let definitions = source.qa_definitions(product)?;

        let layer_id = match layer_id {
            Some(id) => id,
            None => *definitions.layer_ids().first().ok_or_else(|| {
                QaError::InvalidProduct(format!("{} has no QA definitions", product))
            })?,
        };

        log::info!("QA session for {} on layer {}", product, layer_id);
        Self::new(definitions, layer_id)
    }

    /// Start from the default selection (first value-label of every flag)
    pub fn new(definitions: QaDefinitionTable, layer_id: u32) -> QaResult<Self> {
        let selection = UserSelection::default_for(&definitions, layer_id)?;
        Ok(Self {
            definitions,
            layer_id,
            selection,
        })
    }

    pub fn definitions(&self) -> &QaDefinitionTable {
        &self.definitions
    }

    pub fn layer_id(&self) -> u32 {
        self.layer_id
    }

    pub fn selection(&self) -> &UserSelection {
        &self.selection
    }

    /// Flags of the targeted layer, in definition order
    pub fn flags(&self) -> Vec<&str> {
        self.definitions.flags(self.layer_id)
    }

    /// Value-labels of `flag` in the targeted layer, in definition order
    pub fn value_labels(&self, flag: &str) -> Vec<&str> {
        self.definitions
            .values(self.layer_id, flag)
            .into_iter()
            .map(|row| row.label.as_str())
            .collect()
    }

    /// Replace the accepted value-labels of one flag.
    ///
    /// Unknown flags, unknown labels and empty label sets are rejected here
    /// instead of at mask-building time.
    pub fn select<I, S>(&self, flag: &str, labels: I) -> QaResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let known = self.value_labels(flag);
        if known.is_empty() {
            return Err(QaError::Selection(format!(
                "flag '{}' is not defined for QA layer {}",
                flag, self.layer_id
            )));
        }

        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(QaError::Selection(format!("flag '{}' has no selected values", flag)));
        }
        if let Some(unknown) = labels.iter().find(|l| !known.contains(&l.as_str())) {
            return Err(QaError::Selection(format!(
                "value '{}' is not defined for flag '{}' (values: {:?})",
                unknown, flag, known
            )));
        }

        let mut next = self.clone();
        next.selection.set(flag, labels);
        Ok(next)
    }

    /// Accept every value-label of every flag
    pub fn select_all(&self) -> QaResult<Self> {
        Ok(Self {
            selection: UserSelection::all_for(&self.definitions, self.layer_id)?,
            ..self.clone()
        })
    }

    /// Back to the default selection
    pub fn reset(&self) -> QaResult<Self> {
        Self::new(self.definitions.clone(), self.layer_id)
    }
}

/// Everything one analytics run produced
#[derive(Debug, Clone)]
pub struct QaAnalyticsReport {
    pub layer_id: u32,
    /// Flags in mask-building order
    pub flags: Vec<String>,
    pub mask: CombinedMask,
    /// Time and grid coordinates of `mask`, copied from the QA layer
    pub coords: Option<Coordinates>,
    pub stats: CoverageStats,
}

/// Mask building followed by coverage analysis
#[derive(Debug, Clone, Default)]
pub struct QaAnalytics {
    mask_builder: QaMaskBuilder,
    coverage: CoverageAnalyzer,
}

impl QaAnalytics {
    pub fn new(mask_builder: QaMaskBuilder, coverage: CoverageAnalyzer) -> Self {
        Self {
            mask_builder,
            coverage,
        }
    }

    /// Parallelism and chunking taken from one set of coverage parameters
    pub fn with_params(params: CoverageParams) -> Self {
        Self::new(
            QaMaskBuilder::with_parallel(params.enable_parallel),
            CoverageAnalyzer::new(params),
        )
    }

    /// Run the pipeline for the session's current selection
    pub fn run_session<L: QaLayerSource>(
        &self,
        session: &QaSession,
        layer: &L,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<QaAnalyticsReport> {
        if layer.layer_id() != session.layer_id() {
            return Err(QaError::Selection(format!(
                "session targets QA layer {} but layer {} was given",
                session.layer_id(),
                layer.layer_id()
            )));
        }

        self.run(session.selection(), layer, session.definitions(), progress, cancel)
    }

    pub fn run<L: QaLayerSource>(
        &self,
        selection: &UserSelection,
        layer: &L,
        definitions: &QaDefinitionTable,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> QaResult<QaAnalyticsReport> {
        let mask = self.mask_builder.build(selection, layer, definitions, progress)?;
        cancel.check("QA analytics")?;
        let stats = self.coverage.analyze(&mask, progress, cancel)?;

        Ok(QaAnalyticsReport {
            layer_id: layer.layer_id(),
            flags: selection.flags().map(str::to_string).collect(),
            mask,
            coords: layer.coords().cloned(),
            stats,
        })
    }
}
