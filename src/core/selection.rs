use crate::io::QaDefinitionTable;
use crate::types::{QaError, QaResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Accepted value-labels of one QA flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagSelection {
    pub flag: String,
    pub values: BTreeSet<String>,
}

/// Ordered mapping flag -> accepted value-labels.
///
/// Flag order is the insertion order and drives mask-building order and
/// progress reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSelection {
    entries: Vec<FlagSelection>,
}

impl UserSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the selection with `flag` set to `values`, keeping the flag's
    /// position if it was already present
    pub fn with_flag<I, S>(mut self, flag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set(flag, values);
        self
    }

    /// Set the accepted values of `flag`
    pub fn set<I, S>(&mut self, flag: impl Into<String>, values: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let flag = flag.into();
        let values: BTreeSet<String> = values.into_iter().map(Into::into).collect();

        match self.entries.iter_mut().find(|e| e.flag == flag) {
            Some(entry) => entry.values = values,
            None => self.entries.push(FlagSelection { flag, values }),
        }
    }

    /// First value-label of every flag of the layer, in catalogue order
    pub fn default_for(table: &QaDefinitionTable, layer_id: u32) -> QaResult<Self> {
        Self::from_table(table, layer_id, |values| values.truncate(1))
    }

    /// Every value-label of every flag of the layer
    pub fn all_for(table: &QaDefinitionTable, layer_id: u32) -> QaResult<Self> {
        Self::from_table(table, layer_id, |_| {})
    }

    fn from_table<F>(table: &QaDefinitionTable, layer_id: u32, pick: F) -> QaResult<Self>
    where
        F: Fn(&mut Vec<String>),
    {
        let flags = table.flags(layer_id);
        if flags.is_empty() {
            return Err(QaError::Selection(format!(
                "{} has no QA flags in layer {}",
                table.product(),
                layer_id
            )));
        }

        let mut selection = Self::new();
        for flag in flags {
            let mut labels: Vec<String> = table
                .values(layer_id, flag)
                .into_iter()
                .map(|row| row.label.clone())
                .collect();
            pick(&mut labels);
            selection.set(flag, labels);
        }

        Ok(selection)
    }

    pub fn get(&self, flag: &str) -> Option<&BTreeSet<String>> {
        self.entries.iter().find(|e| e.flag == flag).map(|e| &e.values)
    }

    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.flag.as_str())
    }

    pub fn entries(&self) -> &[FlagSelection] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
