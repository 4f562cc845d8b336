//! QA definition tables as delivered by the product catalogue.
//!
//! One row per (flag, value-label) pair of a quality layer. Rows are kept
//! in catalogue order; flag and value listings preserve that order.

use crate::types::{QaError, QaResult};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Product short name and collection version, e.g. `MOD13A2` / `006`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProductId {
    product: String,
    version: String,
}

impl ProductId {
    /// Create a product identifier.
    ///
    /// Product names must be longer than three characters and versions
    /// exactly three characters long.
    pub fn new(product: impl Into<String>, version: impl Into<String>) -> QaResult<Self> {
        let product = product.into();
        let version = version.into();

        if product.chars().count() <= 3 {
            return Err(QaError::InvalidProduct(format!(
                "product name '{}' is too short",
                product
            )));
        }

        if version.chars().count() != 3 {
            return Err(QaError::InvalidProduct(format!(
                "version '{}' of {} must have exactly 3 characters",
                version, product
            )));
        }

        Ok(Self { product, version })
    }

    pub fn product(&self) -> &str {
        &self.product
    }

    pub fn version(&self) -> &str {
        &self.version
    }
}

impl std::fmt::Display for ProductId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.product, self.version)
    }
}

/// Bit-level code of a QA value-label, stored as a binary digit string.
///
/// Decoded QA layers store each bit group as the integer whose *decimal*
/// digits spell the group's bits: bits `101` are stored as one hundred and
/// one, not five. [`BitPattern::field_code`] produces that stored value,
/// [`BitPattern::binary_value`] the radix-2 value of the same bits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitPattern(String);

impl BitPattern {
    /// Wrap a binary digit string such as `"01"` or `"1101"`
    pub fn new(digits: impl Into<String>) -> QaResult<Self> {
        let digits = digits.into();
        if digits.is_empty() || !digits.chars().all(|c| c == '0' || c == '1') {
            return Err(QaError::Definition(format!(
                "'{}' is not a binary digit string",
                digits
            )));
        }
        Ok(Self(digits))
    }

    /// Binary digit string of a catalogue value (5 -> "101")
    pub fn from_decimal(value: u32) -> Self {
        Self(format!("{:b}", value))
    }

    pub fn digits(&self) -> &str {
        &self.0
    }

    /// Value stored in the decoded QA layer field for this pattern ("101" -> 101)
    pub fn field_code(&self) -> QaResult<u64> {
        self.0.parse::<u64>().map_err(|e| {
            QaError::Definition(format!("bit pattern '{}' has no field code: {}", self.0, e))
        })
    }

    /// Radix-2 value of the pattern ("101" -> 5)
    pub fn binary_value(&self) -> QaResult<u64> {
        u64::from_str_radix(&self.0, 2).map_err(|e| {
            QaError::Definition(format!("bit pattern '{}' overflows: {}", self.0, e))
        })
    }
}

impl std::fmt::Display for BitPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One (flag, value-label) row of a QA definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaDefinition {
    /// QA parameter name, e.g. "VI Usefulness"
    pub flag: String,
    /// Human readable category, e.g. "Highest quality"
    pub label: String,
    pub bit_pattern: BitPattern,
    /// Quality layer the flag is decoded from
    pub layer_id: u32,
}

impl QaDefinition {
    pub fn new(
        flag: impl Into<String>,
        label: impl Into<String>,
        bit_pattern: BitPattern,
        layer_id: u32,
    ) -> Self {
        Self {
            flag: flag.into(),
            label: label.into(),
            bit_pattern,
            layer_id,
        }
    }
}

/// Immutable QA definition table of one product
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaDefinitionTable {
    product: ProductId,
    rows: Vec<QaDefinition>,
}

impl QaDefinitionTable {
    /// Create a table, rejecting duplicated (layer, flag, label) rows
    pub fn new(product: ProductId, rows: Vec<QaDefinition>) -> QaResult<Self> {
        let mut seen = HashSet::new();
        for row in &rows {
            if !seen.insert((row.layer_id, row.flag.as_str(), row.label.as_str())) {
                return Err(QaError::Definition(format!(
                    "{}: duplicated value '{}' for flag '{}' in layer {}",
                    product, row.label, row.flag, row.layer_id
                )));
            }
        }

        Ok(Self { product, rows })
    }

    /// Create a table from catalogue rows carrying decimal values.
    ///
    /// Each value is converted to its binary digit string, matching the
    /// representation of the decoded QA layer fields.
    pub fn from_decimal_rows<I, F, L>(product: ProductId, rows: I) -> QaResult<Self>
    where
        I: IntoIterator<Item = (F, L, u32, u32)>,
        F: Into<String>,
        L: Into<String>,
    {
        let rows = rows
            .into_iter()
            .map(|(flag, label, value, layer_id)| {
                QaDefinition::new(flag, label, BitPattern::from_decimal(value), layer_id)
            })
            .collect();
        Self::new(product, rows)
    }

    pub fn product(&self) -> &ProductId {
        &self.product
    }

    pub fn rows(&self) -> &[QaDefinition] {
        &self.rows
    }

    /// Quality layers in catalogue order
    pub fn layer_ids(&self) -> Vec<u32> {
        let mut layers = Vec::new();
        for row in &self.rows {
            if !layers.contains(&row.layer_id) {
                layers.push(row.layer_id);
            }
        }
        layers
    }

    /// Flags of a layer in catalogue order
    pub fn flags(&self, layer_id: u32) -> Vec<&str> {
        let mut flags: Vec<&str> = Vec::new();
        for row in self.rows.iter().filter(|r| r.layer_id == layer_id) {
            if !flags.contains(&row.flag.as_str()) {
                flags.push(&row.flag);
            }
        }
        flags
    }

    /// Value rows of one flag in catalogue order
    pub fn values(&self, layer_id: u32, flag: &str) -> Vec<&QaDefinition> {
        self.rows
            .iter()
            .filter(|r| r.layer_id == layer_id && r.flag == flag)
            .collect()
    }

    pub fn lookup(&self, layer_id: u32, flag: &str, label: &str) -> Option<&QaDefinition> {
        self.rows
            .iter()
            .find(|r| r.layer_id == layer_id && r.flag == flag && r.label == label)
    }
}

/// Catalogue capability: (product, version) -> QA definitions
pub trait QaDefinitionSource {
    fn qa_definitions(&self, product: &ProductId) -> QaResult<QaDefinitionTable>;
}

/// Catalogue backed by tables registered in memory
#[derive(Debug, Default)]
pub struct InMemoryCatalogue {
    tables: HashMap<ProductId, QaDefinitionTable>,
}

impl InMemoryCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a table, replacing any previous one for the same product
    pub fn insert(&mut self, table: QaDefinitionTable) {
        self.tables.insert(table.product().clone(), table);
    }
}

impl QaDefinitionSource for InMemoryCatalogue {
    fn qa_definitions(&self, product: &ProductId) -> QaResult<QaDefinitionTable> {
        self.tables
            .get(product)
            .cloned()
            .ok_or_else(|| QaError::InvalidProduct(format!("no QA definitions for {}", product)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mod13a2() -> ProductId {
        ProductId::new("MOD13A2", "006").unwrap()
    }

    #[test]
    fn test_product_id_validation() {
        assert!(ProductId::new("MOD13A2", "006").is_ok());
        assert!(matches!(ProductId::new("MOD", "006"), Err(QaError::InvalidProduct(_))));
        assert!(matches!(ProductId::new("MOD13A2", "6"), Err(QaError::InvalidProduct(_))));
        assert_eq!(mod13a2().to_string(), "MOD13A2.006");
    }

    #[test]
    fn test_decimal_value_becomes_digit_string() {
        // Catalogue value 5 is stored in decoded QA fields as 101
        let pattern = BitPattern::from_decimal(5);
        assert_eq!(pattern.digits(), "101");
        assert_eq!(pattern.field_code().unwrap(), 101);
        assert_eq!(pattern.binary_value().unwrap(), 5);

        assert_eq!(BitPattern::from_decimal(0).field_code().unwrap(), 0);
        assert_eq!(BitPattern::from_decimal(1).field_code().unwrap(), 1);
        assert_eq!(BitPattern::from_decimal(2).field_code().unwrap(), 10);
        assert_eq!(BitPattern::from_decimal(15).field_code().unwrap(), 1111);
    }

    #[test]
    fn test_invalid_bit_pattern() {
        assert!(BitPattern::new("0102").is_err());
        assert!(BitPattern::new("").is_err());
        assert_eq!(BitPattern::new("01").unwrap().field_code().unwrap(), 1);
    }

    #[test]
    fn test_table_listings_keep_catalogue_order() {
        let table = QaDefinitionTable::from_decimal_rows(
            mod13a2(),
            vec![
                ("VI Usefulness", "Highest quality", 0, 1),
                ("VI Usefulness", "Lower quality", 1, 1),
                ("MODLAND_QA", "VI produced, good quality", 0, 1),
                ("MODLAND_QA", "VI produced, but check other QA", 1, 1),
                ("Pixel reliability", "Good data", 0, 2),
            ],
        )
        .unwrap();

        assert_eq!(table.layer_ids(), vec![1, 2]);
        assert_eq!(table.flags(1), vec!["VI Usefulness", "MODLAND_QA"]);
        assert_eq!(table.values(1, "MODLAND_QA").len(), 2);
        assert!(table.lookup(1, "Pixel reliability", "Good data").is_none());
        assert!(table.lookup(2, "Pixel reliability", "Good data").is_some());
    }

    #[test]
    fn test_duplicate_rows_rejected() {
        let result = QaDefinitionTable::from_decimal_rows(
            mod13a2(),
            vec![("Land/Water", "Land", 1, 1), ("Land/Water", "Land", 2, 1)],
        );
        assert!(matches!(result, Err(QaError::Definition(_))));
    }

    #[test]
    fn test_in_memory_catalogue() {
        let mut catalogue = InMemoryCatalogue::new();
        let table = QaDefinitionTable::from_decimal_rows(mod13a2(), vec![("Land/Water", "Land", 1, 1)]).unwrap();
        catalogue.insert(table);

        assert_eq!(catalogue.qa_definitions(&mod13a2()).unwrap().rows().len(), 1);

        let other = ProductId::new("MOD09A1", "006").unwrap();
        assert!(matches!(catalogue.qa_definitions(&other), Err(QaError::InvalidProduct(_))));
    }
}
