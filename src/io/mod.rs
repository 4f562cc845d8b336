//! Boundaries to the collaborators around the core: the QA catalogue,
//! decoded QA layers and array storage

pub mod qa_definitions;
pub mod qa_layer;
pub mod persistence;

pub use qa_definitions::{
    BitPattern, InMemoryCatalogue, ProductId, QaDefinition, QaDefinitionSource, QaDefinitionTable,
};
pub use qa_layer::{field_name, QaLayerArray, QaLayerSource};
pub use persistence::{ArrayPersistence, ChunkingHints, GeoTiffWriter};
