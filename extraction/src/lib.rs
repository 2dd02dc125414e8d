//! Entity and relation extraction for astrology, saju and tarot text.
//!
//! The pattern extractor is deterministic and runs on every query and
//! document. The optional LLM extractor augments it through the
//! [`LlmClient`] boundary, which HyDE shares.

pub mod entity;
pub mod error;
pub mod extractor;
pub mod lexicon;
pub mod llm;
pub mod relationship;

pub use entity::{Entity, EntitySource, EntityType, Relation, Span, merge_entities};
pub use error::{ExtractionError, LlmError, Result};
pub use extractor::{EntityExtractor, ExtractorConfig, Locale};
pub use llm::{LlmClient, LlmConfig, LlmEntityExtractor, OpenAiClient};
pub use relationship::{RelationPatterns, element_relations};
