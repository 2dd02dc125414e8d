//! Extracted entities and relations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Closed set of entity types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Planet,
    Sign,
    House,
    Aspect,
    Element,
    /// Heavenly stem (천간).
    Stem,
    /// Earthly branch (지지).
    Branch,
    /// Ten gods (십성).
    TenGod,
    /// Auspicious and inauspicious stars (신살).
    Shinsal,
    /// Major arcana.
    Tarot,
}

impl EntityType {
    pub const ALL: [EntityType; 10] = [
        Self::Planet,
        Self::Sign,
        Self::House,
        Self::Aspect,
        Self::Element,
        Self::Stem,
        Self::Branch,
        Self::TenGod,
        Self::Shinsal,
        Self::Tarot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planet => "planet",
            Self::Sign => "sign",
            Self::House => "house",
            Self::Aspect => "aspect",
            Self::Element => "element",
            Self::Stem => "stem",
            Self::Branch => "branch",
            Self::TenGod => "ten_god",
            Self::Shinsal => "shinsal",
            Self::Tarot => "tarot",
        }
    }

    /// Prefix of graph node ids and document tags for this type.
    pub fn node_type(&self) -> &'static str {
        match self {
            Self::Tarot => "tarot_card",
            other => other.as_str(),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().to_lowercase().replace([' ', '-'], "_");
        match value.as_str() {
            "tarot_card" | "card" => Some(Self::Tarot),
            "tengod" | "ten_gods" => Some(Self::TenGod),
            _ => Self::ALL.into_iter().find(|t| t.as_str() == value),
        }
    }
}

/// Where an entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitySource {
    Pattern,
    Llm,
}

/// Byte range of a mention in the input text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// An extracted entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Surface text as it appeared.
    pub text: String,

    pub entity_type: EntityType,

    /// Canonical key (`jupiter`, `갑`, `wood`, `the_fool`).
    pub normalized: String,

    /// In `[0, 1]`.
    pub confidence: f32,

    pub source: EntitySource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span: Option<Span>,
}

impl Entity {
    pub fn new(
        text: impl Into<String>,
        entity_type: EntityType,
        normalized: impl Into<String>,
        confidence: f32,
    ) -> Self {
        Self {
            text: text.into(),
            entity_type,
            normalized: normalized.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: EntitySource::Pattern,
            span: None,
        }
    }

    pub fn with_span(mut self, start: usize, end: usize) -> Self {
        self.span = Some(Span { start, end });
        self
    }

    pub fn with_source(mut self, source: EntitySource) -> Self {
        self.source = source;
        self
    }

    /// Graph node id / document tag, e.g. `planet:jupiter`.
    pub fn node_id(&self) -> String {
        format!("{}:{}", self.entity_type.node_type(), self.normalized)
    }

    /// Whether two entities denote the same concept.
    pub fn is_same_as(&self, other: &Entity) -> bool {
        self.entity_type == other.entity_type && self.normalized == other.normalized
    }
}

/// Merge entities by `(normalized, type)`, keeping the higher-confidence
/// record. The result is ordered by first appearance.
pub fn merge_entities(entities: impl IntoIterator<Item = Entity>) -> Vec<Entity> {
    let mut merged: Vec<Entity> = Vec::new();
    let mut positions: HashMap<(EntityType, String), usize> = HashMap::new();
    for entity in entities {
        let key = (entity.entity_type, entity.normalized.clone());
        match positions.get(&key) {
            Some(&i) => {
                if entity.confidence > merged[i].confidence {
                    merged[i] = entity;
                }
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(entity);
            }
        }
    }
    merged
}

/// A typed relation between two graph nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Relation {
    /// Node id of the source.
    pub src: String,
    pub rel: String,
    /// Node id of the target.
    pub dst: String,
}

impl Relation {
    pub fn new(src: impl Into<String>, rel: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            rel: rel.into(),
            dst: dst.into(),
        }
    }
}
