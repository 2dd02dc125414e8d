//! The corpus document model.
//!
//! Every retrieval lane addresses documents through the same `doc_id`, which
//! is derived deterministically from the identifying fields of a document.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CorpusError, Result};

/// Domain used when a source does not name one.
pub const DEFAULT_DOMAIN: &str = "general";

/// Corpus version used when the loader is not told otherwise.
pub const DEFAULT_VERSION: &str = "v1";

/// Kind of a corpus document.
///
/// Declaration order is the canonical corpus order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocType {
    /// One meaning of a tarot card in one orientation and domain.
    Card,
    /// A reading for a combination of cards.
    Combo,
    /// A keyed interpretation rule (dream, I-Ching, numerology, saju, ...).
    Rule,
    /// Free text lifted from an untyped source file.
    Corpus,
    /// Text attached to a knowledge-graph node.
    GraphNode,
}

impl DocType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::Combo => "combo",
            Self::Rule => "rule",
            Self::Corpus => "corpus",
            Self::GraphNode => "graph_node",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Orientation of a drawn tarot card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    Upright,
    Reversed,
}

impl Orientation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upright => "upright",
            Self::Reversed => "reversed",
        }
    }

    /// Parse the spellings found in source rule files.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "upright" | "up" | "정방향" | "정" => Some(Self::Upright),
            "reversed" | "reverse" | "down" | "역방향" | "역" => Some(Self::Reversed),
            _ => None,
        }
    }
}

/// A single retrievable unit of the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier shared by every index.
    pub doc_id: String,

    /// Kind of document.
    pub doc_type: DocType,

    /// Card, combo, rule key or node id this document belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<String>,

    /// Topical domain (`general`, `love`, `career`, ...).
    pub domain: String,

    /// Card orientation, only meaningful for cards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,

    /// Spread position or language variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,

    /// The document body.
    pub text: String,

    /// Sorted tag set.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Source file, relative to the corpus root.
    pub source: String,

    /// Corpus version.
    pub version: String,
}

impl Document {
    /// Create a document and derive its `doc_id`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        doc_type: DocType,
        card_id: Option<String>,
        domain: impl Into<String>,
        orientation: Option<Orientation>,
        position: Option<String>,
        text: impl Into<String>,
        source: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let domain = normalize_domain(&domain.into());
        let version = version.into();
        let doc_id = make_doc_id(
            card_id.as_deref(),
            orientation,
            &domain,
            position.as_deref(),
            &version,
        );
        Self {
            doc_id,
            doc_type,
            card_id,
            domain,
            orientation,
            position,
            text: text.into(),
            tags: BTreeSet::new(),
            source: source.into(),
            version,
        }
    }

    /// Add tags, normalizing their case.
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.add_tags(tags);
        self
    }

    /// Add tags in place.
    pub fn add_tags<I, S>(&mut self, tags: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if !tag.is_empty() {
                self.tags.insert(tag);
            }
        }
    }

    /// Whether the document carries the given tag.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag.to_lowercase())
    }

    /// Key used for duplicate detection: lowercased, whitespace collapsed.
    pub fn dedup_key(&self) -> String {
        crate::text::normalize_text(&self.text).to_lowercase()
    }

    /// Compare by canonical corpus order.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.doc_type
            .cmp(&other.doc_type)
            .then_with(|| self.card_id.cmp(&other.card_id))
            .then_with(|| self.orientation.cmp(&other.orientation))
            .then_with(|| self.domain.cmp(&other.domain))
            .then_with(|| self.position.cmp(&other.position))
            .then_with(|| self.doc_id.cmp(&other.doc_id))
    }

    /// Check the field set for the document type and the `doc_id` derivation.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| CorpusError::InvalidDocument {
            doc_id: self.doc_id.clone(),
            reason: reason.to_string(),
        };

        if self.text.trim().is_empty() {
            return Err(invalid("empty text"));
        }
        if self.domain.is_empty() {
            return Err(invalid("empty domain"));
        }
        if self.version.is_empty() {
            return Err(invalid("empty version"));
        }

        let has_card = self.card_id.as_deref().is_some_and(|c| !c.is_empty());
        match self.doc_type {
            DocType::Card => {
                if !has_card {
                    return Err(invalid("card documents require card_id"));
                }
                if self.orientation.is_none() {
                    return Err(invalid("card documents require orientation"));
                }
            }
            DocType::Combo | DocType::Rule | DocType::GraphNode => {
                if !has_card {
                    return Err(invalid("document type requires card_id"));
                }
                if self.orientation.is_some() {
                    return Err(invalid("orientation is only valid on cards"));
                }
            }
            DocType::Corpus => {
                if self.orientation.is_some() {
                    return Err(invalid("orientation is only valid on cards"));
                }
            }
        }

        let expected = make_doc_id(
            self.card_id.as_deref(),
            self.orientation,
            &self.domain,
            self.position.as_deref(),
            &self.version,
        );
        if expected != self.doc_id {
            return Err(invalid("doc_id does not match identifying fields"));
        }

        Ok(())
    }
}

/// Derive the stable document id from its identifying fields.
pub fn make_doc_id(
    card_id: Option<&str>,
    orientation: Option<Orientation>,
    domain: &str,
    position: Option<&str>,
    version: &str,
) -> String {
    let mut hasher = Sha256::new();
    let fields = [
        card_id.unwrap_or_default(),
        orientation.map(|o| o.as_str()).unwrap_or_default(),
        domain,
        position.unwrap_or_default(),
        version,
    ];
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(field.as_bytes());
    }
    let digest = format!("{:x}", hasher.finalize());
    format!("d_{}", &digest[..16])
}

/// Lowercase a domain label, falling back to [`DEFAULT_DOMAIN`].
pub fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().to_lowercase();
    if domain.is_empty() {
        DEFAULT_DOMAIN.to_string()
    } else {
        domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn card(domain: &str) -> Document {
        Document::new(
            DocType::Card,
            Some("the_fool".to_string()),
            domain,
            Some(Orientation::Upright),
            None,
            "A leap of faith.",
            "tarot/major.json",
            DEFAULT_VERSION,
        )
    }

    #[test]
    fn test_doc_id_is_deterministic() {
        assert_eq!(card("love").doc_id, card("love").doc_id);
        assert_ne!(card("love").doc_id, card("career").doc_id);
        assert!(card("love").doc_id.starts_with("d_"));
        assert_eq!(card("love").doc_id.len(), 18);
    }

    #[test]
    fn test_doc_id_ignores_text() {
        let mut other = card("love");
        other.text = "Something else entirely.".to_string();
        assert_eq!(other.doc_id, card("love").doc_id);
    }

    #[test]
    fn test_card_requires_orientation() {
        let doc = Document::new(
            DocType::Card,
            Some("the_fool".to_string()),
            "love",
            None,
            None,
            "text",
            "src",
            DEFAULT_VERSION,
        );
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_rule_rejects_orientation() {
        let doc = Document::new(
            DocType::Rule,
            Some("dream:snake".to_string()),
            "general",
            Some(Orientation::Reversed),
            None,
            "text",
            "src",
            DEFAULT_VERSION,
        );
        assert!(doc.validate().is_err());
    }

    #[test]
    fn test_tampered_doc_id_rejected() {
        let mut doc = card("love");
        doc.doc_id = "d_0000000000000000".to_string();
        assert!(doc.validate().is_err());
        assert!(card("love").validate().is_ok());
    }

    #[test]
    fn test_canonical_order() {
        let mut docs = vec![card("money"), card("love")];
        docs.push(Document::new(
            DocType::Rule,
            Some("dream:fish".to_string()),
            "general",
            None,
            None,
            "Fish dreams.",
            "dream.json",
            DEFAULT_VERSION,
        ));
        docs.sort_by(Document::canonical_cmp);
        let domains: Vec<_> = docs.iter().map(|d| d.domain.as_str()).collect();
        assert_eq!(domains, vec!["love", "money", "general"]);
    }

    #[test]
    fn test_orientation_parse() {
        assert_eq!(Orientation::parse("Reversed"), Some(Orientation::Reversed));
        assert_eq!(Orientation::parse("정방향"), Some(Orientation::Upright));
        assert_eq!(Orientation::parse("sideways"), None);
    }
}
