//! Graph node and edge records.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A graph node. `id` uses the tag form `<type>:<normalized>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub node_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Domains the node is relevant to.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub domain_tags: BTreeSet<String>,
}

impl GraphNode {
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        node_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            node_type: node_type.into(),
            description: None,
            domain_tags: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_domain_tag(mut self, domain: impl Into<String>) -> Self {
        self.domain_tags.insert(domain.into());
        self
    }
}

/// A directed, weighted edge.
///
/// An edge with no `domain` (or the `general` domain) applies to every
/// query; any other domain restricts it to queries in that domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub src: String,
    pub dst: String,
    pub rel: String,
    /// Strictly positive.
    pub weight: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl GraphEdge {
    pub fn new(
        src: impl Into<String>,
        dst: impl Into<String>,
        rel: impl Into<String>,
        weight: f32,
    ) -> Self {
        Self {
            src: src.into(),
            dst: dst.into(),
            rel: rel.into(),
            weight,
            domain: None,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    /// Whether the edge may be followed for a query in `domain`.
    pub fn applies_to(&self, domain: Option<&str>) -> bool {
        match (self.domain.as_deref(), domain) {
            (None | Some(GENERAL_DOMAIN), _) => true,
            (Some(_), None) => true,
            (Some(edge), Some(query)) => edge == query,
        }
    }

    pub fn family(&self) -> RelationFamily {
        RelationFamily::of(&self.rel)
    }
}

/// Domain label that matches every query.
pub const GENERAL_DOMAIN: &str = "general";

/// Coarse grouping of relation names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationFamily {
    /// Five-element production (wood feeds fire).
    Generative,
    /// Five-element control (water quenches fire).
    Controlling,
    /// Combinations and easy aspects.
    Harmonic,
    /// Clashes, punishments and hard aspects.
    Clashing,
    /// Membership and placement (in_sign, rules, has_element).
    Structural,
}

impl RelationFamily {
    pub fn of(rel: &str) -> Self {
        match rel {
            "generates" | "produces" | "supports" => Self::Generative,
            "controls" | "restrains" => Self::Controlling,
            "yukhap" | "samhap" | "banghap" | "combines" | "trine" | "sextile" => Self::Harmonic,
            "chung" | "hyeong" | "pa" | "hae" | "clashes" | "square" | "opposition" => {
                Self::Clashing
            }
            _ => Self::Structural,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Controlling => "controlling",
            Self::Harmonic => "harmonic",
            Self::Clashing => "clashing",
            Self::Structural => "structural",
        }
    }
}

/// Build a node id from a type and a surface key.
pub fn node_id(node_type: &str, key: &str) -> String {
    format!("{node_type}:{}", key.trim().to_lowercase().replace(' ', "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_node_id() {
        assert_eq!(node_id("planet", "Jupiter"), "planet:jupiter");
        assert_eq!(node_id("tarot_card", "The Fool"), "tarot_card:the_fool");
        assert_eq!(node_id("stem", "갑"), "stem:갑");
    }

    #[test]
    fn test_edge_domain_rules() {
        let open = GraphEdge::new("a", "b", "generates", 1.0);
        let general = open.clone().with_domain("general");
        let love = open.clone().with_domain("love");

        assert!(open.applies_to(Some("career")));
        assert!(general.applies_to(Some("career")));
        assert!(love.applies_to(Some("love")));
        assert!(!love.applies_to(Some("career")));
        assert!(love.applies_to(None));
    }

    #[test]
    fn test_relation_families() {
        assert_eq!(RelationFamily::of("generates"), RelationFamily::Generative);
        assert_eq!(RelationFamily::of("chung"), RelationFamily::Clashing);
        assert_eq!(RelationFamily::of("yukhap"), RelationFamily::Harmonic);
        assert_eq!(RelationFamily::of("in_sign"), RelationFamily::Structural);
    }
}
