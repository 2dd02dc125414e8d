//! Relation extraction between recognised entities.
//!
//! Placement and aspect relations come from surface patterns; five-element
//! relations are inferred from the element-bearing entities present.

use std::collections::HashMap;

use regex_lite::{Captures, Regex};

use crate::entity::{Entity, EntityType, Relation};
use crate::extractor::{CLASH_GLYPHS, COMBINE_GLYPHS, alternation};
use crate::lexicon::{self, BRANCHES};

/// Korean particles between a planet and the following sign or house.
const SUBJECT_PARTICLES: &str = "(?:이|가|은|는)?";

/// One compiled relation pattern.
struct RelationPattern {
    regex: Regex,
    build: fn(&RelationPatterns, &Captures<'_>) -> Option<Relation>,
}

/// Compiled relation patterns.
pub struct RelationPatterns {
    patterns: Vec<RelationPattern>,
    /// Lowercased surface to `(type, normalized)`.
    surfaces: HashMap<String, (EntityType, &'static str)>,
}

impl RelationPatterns {
    pub fn new() -> Self {
        let mut surfaces = HashMap::new();
        let mut latin: HashMap<EntityType, Vec<&'static str>> = HashMap::new();
        let mut native: HashMap<EntityType, Vec<&'static str>> = HashMap::new();
        for entry in lexicon::entries() {
            for &s in entry.latin {
                surfaces.insert(s.to_lowercase(), (entry.entity_type, entry.normalized));
                latin.entry(entry.entity_type).or_default().push(s);
            }
            for &s in entry.native {
                surfaces.insert(s.to_string(), (entry.entity_type, entry.normalized));
                native.entry(entry.entity_type).or_default().push(s);
            }
        }

        let alt = |map: &HashMap<EntityType, Vec<&'static str>>, t: EntityType| {
            alternation(map.get(&t).map(Vec::as_slice).unwrap_or_default())
        };
        let planet = alt(&latin, EntityType::Planet);
        let sign = alt(&latin, EntityType::Sign);
        let aspect = alt(&latin, EntityType::Aspect);
        let planet_ko = alt(&native, EntityType::Planet);
        let sign_ko = alt(&native, EntityType::Sign);
        let branch: String = BRANCHES
            .iter()
            .flat_map(|(h, c, _)| [*h, *c])
            .collect::<Vec<_>>()
            .join("");
        let pair_glyphs = CLASH_GLYPHS
            .iter()
            .chain(COMBINE_GLYPHS.iter())
            .copied()
            .collect::<Vec<_>>()
            .join("|");

        let specs: Vec<(String, fn(&RelationPatterns, &Captures<'_>) -> Option<Relation>)> = vec![
            (
                format!(r"(?i)\b({planet})\s+in\s+({sign})\b"),
                Self::in_sign,
            ),
            (
                format!(
                    r"(?i)\b({planet})\s+in\s+(?:the\s+)?(1[0-2]|[1-9])(?:st|nd|rd|th)\s+house\b"
                ),
                Self::in_house,
            ),
            (
                format!(r"(?i)\b({planet})\s+rules\s+({sign})\b"),
                Self::rules,
            ),
            (
                format!(r"(?i)\b({planet})\s+({aspect})\s+({planet})\b"),
                Self::aspect,
            ),
            (
                format!(r"({planet_ko}){SUBJECT_PARTICLES}\s*({sign_ko})에"),
                Self::in_sign,
            ),
            (
                format!(r"({planet_ko}){SUBJECT_PARTICLES}\s*(1[0-2]|[1-9])\s*(?:번째\s*)?(?:하우스|궁)"),
                Self::in_house,
            ),
            (
                format!(r"([{branch}])\s*(?:와|과|-|/)?\s*([{branch}])\s*(?:의\s*)?({pair_glyphs})"),
                Self::branch_pair,
            ),
        ];

        let patterns = specs
            .into_iter()
            .filter_map(|(pattern, build)| {
                Regex::new(&pattern)
                    .map_err(|e| tracing::warn!("Skipping relation pattern: {e}"))
                    .ok()
                    .map(|regex| RelationPattern { regex, build })
            })
            .collect();

        Self { patterns, surfaces }
    }

    /// Extract relations from `text` given its entities.
    ///
    /// Relations are deduplicated and returned in discovery order: surface
    /// patterns first, then five-element inference.
    pub fn extract(&self, text: &str, entities: &[Entity]) -> Vec<Relation> {
        let mut relations = Vec::new();
        for pattern in &self.patterns {
            for caps in pattern.regex.captures_iter(text) {
                if let Some(relation) = (pattern.build)(self, &caps) {
                    relations.push(relation);
                }
            }
        }
        relations.extend(element_relations(entities));

        let mut seen = std::collections::HashSet::new();
        relations.retain(|r| seen.insert(r.clone()));
        relations
    }

    fn node(&self, caps: &Captures<'_>, group: usize, expected: EntityType) -> Option<String> {
        let surface = caps.get(group)?.as_str();
        let key = surface.split_whitespace().collect::<Vec<_>>().join(" ");
        let (entity_type, normalized) = self
            .surfaces
            .get(&key.to_lowercase())
            .or_else(|| self.surfaces.get(&key))?;
        (*entity_type == expected).then(|| format!("{}:{normalized}", entity_type.node_type()))
    }

    fn in_sign(&self, caps: &Captures<'_>) -> Option<Relation> {
        Some(Relation::new(
            self.node(caps, 1, EntityType::Planet)?,
            "in_sign",
            self.node(caps, 2, EntityType::Sign)?,
        ))
    }

    fn in_house(&self, caps: &Captures<'_>) -> Option<Relation> {
        let house = caps.get(2)?.as_str();
        Some(Relation::new(
            self.node(caps, 1, EntityType::Planet)?,
            "in_house",
            format!("house:{house}"),
        ))
    }

    fn rules(&self, caps: &Captures<'_>) -> Option<Relation> {
        Some(Relation::new(
            self.node(caps, 1, EntityType::Planet)?,
            "rules",
            self.node(caps, 2, EntityType::Sign)?,
        ))
    }

    fn aspect(&self, caps: &Captures<'_>) -> Option<Relation> {
        let surface = caps.get(2)?.as_str().to_lowercase();
        let (_, aspect) = self.surfaces.get(&surface)?;
        Some(Relation::new(
            self.node(caps, 1, EntityType::Planet)?,
            *aspect,
            self.node(caps, 3, EntityType::Planet)?,
        ))
    }

    fn branch_pair(&self, caps: &Captures<'_>) -> Option<Relation> {
        let branch = |group: usize| {
            let glyph = caps.get(group)?.as_str();
            BRANCHES
                .iter()
                .find(|(h, c, _)| *h == glyph || *c == glyph)
                .map(|(h, _, _)| format!("branch:{h}"))
        };
        let (a, b) = (branch(1)?, branch(2)?);
        if a == b {
            return None;
        }
        let glyph = caps.get(3)?.as_str();
        let rel = if CLASH_GLYPHS.contains(&glyph) {
            "chung"
        } else {
            "yukhap"
        };
        Some(Relation::new(a, rel, b))
    }
}

impl Default for RelationPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// `generates` / `controls` between the distinct elements carried by
/// `entities`, in order of first appearance.
pub fn element_relations(entities: &[Entity]) -> Vec<Relation> {
    let mut elements: Vec<&str> = Vec::new();
    for entity in entities {
        if let Some(element) = lexicon::element_of(entity.entity_type, &entity.normalized)
            && !elements.contains(&element)
        {
            elements.push(element);
        }
    }

    let mut relations = Vec::new();
    for &a in &elements {
        for &b in &elements {
            if lexicon::generates(a, b) {
                relations.push(Relation::new(
                    format!("element:{a}"),
                    "generates",
                    format!("element:{b}"),
                ));
            } else if lexicon::controls(a, b) {
                relations.push(Relation::new(
                    format!("element:{a}"),
                    "controls",
                    format!("element:{b}"),
                ));
            }
        }
    }
    relations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{EntityExtractor, Locale};
    use pretty_assertions::assert_eq;

    fn triples(relations: &[Relation]) -> Vec<(&str, &str, &str)> {
        relations
            .iter()
            .map(|r| (r.src.as_str(), r.rel.as_str(), r.dst.as_str()))
            .collect()
    }

    #[test]
    fn test_astrology_relations() {
        let x = EntityExtractor::new();
        let text = "Jupiter in Sagittarius; Saturn in the 10th house; Venus rules Libra; Mars square Saturn";
        let relations = x.extract_relations(text, None);
        assert_eq!(
            triples(&relations),
            vec![
                ("planet:jupiter", "in_sign", "sign:sagittarius"),
                ("planet:saturn", "in_house", "house:10"),
                ("planet:venus", "rules", "sign:libra"),
                ("planet:mars", "square", "planet:saturn"),
            ]
        );
    }

    #[test]
    fn test_korean_placements() {
        let x = EntityExtractor::new();
        let relations = x.extract_relations("목성이 사수자리에 있고 토성은 10하우스에 있다", None);
        assert_eq!(
            triples(&relations),
            vec![
                ("planet:jupiter", "in_sign", "sign:sagittarius"),
                ("planet:saturn", "in_house", "house:10"),
            ]
        );
    }

    #[test]
    fn test_branch_pairs() {
        let x = EntityExtractor::new();
        let text = "자오충이 있고 子丑合도 있다";
        let relations = x.extract_relations(text, Some(x.extract(text, Locale::Ko).as_slice()));
        let pairs: Vec<_> = triples(&relations)
            .into_iter()
            .filter(|(_, rel, _)| *rel == "chung" || *rel == "yukhap")
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("branch:자", "chung", "branch:오"),
                ("branch:자", "yukhap", "branch:축"),
            ]
        );
    }

    #[test]
    fn test_element_inference() {
        let x = EntityExtractor::new();
        let entities = x.extract("갑목 일간에 병화가 있다", Locale::Ko);
        let relations = element_relations(&entities);
        assert_eq!(
            triples(&relations),
            vec![("element:wood", "generates", "element:fire")]
        );

        let entities = x.extract("water and fire", Locale::En);
        assert_eq!(
            triples(&element_relations(&entities)),
            vec![("element:water", "controls", "element:fire")]
        );
    }
}
