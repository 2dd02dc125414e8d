//! Pattern-based entity extraction.
//!
//! Latin surfaces are matched with word-boundary regexes compiled once at
//! construction. Hangul and Han text is scanned token by token: a token
//! matches a lexicon surface exactly, after stripping a trailing particle,
//! or as a compound (`갑목`, `甲子`, `자오충`).

use std::collections::HashMap;
use std::sync::Arc;

use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::entity::{Entity, EntitySource, EntityType, Relation, merge_entities};
use crate::lexicon::{self, BRANCHES, ELEMENT_SYLLABLES, STEMS};
use crate::llm::LlmEntityExtractor;
use crate::relationship::RelationPatterns;

/// Korean particles that may trail a multi-syllable surface, longest first.
const PARTICLES: [&str; 23] = [
    "에서는", "으로", "에서", "에게", "이다", "이며", "이고", "처럼", "와의", "과의", "은", "는",
    "이", "가", "을", "를", "의", "에", "와", "과", "도", "로", "만",
];

/// Suffixes that mark a stem-branch pair as a pillar (갑자년, 병오일주).
const PILLAR_SUFFIXES: [&str; 8] = ["년", "월", "일", "시", "년주", "월주", "일주", "시주"];

/// Glyphs that mark a branch pair as a clash.
pub(crate) const CLASH_GLYPHS: [&str; 3] = ["충", "沖", "衝"];

/// Glyphs that mark a branch pair as a combination.
pub(crate) const COMBINE_GLYPHS: [&str; 2] = ["합", "合"];

/// Query or document language hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locale {
    Ko,
    En,
    #[default]
    Auto,
}

impl Locale {
    /// Parse a BCP 47-ish tag (`ko`, `ko-KR`, `en_US`).
    pub fn parse(tag: &str) -> Self {
        let lang = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_lowercase();
        match lang.as_str() {
            "ko" | "kr" => Self::Ko,
            "en" => Self::En,
            _ => Self::Auto,
        }
    }
}

/// Configuration for [`EntityExtractor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Entities below this confidence are dropped.
    pub min_confidence: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
        }
    }
}

struct LatinPattern {
    regex: Regex,
    entity_type: EntityType,
    normalized: &'static str,
}

/// Entity extractor over the built-in lexicon.
pub struct EntityExtractor {
    config: ExtractorConfig,
    latin: Vec<LatinPattern>,
    native: HashMap<&'static str, Vec<(EntityType, &'static str)>>,
    /// House patterns, flagged when they need a Latin word boundary.
    houses: Vec<(Regex, bool)>,
    relations: RelationPatterns,
}

impl EntityExtractor {
    /// Create an extractor with default configuration.
    pub fn new() -> Self {
        Self::with_config(ExtractorConfig::default())
    }

    /// Create an extractor with custom configuration.
    pub fn with_config(config: ExtractorConfig) -> Self {
        let mut latin = Vec::new();
        let mut native: HashMap<&'static str, Vec<(EntityType, &'static str)>> = HashMap::new();

        for entry in lexicon::entries() {
            if !entry.latin.is_empty() {
                let pattern = format!(r"(?i)\b(?:{})\b", alternation(entry.latin));
                match Regex::new(&pattern) {
                    Ok(regex) => latin.push(LatinPattern {
                        regex,
                        entity_type: entry.entity_type,
                        normalized: entry.normalized,
                    }),
                    Err(e) => warn!("Skipping pattern for {}: {e}", entry.normalized),
                }
            }
            for &surface in entry.native {
                native
                    .entry(surface)
                    .or_default()
                    .push((entry.entity_type, entry.normalized));
            }
        }
        for (hangul, hanja, _) in STEMS {
            native.entry(hangul).or_default().push((EntityType::Stem, hangul));
            native.entry(hanja).or_default().push((EntityType::Stem, hangul));
        }
        for (hangul, hanja, _) in BRANCHES {
            native.entry(hangul).or_default().push((EntityType::Branch, hangul));
            native.entry(hanja).or_default().push((EntityType::Branch, hangul));
        }

        let houses = [
            (r"(?i)\b(1[0-2]|[1-9])(?:st|nd|rd|th)\s+house\b", true),
            (r"(?i)\bhouse\s+(1[0-2]|[1-9])\b", true),
            (r"(?:제\s*)?(1[0-2]|[1-9])\s*(?:번째\s*)?(?:하우스|궁)", false),
        ]
        .into_iter()
        .filter_map(|(p, latin)| Regex::new(p).ok().map(|regex| (regex, latin)))
        .collect();

        Self {
            config,
            latin,
            native,
            houses,
            relations: RelationPatterns::new(),
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Extract entities from `text`, ordered by first mention.
    pub fn extract(&self, text: &str, locale: Locale) -> Vec<Entity> {
        let mut found = Vec::new();

        for pattern in &self.latin {
            for m in pattern.regex.find_iter(text) {
                if !latin_boundary(text, m.start(), m.end()) {
                    continue;
                }
                found.push(
                    Entity::new(m.as_str(), pattern.entity_type, pattern.normalized, 0.9)
                        .with_span(m.start(), m.end()),
                );
            }
        }

        for (regex, latin) in &self.houses {
            for caps in regex.captures_iter(text) {
                let (Some(whole), Some(number)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if *latin && !latin_boundary(text, whole.start(), whole.end()) {
                    continue;
                }
                found.push(
                    Entity::new(whole.as_str(), EntityType::House, number.as_str(), 0.9)
                        .with_span(whole.start(), whole.end()),
                );
            }
        }

        for (start, token) in native_tokens(text) {
            self.match_token(token, start, locale, &mut found);
        }

        found.sort_by(|a, b| {
            let a_start = a.span.map(|s| s.start).unwrap_or(usize::MAX);
            let b_start = b.span.map(|s| s.start).unwrap_or(usize::MAX);
            a_start
                .cmp(&b_start)
                .then_with(|| a.entity_type.cmp(&b.entity_type))
        });
        let entities: Vec<Entity> = merge_entities(found)
            .into_iter()
            .filter(|e| e.confidence >= self.config.min_confidence)
            .collect();
        debug!(count = entities.len(), "Extracted entities");
        entities
    }

    /// Pattern extraction augmented by an LLM pass. LLM failures fall back
    /// to the pattern result.
    pub async fn extract_with_llm(
        &self,
        text: &str,
        locale: Locale,
        llm: Option<&LlmEntityExtractor>,
    ) -> Vec<Entity> {
        let mut entities = self.extract(text, locale);
        if let Some(llm) = llm {
            match llm.extract(text).await {
                Ok(extra) => {
                    entities.extend(extra);
                    entities = merge_entities(entities)
                        .into_iter()
                        .filter(|e| e.confidence >= self.config.min_confidence)
                        .collect();
                }
                Err(e) => warn!("LLM entity extraction failed, using patterns only: {e}"),
            }
        }
        entities
    }

    /// Extract relations. Entities are extracted from `text` when not given.
    pub fn extract_relations(&self, text: &str, entities: Option<&[Entity]>) -> Vec<Relation> {
        match entities {
            Some(entities) => self.relations.extract(text, entities),
            None => {
                let entities = self.extract(text, Locale::Auto);
                self.relations.extract(text, &entities)
            }
        }
    }

    /// Graph node ids mentioned in `text`, sorted and deduplicated.
    pub fn tags(&self, text: &str) -> Vec<String> {
        let mut tags: Vec<String> = self
            .extract(text, Locale::Auto)
            .iter()
            .map(Entity::node_id)
            .collect();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Wrap the extractor as a document tagger.
    pub fn into_tagger(self: Arc<Self>) -> Arc<dyn Fn(&str) -> Vec<String> + Send + Sync> {
        Arc::new(move |text: &str| self.tags(text))
    }

    fn match_token(&self, token: &str, start: usize, locale: Locale, found: &mut Vec<Entity>) {
        let chars = token.chars().count();

        if let Some(hits) = self.native.get(token) {
            let single_hangul = chars == 1 && token.chars().all(is_hangul);
            if single_hangul && locale == Locale::En {
                return;
            }
            let confidence = if single_hangul { 0.6 } else { 0.9 };
            for &(entity_type, normalized) in hits {
                found.push(
                    Entity::new(token, entity_type, normalized, confidence)
                        .with_span(start, start + token.len()),
                );
            }
            return;
        }

        if let Some(compound) = compound(token) {
            for (entity_type, normalized, confidence) in compound {
                found.push(
                    Entity::new(token, entity_type, normalized, confidence)
                        .with_span(start, start + token.len()),
                );
            }
            return;
        }

        for particle in PARTICLES {
            let Some(base) = token.strip_suffix(particle) else {
                continue;
            };
            if base.chars().count() < 2 {
                continue;
            }
            let end = start + base.len();
            if let Some(hits) = self.native.get(base) {
                for &(entity_type, normalized) in hits {
                    found.push(
                        Entity::new(base, entity_type, normalized, 0.85).with_span(start, end),
                    );
                }
                return;
            }
            if let Some(compound) = compound(base) {
                for (entity_type, normalized, confidence) in compound {
                    found.push(
                        Entity::new(base, entity_type, normalized, confidence)
                            .with_span(start, end),
                    );
                }
                return;
            }
        }
    }
}

impl Default for EntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Regex alternation of literal surfaces; spaces match any whitespace run.
pub(crate) fn alternation(surfaces: &[&str]) -> String {
    let mut sorted: Vec<&str> = surfaces.to_vec();
    sorted.sort_by(|a, b| b.len().cmp(&a.len()));
    sorted
        .iter()
        .map(|s| regex_lite::escape(s).replace(' ', r"\s+"))
        .collect::<Vec<_>>()
        .join("|")
}

fn is_hangul(c: char) -> bool {
    matches!(c, '\u{AC00}'..='\u{D7A3}')
}

fn is_han(c: char) -> bool {
    matches!(c, '\u{3400}'..='\u{4DBF}' | '\u{4E00}'..='\u{9FFF}')
}

/// `\b` in regex-lite only sees ASCII, so check the neighbours of a Latin
/// match against Unicode letters. A trailing Korean particle is allowed.
fn latin_boundary(text: &str, start: usize, end: usize) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    if text[..start].chars().next_back().is_some_and(is_word) {
        return false;
    }
    let rest = &text[end..];
    let tail_len = rest
        .char_indices()
        .find(|&(_, c)| !is_word(c))
        .map_or(rest.len(), |(i, _)| i);
    let tail = &rest[..tail_len];
    tail.is_empty() || PARTICLES.contains(&tail)
}

/// Alphanumeric runs that contain Hangul or Han, with byte offsets.
fn native_tokens(text: &str) -> Vec<(usize, &str)> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        match (c.is_alphanumeric(), start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                tokens.push((s, &text[s..i]));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        tokens.push((s, &text[s..]));
    }
    tokens
        .into_iter()
        .filter(|(_, t)| t.chars().any(|c| is_hangul(c) || is_han(c)))
        .collect()
}

fn stem_index(glyph: &str) -> Option<usize> {
    STEMS.iter().position(|(h, c, _)| *h == glyph || *c == glyph)
}

fn branch_index(glyph: &str) -> Option<usize> {
    BRANCHES.iter().position(|(h, c, _)| *h == glyph || *c == glyph)
}

fn element_syllable(glyph: &str) -> Option<&'static str> {
    ELEMENT_SYLLABLES
        .iter()
        .find(|(h, c, _)| *h == glyph || *c == glyph)
        .map(|(_, _, e)| *e)
}

/// Split a token into its first two glyphs and the remainder.
pub(crate) fn split_pair(token: &str) -> Option<(&str, &str, &str)> {
    let mut indices = token.char_indices().map(|(i, _)| i).skip(1);
    let second = indices.next()?;
    let rest = indices.next().unwrap_or(token.len());
    Some((&token[..second], &token[second..rest], &token[rest..]))
}

/// Entities implied by a compound token.
fn compound(token: &str) -> Option<Vec<(EntityType, &'static str, f32)>> {
    let (first, second, rest) = split_pair(token)?;

    // Day-master forms: 갑목, 병화, 甲木.
    if rest.is_empty()
        && let (Some(s), Some(element)) = (stem_index(first), element_syllable(second))
        && STEMS[s].2 == element
    {
        return Some(vec![
            (EntityType::Stem, STEMS[s].0, 0.85),
            (EntityType::Element, element, 0.8),
        ]);
    }

    // Pillars: 甲子, 갑자년, 병오일주.
    let han_pair = first.chars().all(is_han) && second.chars().all(is_han);
    if ((rest.is_empty() && han_pair) || PILLAR_SUFFIXES.contains(&rest))
        && let (Some(s), Some(b)) = (stem_index(first), branch_index(second))
        && s % 2 == b % 2
    {
        return Some(vec![
            (EntityType::Stem, STEMS[s].0, 0.85),
            (EntityType::Branch, BRANCHES[b].0, 0.85),
        ]);
    }

    // Branch pairs: 자오충, 子午沖, 자축합.
    if (CLASH_GLYPHS.contains(&rest) || COMBINE_GLYPHS.contains(&rest))
        && let (Some(a), Some(b)) = (branch_index(first), branch_index(second))
        && a != b
    {
        return Some(vec![
            (EntityType::Branch, BRANCHES[a].0, 0.85),
            (EntityType::Branch, BRANCHES[b].0, 0.85),
        ]);
    }

    None
}

/// Entity from an LLM record, if its type is known.
pub(crate) fn llm_entity(
    text: &str,
    entity_type: &str,
    normalized: &str,
    confidence: f32,
) -> Option<Entity> {
    let entity_type = EntityType::parse(entity_type)?;
    let normalized = normalized.trim().to_lowercase().replace(' ', "_");
    if normalized.is_empty() {
        return None;
    }
    Some(Entity::new(text, entity_type, normalized, confidence).with_source(EntitySource::Llm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ids(entities: &[Entity]) -> Vec<String> {
        entities.iter().map(Entity::node_id).collect()
    }

    #[test]
    fn test_latin_word_boundaries() {
        let x = EntityExtractor::new();
        let entities = x.extract("Jupiter in Sagittarius, Mars square Saturn", Locale::En);
        assert_eq!(
            ids(&entities),
            vec![
                "planet:jupiter",
                "sign:sagittarius",
                "planet:mars",
                "aspect:square",
                "planet:saturn"
            ]
        );
        // No match inside a longer word.
        assert!(x.extract("Marsupial venusaur", Locale::En).is_empty());
    }

    #[test]
    fn test_latin_names_glued_to_other_letters() {
        let x = EntityExtractor::new();
        assert!(x.extract("Marsé Venuså", Locale::En).is_empty());
        assert!(x.extract("éVenus", Locale::En).is_empty());
        assert!(x.extract("3rd houseé", Locale::En).is_empty());

        let entities = x.extract("Jupiter가 Sagittarius에 있다", Locale::Auto);
        assert_eq!(ids(&entities), vec!["planet:jupiter", "sign:sagittarius"]);
        assert_eq!(entities[0].text, "Jupiter");
    }

    #[test]
    fn test_korean_particles() {
        let x = EntityExtractor::new();
        let entities = x.extract("목성이 사수자리에 있으면", Locale::Ko);
        assert_eq!(ids(&entities), vec!["planet:jupiter", "sign:sagittarius"]);
        assert_eq!(entities[0].text, "목성");
        assert_eq!(entities[0].span.map(|s| s.end), Some("목성".len()));
    }

    #[test]
    fn test_day_master_compound() {
        let x = EntityExtractor::new();
        let entities = x.extract("갑목 성격", Locale::Ko);
        assert_eq!(ids(&entities), vec!["element:wood", "stem:갑"]);

        let entities = x.extract("갑목은 곧다", Locale::Ko);
        assert!(ids(&entities).contains(&"stem:갑".to_string()));

        // A stem with a foreign element is not a day master.
        assert!(x.extract("신화", Locale::Ko).is_empty());
    }

    #[test]
    fn test_pillars_and_branch_pairs() {
        let x = EntityExtractor::new();
        assert_eq!(ids(&x.extract("甲子", Locale::Auto)), vec!["stem:갑", "branch:자"]);
        assert_eq!(ids(&x.extract("갑자년", Locale::Ko)), vec!["stem:갑", "branch:자"]);
        // Mismatched parity is not a pillar.
        assert!(x.extract("정오", Locale::Ko).is_empty());

        let entities = x.extract("자오충이 있다", Locale::Ko);
        assert_eq!(ids(&entities), vec!["branch:자", "branch:오"]);
    }

    #[test]
    fn test_houses() {
        let x = EntityExtractor::new();
        let entities = x.extract("Saturn in the 10th house", Locale::En);
        assert_eq!(ids(&entities), vec!["planet:saturn", "house:10"]);
        let entities = x.extract("토성이 10하우스에", Locale::Ko);
        assert!(ids(&entities).contains(&"house:10".to_string()));
    }

    #[test]
    fn test_single_syllables_need_korean_context() {
        let x = EntityExtractor::new();
        let ko = x.extract("일간이 갑 이다", Locale::Ko);
        assert_eq!(ids(&ko), vec!["stem:갑"]);
        assert_eq!(ko[0].confidence, 0.6);
        assert!(x.extract("stem 갑", Locale::En).is_empty());
    }

    #[test]
    fn test_tarot_and_tags() {
        let x = EntityExtractor::new();
        let tags = x.tags("The Tower card and the Fool; also Venus");
        assert_eq!(
            tags,
            vec!["planet:venus", "tarot_card:the_fool", "tarot_card:the_tower"]
        );
    }

    #[test]
    fn test_locale_parse() {
        assert_eq!(Locale::parse("ko-KR"), Locale::Ko);
        assert_eq!(Locale::parse("en_US"), Locale::En);
        assert_eq!(Locale::parse(""), Locale::Auto);
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("자오충"), Some(("자", "오", "충")));
        assert_eq!(split_pair("甲子"), Some(("甲", "子", "")));
        assert_eq!(split_pair("갑"), None);
    }
}
