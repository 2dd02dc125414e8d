//! Pattern extraction merged with a scripted LLM.

use std::sync::Arc;

use async_trait::async_trait;
use augur_extraction::{
    EntityExtractor, EntitySource, LlmClient, LlmEntityExtractor, LlmError, Locale,
};
use pretty_assertions::assert_eq;

struct ScriptedLlm {
    reply: Result<String, u16>,
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &str, _max_tokens: usize) -> Result<String, LlmError> {
        match &self.reply {
            Ok(text) => Ok(text.clone()),
            Err(status) => Err(LlmError::Api {
                status: *status,
                body: "boom".to_string(),
            }),
        }
    }
}

fn llm(reply: Result<&str, u16>) -> LlmEntityExtractor {
    LlmEntityExtractor::new(Arc::new(ScriptedLlm {
        reply: reply.map(str::to_string),
    }))
}

#[tokio::test]
async fn test_llm_entities_merge_with_patterns() {
    let extractor = EntityExtractor::new();
    let llm = llm(Ok(r#"[
        {"text": "Jupiter", "type": "planet", "normalized": "jupiter", "confidence": 0.95},
        {"text": "도화", "type": "shinsal", "normalized": "도화살", "confidence": 0.3},
        {"text": "expansion", "type": "aspect", "normalized": "great_trine", "confidence": 0.8}
    ]"#));

    let entities = extractor
        .extract_with_llm("Jupiter in Sagittarius", Locale::En, Some(&llm))
        .await;
    let ids: Vec<String> = entities.iter().map(|e| e.node_id()).collect();
    assert_eq!(
        ids,
        vec!["planet:jupiter", "sign:sagittarius", "aspect:great_trine"]
    );
    // The higher-confidence LLM record replaces the pattern match.
    assert_eq!(entities[0].source, EntitySource::Llm);
}

#[tokio::test]
async fn test_llm_failure_falls_back_to_patterns() {
    let extractor = EntityExtractor::new();
    let llm = llm(Err(500));
    let with_llm = extractor
        .extract_with_llm("목성이 사수자리에", Locale::Ko, Some(&llm))
        .await;
    assert_eq!(with_llm, extractor.extract("목성이 사수자리에", Locale::Ko));
}

#[test]
fn test_tagger_matches_tags() {
    let extractor = Arc::new(EntityExtractor::new());
    let tagger = Arc::clone(&extractor).into_tagger();
    let text = "갑목 일간과 the Tower card";
    assert_eq!(tagger(text), extractor.tags(text));
    assert_eq!(
        tagger(text),
        vec!["element:wood", "stem:갑", "tarot_card:the_tower"]
    );
}
