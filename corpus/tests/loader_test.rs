//! Integration tests for loading the fixture rule tree.

use std::path::PathBuf;

use augur_corpus::{
    CorpusLoader, DocType, KoreanPolicy, LoaderConfig, Orientation, content_hash, read_jsonl,
    write_jsonl,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join("rules")
}

#[test]
fn test_load_fixture_tree() {
    let report = CorpusLoader::new()
        .load_with_report(&fixtures_dir())
        .unwrap();

    assert_eq!(report.documents.len(), 16);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.files_loaded, 5);
    assert_eq!(report.files_skipped.len(), 1);
    assert!(report.files_skipped[0].0.ends_with("broken.json"));

    let count = |t: DocType| report.documents.iter().filter(|d| d.doc_type == t).count();
    assert_eq!(count(DocType::Card), 7);
    assert_eq!(count(DocType::Combo), 1);
    assert_eq!(count(DocType::Rule), 8);
}

#[test]
fn test_canonical_order_starts_with_cards() {
    let docs = CorpusLoader::new().load(&fixtures_dir()).unwrap();

    let first = &docs[0];
    assert_eq!(first.doc_type, DocType::Card);
    assert_eq!(first.card_id.as_deref(), Some("the_fool"));
    assert_eq!(first.orientation, Some(Orientation::Upright));
    assert_eq!(first.domain, "career");

    for pair in docs.windows(2) {
        assert!(pair[0].canonical_cmp(&pair[1]).is_lt());
    }
}

#[test]
fn test_hidden_and_graph_files_are_ignored() {
    let docs = CorpusLoader::new().load(&fixtures_dir()).unwrap();
    assert!(docs.iter().all(|d| !d.source.contains(".hidden")));
    assert!(docs.iter().all(|d| !d.source.contains("nodes_")));
}

#[test]
fn test_rule_fields_and_tags() {
    let docs = CorpusLoader::new().load(&fixtures_dir()).unwrap();

    let fish = docs
        .iter()
        .find(|d| d.card_id.as_deref() == Some("dream/symbols:fish"))
        .unwrap();
    assert_eq!(fish.domain, "money");
    assert!(fish.text.ends_with("Save part of any windfall."));
    assert!(fish.has_tag("kind:symbols"));

    let gap: Vec<_> = docs
        .iter()
        .filter(|d| d.card_id.as_deref() == Some("saju/stems:갑"))
        .collect();
    assert_eq!(gap.len(), 2);
    assert!(gap.iter().all(|d| d.has_tag("element:wood")));
    assert_eq!(gap[1].position.as_deref(), Some("ko"));

    let byeong = docs
        .iter()
        .find(|d| d.card_id.as_deref() == Some("saju/stems:병"))
        .unwrap();
    assert!(byeong.text.starts_with("병화는"));
}

#[test]
fn test_duplicate_keeps_first_in_walk_order() {
    let docs = CorpusLoader::new().load(&fixtures_dir()).unwrap();
    let pigs: Vec<_> = docs.iter().filter(|d| d.text.contains("pig")).collect();
    assert_eq!(pigs.len(), 1);
    assert_eq!(pigs[0].card_id.as_deref(), Some("dream/duplicates:pig_again"));
}

#[test]
fn test_merge_policy_reduces_documents() {
    let loader = CorpusLoader::with_config(LoaderConfig {
        korean_policy: KoreanPolicy::Merge,
        ..LoaderConfig::default()
    });
    let docs = loader.load(&fixtures_dir()).unwrap();
    assert_eq!(docs.len(), 14);
}

#[test]
fn test_loading_twice_is_identical() {
    let a = CorpusLoader::new().load(&fixtures_dir()).unwrap();
    let b = CorpusLoader::new().load(&fixtures_dir()).unwrap();
    assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
}

#[test]
fn test_jsonl_is_a_fixed_point() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("corpus.jsonl");
    let docs = CorpusLoader::new().load(&fixtures_dir()).unwrap();

    write_jsonl(&path, &docs).unwrap();
    let reread = read_jsonl(&path).unwrap();
    assert_eq!(reread, docs);

    let again = dir.path().join("again.jsonl");
    write_jsonl(&again, &reread).unwrap();
    assert_eq!(
        std::fs::read(&path).unwrap(),
        std::fs::read(&again).unwrap()
    );
}

#[test]
fn test_version_changes_ids() {
    let v1 = CorpusLoader::new().load(&fixtures_dir()).unwrap();
    let v2 = CorpusLoader::with_config(LoaderConfig {
        version: "v2".to_string(),
        ..LoaderConfig::default()
    })
    .load(&fixtures_dir())
    .unwrap();

    assert_eq!(v1.len(), v2.len());
    assert_ne!(v1[0].doc_id, v2[0].doc_id);
}
