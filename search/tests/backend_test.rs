//! Dense and sparse backends over the same corpus documents.

use pretty_assertions::assert_eq;

use augur_corpus::{DocType, Document};
use augur_embeddings::HashingProvider;
use augur_search::{
    Bm25Config, Bm25Index, DenseConfig, DenseIndex, IndexRow, SearchBackend, SearchFilter,
    SearchQuery,
};

fn documents() -> Vec<Document> {
    [
        ("jupiter", "career", "Jupiter in Sagittarius widens career horizons."),
        ("venus", "love", "Venus in Libra favors harmony in love."),
        ("saturn", "career", "Saturn in Capricorn rewards patient discipline."),
        ("snake", "health", "Dreaming of a snake signals a health warning."),
        ("gap", "general", "갑목 일간은 큰 나무처럼 곧다."),
    ]
    .into_iter()
    .map(|(key, domain, text)| {
        Document::new(
            DocType::Rule,
            Some(format!("test:{key}")),
            domain,
            None,
            None,
            text,
            "test.json",
            "v1",
        )
    })
    .collect()
}

fn rows(embedder: Option<&HashingProvider>) -> Vec<IndexRow> {
    documents()
        .iter()
        .map(|doc| IndexRow::from_document(doc, embedder.map(|e| e.embed_sync(&doc.text))))
        .collect()
}

fn top(index: &dyn SearchBackend, query: &SearchQuery) -> Option<String> {
    index
        .search(query)
        .unwrap()
        .first()
        .map(|hit| hit.doc_id.clone())
}

fn doc_id(key: &str) -> String {
    documents()
        .into_iter()
        .find(|d| d.card_id.as_deref() == Some(format!("test:{key}").as_str()))
        .unwrap()
        .doc_id
}

#[test]
fn test_dense_backends_agree() {
    let embedder = HashingProvider::default();
    let config = DenseConfig::default().with_brute_force_threshold(0);
    let hnsw = DenseIndex::build(&config, 384, rows(Some(&embedder))).unwrap();
    let brute = DenseIndex::build(&config.with_ann(false), 384, rows(Some(&embedder))).unwrap();
    assert_eq!(hnsw.name(), "hnsw");
    assert_eq!(brute.name(), "brute");

    let query = SearchQuery::vector(embedder.embed_sync("Jupiter in Sagittarius career"), 3);
    assert_eq!(top(&hnsw, &query), Some(doc_id("jupiter")));
    assert_eq!(top(&brute, &query), Some(doc_id("jupiter")));
}

#[test]
fn test_bm25_tolerates_misspelling() {
    let index = Bm25Index::with_rows(Bm25Config::default(), rows(None));
    let query = SearchQuery::text("Juppiter Saggitarius", 5);
    assert_eq!(top(&index, &query), Some(doc_id("jupiter")));

    let korean = SearchQuery::text("갑목", 5);
    assert_eq!(top(&index, &korean), Some(doc_id("gap")));
}

#[test]
fn test_domain_filter_on_both_lanes() {
    let embedder = HashingProvider::default();
    let dense =
        DenseIndex::build(&DenseConfig::default(), 384, rows(Some(&embedder))).unwrap();
    let sparse = Bm25Index::with_rows(Bm25Config::default(), rows(None));
    let filter = SearchFilter::new().with_domain("love");

    let dense_hits = dense
        .search(
            &SearchQuery::vector(embedder.embed_sync("Saturn discipline"), 5)
                .with_filter(filter.clone()),
        )
        .unwrap();
    let sparse_hits = sparse
        .search(&SearchQuery::text("Venus harmony", 5).with_filter(filter))
        .unwrap();

    for hit in dense_hits.iter().chain(&sparse_hits) {
        assert!(hit.doc_id == doc_id("venus") || hit.doc_id == doc_id("gap"));
    }
    assert_eq!(
        sparse_hits.first().map(|h| h.doc_id.clone()),
        Some(doc_id("venus"))
    );
}
