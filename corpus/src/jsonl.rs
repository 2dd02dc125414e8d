//! JSON Lines persistence for a built corpus.

use std::collections::HashSet;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::document::Document;
use crate::error::{CorpusError, Result};

/// Serialize documents into JSONL, one document per line.
pub fn to_jsonl(docs: &[Document]) -> Result<String> {
    let mut out = String::new();
    for doc in docs {
        out.push_str(&serde_json::to_string(doc)?);
        out.push('\n');
    }
    Ok(out)
}

/// SHA-256 over the JSONL serialization, hex encoded.
///
/// Equal to hashing the bytes written by [`write_jsonl`].
pub fn content_hash(docs: &[Document]) -> Result<String> {
    Ok(hash_bytes(to_jsonl(docs)?.as_bytes()))
}

/// Hash of an existing JSONL file, or `None` if it does not exist.
pub fn file_hash(path: &Path) -> Result<Option<String>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(hash_bytes(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn hash_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Write documents to `path` atomically (temp file, then rename).
pub fn write_jsonl(path: &Path, docs: &[Document]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let content = to_jsonl(docs)?;
    let temp_path = path.with_extension("jsonl.tmp");
    fs::write(&temp_path, content)?;
    fs::rename(&temp_path, path)?;

    debug!("Wrote {} documents to {}", docs.len(), path.display());
    Ok(())
}

/// Read and validate a JSONL corpus.
///
/// Every document must validate, `doc_id`s must be unique, and the lines must
/// be in canonical order.
pub fn read_jsonl(path: &Path) -> Result<Vec<Document>> {
    if !path.exists() {
        return Err(CorpusError::SourceMissing(path.to_path_buf()));
    }

    let reader = BufReader::new(fs::File::open(path)?);
    let mut docs: Vec<Document> = Vec::new();
    let mut ids = HashSet::new();

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = idx + 1;
        if line.trim().is_empty() {
            continue;
        }

        let doc: Document = serde_json::from_str(&line)
            .map_err(|e| CorpusError::parse(path, format!("line {line_no}: {e}")))?;
        doc.validate()?;

        if !ids.insert(doc.doc_id.clone()) {
            return Err(CorpusError::ConflictingDocId { doc_id: doc.doc_id });
        }
        if let Some(prev) = docs.last()
            && prev.canonical_cmp(&doc) != std::cmp::Ordering::Less
        {
            return Err(CorpusError::OutOfOrder { line: line_no });
        }
        docs.push(doc);
    }

    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DEFAULT_VERSION, DocType};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn rule(key: &str, text: &str) -> Document {
        Document::new(
            DocType::Rule,
            Some(format!("dream:{key}")),
            "general",
            None,
            None,
            text,
            "dream.json",
            DEFAULT_VERSION,
        )
        .with_tags(["kind:dream"])
    }

    #[test]
    fn test_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out/corpus.jsonl");
        let docs = vec![rule("fish", "Fish bring luck."), rule("snake", "Snakes warn.")];

        write_jsonl(&path, &docs).unwrap();
        assert_eq!(read_jsonl(&path).unwrap(), docs);
        assert!(!path.with_extension("jsonl.tmp").exists());
    }

    #[test]
    fn test_hash_matches_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let docs = vec![rule("fish", "Fish bring luck.")];

        assert_eq!(file_hash(&path).unwrap(), None);
        write_jsonl(&path, &docs).unwrap();
        assert_eq!(file_hash(&path).unwrap(), Some(content_hash(&docs).unwrap()));
    }

    #[test]
    fn test_out_of_order_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let docs = vec![rule("snake", "Snakes warn."), rule("fish", "Fish bring luck.")];
        fs::write(&path, to_jsonl(&docs).unwrap()).unwrap();

        let err = read_jsonl(&path).unwrap_err();
        assert!(matches!(err, CorpusError::OutOfOrder { line: 2 }));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        let docs = vec![rule("fish", "Fish bring luck."), rule("fish", "Fish again.")];
        fs::write(&path, to_jsonl(&docs).unwrap()).unwrap();

        let err = read_jsonl(&path).unwrap_err();
        assert!(matches!(err, CorpusError::ConflictingDocId { .. }));
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("corpus.jsonl");
        fs::write(&path, "{\"doc_id\": 3}\n").unwrap();

        let err = read_jsonl(&path).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
