//! Corpus model and loader for divinatory rule trees.
//!
//! This crate turns a directory of heterogeneous tarot, dream, astrology and
//! saju rule files into a flat, deduplicated list of [`Document`]s with
//! stable ids, and persists that list as JSON Lines.
//!
//! # Example
//!
//! ```ignore
//! use augur_corpus::{CorpusLoader, write_jsonl};
//!
//! let docs = CorpusLoader::new().load(Path::new("rules"))?;
//! write_jsonl(Path::new("out/corpus.jsonl"), &docs)?;
//! ```

pub mod document;
pub mod error;
pub mod jsonl;
pub mod loader;
pub mod text;

pub use document::{
    DEFAULT_DOMAIN, DEFAULT_VERSION, DocType, Document, Orientation, make_doc_id,
    normalize_domain,
};
pub use error::{CorpusError, Result};
pub use jsonl::{content_hash, file_hash, read_jsonl, to_jsonl, write_jsonl};
pub use loader::{CorpusLoader, KoreanPolicy, LoadReport, LoaderConfig, Tagger, slugify};
pub use text::{Tokenizer, TokenizerConfig, is_cjk, normalize_text, tokenize};
