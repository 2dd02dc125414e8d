//! Rule files to JSONL corpus, and optionally the embedding cache.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use augur_corpus::{
    CorpusError, CorpusLoader, DEFAULT_VERSION, KoreanPolicy, LoaderConfig, content_hash,
    file_hash, write_jsonl,
};
use augur_embeddings::{CacheStatus, DEFAULT_MODEL, EmbeddingCache, ModelRegistry, RegistryConfig};
use augur_extraction::EntityExtractor;

use crate::error::{BuildError, Result};

/// Inputs of one corpus build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub source: PathBuf,
    pub output: PathBuf,
    pub version: String,
    pub korean_policy: KoreanPolicy,
    /// Tag documents with extracted graph node ids.
    pub tag_entities: bool,
    /// Overwrite an output whose content differs.
    pub force: bool,
    /// Also encode the corpus into this embedding cache.
    pub cache_dir: Option<PathBuf>,
    pub model: String,
}

impl BuildOptions {
    pub fn new(source: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            output: output.into(),
            version: DEFAULT_VERSION.to_string(),
            korean_policy: KoreanPolicy::default(),
            tag_entities: true,
            force: false,
            cache_dir: None,
            model: DEFAULT_MODEL.to_string(),
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(dir.into());
        self
    }
}

/// What happened to the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputStatus {
    /// No output existed.
    Created,
    /// The existing output already held these documents.
    Unchanged,
    /// A differing output was overwritten with `--force`.
    Replaced,
}

/// Summary printed after a build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub output: PathBuf,
    pub status: OutputStatus,
    pub documents: usize,
    pub files_loaded: usize,
    pub files_skipped: usize,
    pub duplicates: usize,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_cache: Option<CacheReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheReport {
    pub path: PathBuf,
    pub status: CacheStatus,
    pub model_id: String,
    pub data_hash: String,
}

/// Load the rule files under `options.source` and write the JSONL corpus.
///
/// Rebuilding unchanged sources leaves the output untouched. A differing
/// output is only replaced with `force`.
pub async fn build_corpus(options: &BuildOptions) -> Result<BuildReport> {
    if !options.source.exists() {
        return Err(BuildError::SourceMissing(options.source.clone()));
    }

    let loader_config = LoaderConfig {
        version: options.version.clone(),
        korean_policy: options.korean_policy,
        ..LoaderConfig::default()
    };
    let mut loader = CorpusLoader::with_config(loader_config);
    if options.tag_entities {
        loader = loader.with_tagger(Arc::new(EntityExtractor::new()).into_tagger());
    }
    let report = loader.load_with_report(&options.source)?;
    for (path, reason) in &report.files_skipped {
        warn!("Skipped {}: {reason}", path.display());
    }

    let built = content_hash(&report.documents)?;
    let existing = file_hash(&options.output).map_err(|e| unreadable(&options.output, e))?;
    let status = match existing {
        None => OutputStatus::Created,
        Some(existing) if existing == built => OutputStatus::Unchanged,
        Some(_) if options.force => OutputStatus::Replaced,
        Some(existing) => {
            return Err(BuildError::HashMismatch {
                path: options.output.clone(),
                existing,
                built,
            });
        }
    };

    if status == OutputStatus::Unchanged {
        info!("{} is up to date", options.output.display());
    } else {
        write_jsonl(&options.output, &report.documents)
            .map_err(|e| BuildError::unwritable(&options.output, e))?;
        info!(
            documents = report.documents.len(),
            hash = %built,
            "Wrote corpus to {}",
            options.output.display()
        );
    }

    let embedding_cache = match &options.cache_dir {
        Some(dir) => Some(build_cache(dir, &options.model, &report.documents).await?),
        None => None,
    };

    Ok(BuildReport {
        output: options.output.clone(),
        status,
        documents: report.documents.len(),
        files_loaded: report.files_loaded,
        files_skipped: report.files_skipped.len(),
        duplicates: report.duplicates,
        content_hash: built,
        embedding_cache,
    })
}

async fn build_cache(
    dir: &Path,
    model: &str,
    documents: &[augur_corpus::Document],
) -> Result<CacheReport> {
    if dir.exists() && !dir.is_dir() {
        return Err(BuildError::unwritable(dir, "not a directory"));
    }
    let registry = ModelRegistry::new(RegistryConfig::default());
    let model = registry.get_model(model).await?;
    let texts: Vec<String> = documents.iter().map(|doc| doc.text.clone()).collect();

    let cache = EmbeddingCache::new(dir);
    let outcome = cache.load_or_build(&texts, &model).await.map_err(|e| match e {
        augur_embeddings::EmbeddingError::Io(_) => BuildError::unwritable(dir, e),
        other => other.into(),
    })?;
    info!(
        status = ?outcome.status,
        data_hash = %outcome.data_hash,
        "Embedding cache ready in {}",
        dir.display()
    );
    Ok(CacheReport {
        path: cache.path_for(&outcome.model_id),
        status: outcome.status,
        model_id: outcome.model_id,
        data_hash: outcome.data_hash,
    })
}

/// An output path that exists but cannot be read is as good as unwritable.
fn unreadable(path: &Path, err: CorpusError) -> BuildError {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => BuildError::unwritable(path, "is a directory"),
        _ => BuildError::unwritable(path, err),
    }
}
