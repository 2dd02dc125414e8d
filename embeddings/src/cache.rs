//! On-disk embedding cache keyed by model and corpus texts.
//!
//! File layout:
//!
//! ```text
//! magic "AUGEMB\0\0" | u32 format version | u32 header length | JSON header | f16 matrix
//! ```
//!
//! All integers and floats are little-endian. The matrix is stored as float16
//! and promoted to float32 on load.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::matrix::EmbeddingMatrix;
use crate::registry::Model;

const MAGIC: &[u8; 8] = b"AUGEMB\0\0";
const FORMAT_VERSION: u32 = 1;
const PREAMBLE_LEN: usize = MAGIC.len() + 8;

/// Header stored in front of the matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHeader {
    pub model_id: String,
    pub data_hash: String,
    pub count: usize,
    pub dim: usize,
    pub dtype: String,
    pub texts: Vec<String>,
}

/// How a [`CacheOutcome`] was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Read from a valid cache file.
    Hit,
    /// No cache file existed; encoded and written.
    Built,
    /// A stale or corrupt file was replaced.
    Rebuilt,
}

/// Embeddings for a corpus, either loaded or freshly built.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub texts: Vec<String>,
    pub matrix: EmbeddingMatrix,
    pub data_hash: String,
    pub model_id: String,
    pub status: CacheStatus,
}

/// Hash identifying a `(model, texts)` pair.
pub fn data_hash(model_id: &str, texts: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(texts.join("\n").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Directory-backed cache of embedding matrices, one file per model.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    /// Create a cache rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file used for a model id.
    pub fn path_for(&self, model_id: &str) -> PathBuf {
        let safe: String = model_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{safe}.emb"))
    }

    /// Whether a valid cache exists for `texts` under `model_id`.
    pub async fn is_valid(&self, model_id: &str, texts: &[String]) -> bool {
        let path = self.path_for(model_id);
        match read_cache(&path).await {
            Ok(Some((header, _))) => {
                header.count == texts.len() && header.data_hash == data_hash(model_id, texts)
            }
            _ => false,
        }
    }

    /// Load embeddings for `texts`, encoding and persisting them on a miss.
    pub async fn load_or_build(&self, texts: &[String], model: &Model) -> Result<CacheOutcome> {
        let model_id = model.model_id().to_string();
        let hash = data_hash(&model_id, texts);
        let path = self.path_for(&model_id);

        let status = match read_cache(&path).await {
            Ok(None) => CacheStatus::Built,
            Ok(Some((header, matrix))) => {
                match check_header(&path, &header, &model_id, &hash, texts.len()) {
                    Ok(true) => {
                        info!("Embedding cache hit for {model_id} ({} rows)", header.count);
                        return Ok(CacheOutcome {
                            texts: header.texts,
                            matrix,
                            data_hash: hash,
                            model_id,
                            status: CacheStatus::Hit,
                        });
                    }
                    Ok(false) => {
                        info!("Embedding cache stale for {model_id}; rebuilding");
                        CacheStatus::Rebuilt
                    }
                    Err(e) => {
                        warn!("{e}; rebuilding");
                        CacheStatus::Rebuilt
                    }
                }
            }
            Err(e) => {
                warn!("{e}; rebuilding");
                CacheStatus::Rebuilt
            }
        };

        let matrix = model.encode(texts, true).await?;
        let header = CacheHeader {
            model_id: model_id.clone(),
            data_hash: hash.clone(),
            count: texts.len(),
            dim: matrix.dim(),
            dtype: "f16".to_string(),
            texts: texts.to_vec(),
        };
        self.write(&path, &header, &matrix).await?;

        // Hand back the float16-rounded values so a later hit is bit-identical.
        let stored =
            EmbeddingMatrix::from_f16_bytes(&matrix.to_f16_bytes(), matrix.rows(), matrix.dim())
                .ok_or_else(|| EmbeddingError::corrupt(&path, "matrix size mismatch"))?;

        Ok(CacheOutcome {
            texts: texts.to_vec(),
            matrix: stored,
            data_hash: hash,
            model_id,
            status,
        })
    }

    /// Write a cache file atomically.
    async fn write(
        &self,
        path: &Path,
        header: &CacheHeader,
        matrix: &EmbeddingMatrix,
    ) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;

        let header_json = serde_json::to_vec(header)?;
        let header_len = u32::try_from(header_json.len())
            .map_err(|_| EmbeddingError::corrupt(path, "header too large"))?;

        let body = matrix.to_f16_bytes();
        let mut bytes = Vec::with_capacity(PREAMBLE_LEN + header_json.len() + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&header_len.to_le_bytes());
        bytes.extend_from_slice(&header_json);
        bytes.extend_from_slice(&body);

        let temp_path = path.with_extension("emb.tmp");
        fs::write(&temp_path, &bytes).await?;
        fs::rename(&temp_path, path).await?;

        debug!("Wrote {} embeddings to {}", header.count, path.display());
        Ok(())
    }
}

/// Returns `Ok(true)` for a usable cache, `Ok(false)` for a stale one.
fn check_header(
    path: &Path,
    header: &CacheHeader,
    model_id: &str,
    hash: &str,
    expected_count: usize,
) -> Result<bool> {
    if header.count != expected_count {
        return Err(EmbeddingError::corrupt(
            path,
            format!("count {} does not match {expected_count} texts", header.count),
        ));
    }
    Ok(header.model_id == model_id && header.data_hash == hash)
}

/// Read a cache file. `Ok(None)` if it does not exist.
async fn read_cache(path: &Path) -> Result<Option<(CacheHeader, EmbeddingMatrix)>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    parse_cache(path, &bytes).map(Some)
}

fn parse_cache(path: &Path, bytes: &[u8]) -> Result<(CacheHeader, EmbeddingMatrix)> {
    if bytes.len() < PREAMBLE_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(EmbeddingError::corrupt(path, "bad magic"));
    }

    let read_u32 = |at: usize| {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&bytes[at..at + 4]);
        u32::from_le_bytes(buf) as usize
    };
    let version = read_u32(MAGIC.len());
    if version != FORMAT_VERSION as usize {
        return Err(EmbeddingError::corrupt(
            path,
            format!("unsupported format version {version}"),
        ));
    }

    let header_len = read_u32(MAGIC.len() + 4);
    let header_end = PREAMBLE_LEN
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .ok_or_else(|| EmbeddingError::corrupt(path, "truncated header"))?;

    let header: CacheHeader = serde_json::from_slice(&bytes[PREAMBLE_LEN..header_end])
        .map_err(|e| EmbeddingError::corrupt(path, format!("bad header: {e}")))?;
    if header.dtype != "f16" {
        return Err(EmbeddingError::corrupt(
            path,
            format!("unsupported dtype {}", header.dtype),
        ));
    }
    if header.texts.len() != header.count {
        return Err(EmbeddingError::corrupt(path, "text count mismatch"));
    }

    let matrix = EmbeddingMatrix::from_f16_bytes(&bytes[header_end..], header.count, header.dim)
        .ok_or_else(|| EmbeddingError::corrupt(path, "truncated matrix"))?;

    Ok((header, matrix))
}
