//! # Retrieval Engine
//!
//! This crate composes the augur retrieval core into a query pipeline:
//!
//! - **Lanes**: dense vectors, BM25 and knowledge-graph traversal
//! - **Rerank and fusion**: cross-encoder or lexical rerank, weighted RRF
//! - **Context**: budgeted, citation-bearing prompt blocks
//! - **Tracing**: per-stage spans and process-level search metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Retrieval Engine                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  query ──► EXTRACT ──► EXPAND (HyDE) ──► RETRIEVE               │
//! │                                            │                    │
//! │                     ┌──────────────┬───────┴──────┐             │
//! │                     ▼              ▼              ▼             │
//! │               ┌──────────┐   ┌──────────┐   ┌──────────┐        │
//! │               │  Dense   │   │  Sparse  │   │  Graph   │        │
//! │               │ (HNSW)   │   │  (BM25)  │   │(PageRank)│        │
//! │               └──────────┘   └──────────┘   └──────────┘        │
//! │                     └──────────────┼──────────────┘             │
//! │                                    ▼                            │
//! │                  RERANK ──► FUSE (RRF) ──► BUILD ──► context    │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use augur_retrieval::{QueryRequest, RetrievalConfig, RetrievalEngine};
//!
//! let config = RetrievalConfig::load(None)?;
//! let engine = RetrievalEngine::init(config).await?;
//!
//! let response = engine
//!     .query(&QueryRequest::new("Jupiter in Sagittarius").with_domain("career"))
//!     .await?;
//! println!("{}", response.context.text);
//! ```

pub mod api;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod fusion;
pub mod hyde;
pub mod lanes;
pub mod metrics;
pub mod pipeline;
pub mod query_cache;
pub mod rerank;
pub mod trace;

pub use api::{
    ApiError, HealthResponse, InvalidateRequest, InvalidateResponse, QueryRequest, QueryResponse,
    QueryStats,
};
pub use config::{FeatureFlags, RetrievalConfig, TimeoutConfig};
pub use context::{BuiltContext, ContextEntry, ContextStyle};
pub use engine::{EngineBuilder, RetrievalEngine};
pub use error::{Result, RetrievalError, StageError};
pub use fusion::{FusedHit, Fusion, LaneRanking, LaneWeights};
pub use hyde::Hyde;
pub use lanes::{DenseLane, GraphLane, LaneOutput, LaneRequest, RetrievalLane, SparseLane, TagIndex};
pub use metrics::{Metrics, SearchMetrics};
pub use pipeline::Pipeline;
pub use query_cache::{QueryCache, QueryKey};
#[cfg(feature = "local-models")]
pub use rerank::CrossEncoderReranker;
pub use rerank::{LexicalReranker, RerankCandidate, Reranked, Reranker};
pub use trace::{PipelineState, Span, SpanStatus, Stage, Trace};

// Re-export from dependencies for convenience
pub use augur_corpus::Document;
pub use augur_extraction::{LlmClient, Locale};
pub use tokio_util::sync::CancellationToken;
