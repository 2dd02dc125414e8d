//! Per-query trace of pipeline stages.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StageError;

/// A pipeline stage or retrieval lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extract,
    Expand,
    Retrieve,
    Dense,
    Sparse,
    Graph,
    Rerank,
    Fuse,
    Build,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Expand => "expand",
            Self::Retrieve => "retrieve",
            Self::Dense => "dense",
            Self::Sparse => "sparse",
            Self::Graph => "graph",
            Self::Rerank => "rerank",
            Self::Fuse => "fuse",
            Self::Build => "build",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the query state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Init,
    Extract,
    Expand,
    Retrieve,
    Rerank,
    Fuse,
    Build,
    Done,
    Error,
}

/// Outcome of one span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Ok,
    /// Disabled by a flag or without input.
    Skipped,
    StageTimeout,
    StageError,
    PipelineCancelled,
}

/// One recorded stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub stage: Stage,
    pub started_at: DateTime<Utc>,
    pub duration_ms: f64,
    /// Short hash of the stage input.
    pub inputs_hash: String,
    pub output_count: usize,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A running span; finish it with [`Trace::finish`].
#[derive(Debug)]
pub struct SpanGuard {
    stage: Stage,
    started_at: DateTime<Utc>,
    started: Instant,
    inputs_hash: String,
}

impl SpanGuard {
    pub fn start(stage: Stage, input: &str) -> Self {
        Self {
            stage,
            started_at: Utc::now(),
            started: Instant::now(),
            inputs_hash: inputs_hash(input),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }
}

/// Trace of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub state: PipelineState,
    pub spans: Vec<Span>,
    /// Whether the response came from the query cache.
    #[serde(default)]
    pub cached: bool,
}

impl Trace {
    pub fn new() -> Self {
        Self {
            trace_id: uuid::Uuid::new_v4().to_string(),
            state: PipelineState::Init,
            spans: Vec::new(),
            cached: false,
        }
    }

    pub fn enter(&mut self, state: PipelineState) {
        self.state = state;
    }

    /// Record a finished span.
    pub fn finish(&mut self, guard: SpanGuard, output_count: usize, status: SpanStatus) {
        self.record(guard, output_count, status, None);
    }

    /// Record a span that ended with a stage error.
    pub fn fail(&mut self, guard: SpanGuard, error: &StageError) {
        let status = match error {
            StageError::Timeout { .. } => SpanStatus::StageTimeout,
            StageError::Failed { .. } => SpanStatus::StageError,
        };
        self.record(guard, 0, status, Some(error.to_string()));
    }

    /// Record a stage that did not run.
    pub fn skip(&mut self, stage: Stage) {
        self.mark(stage, SpanStatus::Skipped);
    }

    /// Record a stage that did not run although it was asked for.
    pub fn skip_because(&mut self, stage: Stage, reason: &str) {
        self.record(
            SpanGuard::start(stage, ""),
            0,
            SpanStatus::Skipped,
            Some(reason.to_string()),
        );
    }

    /// Record an empty span for `stage` with `status`.
    pub fn mark(&mut self, stage: Stage, status: SpanStatus) {
        self.record(SpanGuard::start(stage, ""), 0, status, None);
    }

    fn record(
        &mut self,
        guard: SpanGuard,
        output_count: usize,
        status: SpanStatus,
        error: Option<String>,
    ) {
        self.spans.push(Span {
            stage: guard.stage,
            started_at: guard.started_at,
            duration_ms: guard.started.elapsed().as_secs_f64() * 1000.0,
            inputs_hash: guard.inputs_hash,
            output_count,
            status,
            error,
        });
    }

    /// Status of the last span recorded for `stage`.
    pub fn status_of(&self, stage: Stage) -> Option<&SpanStatus> {
        self.spans
            .iter()
            .rev()
            .find(|s| s.stage == stage)
            .map(|s| &s.status)
    }

    pub fn span(&self, stage: Stage) -> Option<&Span> {
        self.spans.iter().rev().find(|s| s.stage == stage)
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

/// First 16 hex digits of SHA-256 over `input`.
pub fn inputs_hash(input: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(input.as_bytes()));
    digest[..16].to_string()
}
