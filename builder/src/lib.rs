//! # Augur builder
//!
//! Offline tooling for the retrieval core:
//!
//! - **build**: rule files to a canonical JSONL corpus, plus the embedding
//!   cache when asked
//! - **query**: one query against a freshly initialized engine
//!
//! Exit codes of the `augur` binary are listed in [`exit_code`].

pub mod corpus;
pub mod error;
pub mod query;

pub use corpus::{BuildOptions, BuildReport, CacheReport, OutputStatus, build_corpus};
pub use error::{BuildError, Result, exit_code, exit_code_for};
pub use query::{QueryOptions, error_body, parse_flags, run_query};
