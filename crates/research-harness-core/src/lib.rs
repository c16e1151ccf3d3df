//! # Research Harness Core
//!
//! Shared, runtime-agnostic logic for Research Harness: the document pool
//! model, the read-only document index abstraction, embedding and
//! generation provider traits, the parse-and-validate boundary for
//! generated text, and the hybrid (semantic + lexical) search algorithm.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! Concrete providers, the SQLite index, and the research pipeline live in
//! the `research-harness` app crate.

pub mod embedding;
pub mod generation;
pub mod models;
pub mod outcome;
pub mod search;
pub mod store;

pub use models::{Pool, SearchHit};
pub use outcome::{Outcome, StageError};
