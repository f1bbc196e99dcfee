#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod engine;
pub mod expansion;
pub mod faq;
pub mod fusion;
pub mod hybrid;
pub mod reranking;
pub mod scoring;

pub use engine::SurrealRetrieveEngine;
pub use expansion::MatchedChunk;
pub use hybrid::{hybrid_search, HybridSearchParams};
