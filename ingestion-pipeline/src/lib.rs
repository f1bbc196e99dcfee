#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunking;
pub mod create_knowledge;
pub mod dedup;
pub mod process_chunks;
pub mod reader;

pub use process_chunks::{process_chunks, ProcessChunksOutcome};
pub use reader::{ReaderChunk, ReaderImage};
