pub use common::utils::contracts::{ReaderChunk, ReaderImage};
