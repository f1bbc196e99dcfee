use std::sync::OnceLock;

use common::error::AppError;
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};

use crate::reader::ReaderChunk;

/// Token-aware splitting of raw extracted text into `ReaderChunk`s with no
/// images attached. Image-bearing readers (PDF page renderers, VLM-backed
/// scanners) build their `ReaderChunk`s directly instead of going through
/// this helper.
pub fn split_into_reader_chunks(
    text: &str,
    min_tokens: usize,
    max_tokens: usize,
    overlap_tokens: usize,
) -> Result<Vec<ReaderChunk>, AppError> {
    if min_tokens == 0 || max_tokens == 0 || min_tokens > max_tokens {
        return Err(AppError::Validation(
            "invalid chunk token bounds; ensure 0 < min <= max".into(),
        ));
    }
    if overlap_tokens >= min_tokens {
        return Err(AppError::Validation(format!(
            "chunk overlap must be smaller than the minimum chunk size of {min_tokens}"
        )));
    }

    let tokenizer = get_tokenizer()?;
    let capacity = ChunkCapacity::new(min_tokens)
        .with_max(max_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk token bounds: {e}")))?;
    let config = ChunkConfig::new(capacity)
        .with_overlap(overlap_tokens)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?
        .with_sizer(tokenizer);
    let splitter = TextSplitter::new(config);

    let chunks: Vec<ReaderChunk> = splitter
        .chunk_indices(text)
        .enumerate()
        .map(|(seq, (start, content))| ReaderChunk::new(seq as u32, content.to_owned(), start, start + content.len()))
        .collect();

    Ok(chunks)
}

fn get_tokenizer() -> Result<&'static tokenizers::Tokenizer, AppError> {
    static TOKENIZER: OnceLock<Result<tokenizers::Tokenizer, String>> = OnceLock::new();

    match TOKENIZER.get_or_init(|| {
        tokenizers::Tokenizer::from_pretrained("bert-base-cased", None)
            .map_err(|e| format!("failed to initialize tokenizer: {e}"))
    }) {
        Ok(tokenizer) => Ok(tokenizer),
        Err(err) => Err(AppError::InternalError(err.clone())),
    }
}
