use std::collections::{HashMap, HashSet};

use common::storage::types::chunk::Chunk;
use serde::{Deserialize, Serialize};

use crate::entry::FaqEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportMode {
    Append,
    Replace,
}

/// The result of diffing an import payload against a KB's existing FAQ chunks.
#[derive(Debug, Default)]
pub struct FaqDiff {
    pub to_create: Vec<FaqEntry>,
    pub to_delete: Vec<Chunk>,
}

/// Deduplicates `entries` against themselves (by content hash, first-seen wins)
/// and, in append mode, against `existing`. Replace mode keeps every entry —
/// its collisions are resolved by `plan_replace` below.
pub fn dedup_entries(entries: Vec<FaqEntry>, existing: &[Chunk], mode: ImportMode) -> Vec<FaqEntry> {
    let mut seen = HashSet::new();
    let existing_hashes: HashSet<&str> = existing.iter().filter_map(|c| c.content_hash.as_deref()).collect();

    entries
        .into_iter()
        .filter(|entry| {
            let hash = entry.content_hash();
            if !seen.insert(hash.clone()) {
                return false;
            }
            if mode == ImportMode::Append && existing_hashes.contains(hash.as_str()) {
                return false;
            }
            true
        })
        .collect()
}

/// Append mode: every surviving entry (after `dedup_entries`) is new; nothing
/// is deleted. The caller truncates the remaining list by `processed` on
/// resume — that's a queue-layer concern, not this diff's.
pub fn plan_append(entries: Vec<FaqEntry>) -> FaqDiff {
    FaqDiff {
        to_create: entries,
        to_delete: Vec::new(),
    }
}

/// Replace mode: computes `{to-create, to-delete}` via content-hash diff.
/// Chunks whose hash reappears in the payload are left untouched (no
/// re-index); chunks whose hash no longer appears are deleted; payload
/// entries whose hash has no existing match are created.
pub fn plan_replace(entries: Vec<FaqEntry>, existing: &[Chunk]) -> FaqDiff {
    let incoming_hashes: HashMap<String, &FaqEntry> = entries.iter().map(|e| (e.content_hash(), e)).collect();
    let existing_hashes: HashSet<&str> = existing.iter().filter_map(|c| c.content_hash.as_deref()).collect();

    let to_delete: Vec<Chunk> = existing
        .iter()
        .filter(|chunk| {
            chunk
                .content_hash
                .as_deref()
                .is_none_or(|hash| !incoming_hashes.contains_key(hash))
        })
        .cloned()
        .collect();

    let to_create: Vec<FaqEntry> = entries
        .into_iter()
        .filter(|entry| !existing_hashes.contains(entry.content_hash().as_str()))
        .collect();

    FaqDiff { to_create, to_delete }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::ChunkType;

    fn entry(question: &str, answer: &str) -> FaqEntry {
        FaqEntry {
            category: None,
            standard_question: question.into(),
            similar_questions: vec![],
            negative_questions: vec![],
            answers: vec![answer.into()],
            reply_all: true,
            disabled: false,
            forbid_recommendation: false,
        }
    }

    fn existing_chunk_with_hash(hash: &str) -> Chunk {
        let mut chunk = Chunk::new("t1".into(), "k1".into(), "kb1".into(), 0, "q".into(), ChunkType::Faq);
        chunk.content_hash = Some(hash.into());
        chunk
    }

    #[test]
    fn append_mode_skips_entries_already_in_the_kb() {
        let existing_entry = entry("a", "1");
        let existing = vec![existing_chunk_with_hash(&existing_entry.content_hash())];

        let entries = vec![existing_entry, entry("b", "2")];
        let deduped = dedup_entries(entries, &existing, ImportMode::Append);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].standard_question, "b");
    }

    #[test]
    fn replace_mode_diffs_abc_to_bcd() {
        // Existing chunks A, B, C; payload produces hashes matching B, C, and new D.
        let a = entry("a", "1");
        let b = entry("b", "2");
        let c = entry("c", "3");
        let d = entry("d", "4");

        let existing = vec![
            existing_chunk_with_hash(&a.content_hash()),
            existing_chunk_with_hash(&b.content_hash()),
            existing_chunk_with_hash(&c.content_hash()),
        ];

        let diff = plan_replace(vec![b.clone(), c.clone(), d.clone()], &existing);

        assert_eq!(diff.to_delete.len(), 1);
        assert_eq!(diff.to_delete[0].content_hash, Some(a.content_hash()));

        assert_eq!(diff.to_create.len(), 1);
        assert_eq!(diff.to_create[0].standard_question, "d");
    }

    #[test]
    fn batch_internal_duplicates_are_collapsed() {
        let entries = vec![entry("a", "1"), entry("a", "1"), entry("b", "2")];
        let deduped = dedup_entries(entries, &[], ImportMode::Replace);
        assert_eq!(deduped.len(), 2);
    }
}
