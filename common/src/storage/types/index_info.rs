use serde::{Deserialize, Serialize};

/// The denormalized payload handed to vector/keyword retriever backends when a
/// chunk becomes indexable. Not a `stored_object!` itself — it rides alongside
/// the chunk's embedding row and is rebuilt whenever the chunk content changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexInfo {
    pub content: String,
    pub source_id: String,
    pub source_type: String,
    pub chunk_id: String,
    pub knowledge_id: String,
    pub kb_id: String,
    pub knowledge_type: Option<String>,
    pub is_enabled: bool,
}

impl IndexInfo {
    pub fn new(
        content: String,
        source_id: String,
        source_type: String,
        chunk_id: String,
        knowledge_id: String,
        kb_id: String,
    ) -> Self {
        Self {
            content,
            source_id,
            source_type,
            chunk_id,
            knowledge_id,
            kb_id,
            knowledge_type: None,
            is_enabled: true,
        }
    }
}
