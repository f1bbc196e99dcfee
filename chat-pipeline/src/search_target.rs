/// The unit of retrieval scope `rag_stream` fans out over: either an entire
/// knowledge base or a named subset of its Knowledges.
#[derive(Debug, Clone)]
pub struct SearchTarget {
    pub kb_id: String,
    pub knowledge_ids: Option<Vec<String>>,
}

impl SearchTarget {
    pub fn whole_kb(kb_id: impl Into<String>) -> Self {
        Self { kb_id: kb_id.into(), knowledge_ids: None }
    }

    pub fn knowledges(kb_id: impl Into<String>, knowledge_ids: Vec<String>) -> Self {
        Self { kb_id: kb_id.into(), knowledge_ids: Some(knowledge_ids) }
    }
}
