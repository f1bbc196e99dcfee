use std::sync::Arc;

use agent_engine::{build_registry, AgentEngine, ContextManager, ContextStorage, ToolContext};
use common::error::AppError;
use common::events::EventBus;
use common::storage::db::SurrealDbClient;
use common::storage::types::message::{Message, MessageRole};
use common::storage::types::session::Session;
use common::utils::contracts::{ChatModel, Reranker, RetrieveEngine};

use crate::pipeline::ChatPipeline;
use crate::search_target::SearchTarget;

/// Routes one user turn to the Agent Engine or the RAG chat pipeline
/// depending on `session.agent.enabled`, so callers have a single entry
/// point regardless of which mode a session runs in. History is owned by a
/// `ContextManager` built fresh per turn from the session's own compression
/// config, rather than threaded in by the caller.
pub struct ChatDispatcher {
    db: Arc<SurrealDbClient>,
    retrieve_engine: Arc<dyn RetrieveEngine>,
    chat_model: Arc<dyn ChatModel>,
    context_storage: Arc<dyn ContextStorage>,
    pipeline: ChatPipeline,
}

impl ChatDispatcher {
    pub fn new(
        db: Arc<SurrealDbClient>,
        retrieve_engine: Arc<dyn RetrieveEngine>,
        chat_model: Arc<dyn ChatModel>,
        reranker: Option<Arc<dyn Reranker>>,
        context_storage: Arc<dyn ContextStorage>,
    ) -> Self {
        let pipeline = ChatPipeline::new(db.clone(), retrieve_engine.clone(), chat_model.clone(), reranker);
        Self { db, retrieve_engine, chat_model, context_storage, pipeline }
    }

    pub async fn run_turn(&self, bus: &EventBus, session: &Session, session_id: &str, query: String) -> Result<String, AppError> {
        let context_manager = ContextManager::new(self.context_storage.clone(), self.chat_model.clone(), session.chat_model_id.clone(), session.context.clone());

        let history = context_manager.get_context(session_id).await?;
        context_manager.add_message(session_id, Message::new(session_id.to_string(), MessageRole::User, query.clone(), None)).await?;

        let answer = if session.agent.enabled {
            self.run_agent_turn(bus, session, session_id, history, query).await?
        } else {
            self.run_chat_turn(bus, session, session_id, history, query).await?
        };

        context_manager.add_message(session_id, Message::new(session_id.to_string(), MessageRole::Assistant, answer.clone(), None)).await?;
        Ok(answer)
    }

    async fn run_chat_turn(&self, bus: &EventBus, session: &Session, session_id: &str, history: Vec<Message>, query: String) -> Result<String, AppError> {
        let has_targets = !session.agent.allowed_kb_ids.is_empty() || !session.kb_id.is_empty();
        if !has_targets {
            return self.pipeline.chat_stream(bus, session, session_id, history, query).await;
        }

        let targets = if session.agent.allowed_knowledge_ids.is_empty() {
            vec![SearchTarget::whole_kb(session.kb_id.clone())]
        } else {
            vec![SearchTarget::knowledges(session.kb_id.clone(), session.agent.allowed_knowledge_ids.clone())]
        };
        self.pipeline.rag_stream(bus, session, session_id, history, query, targets).await
    }

    async fn run_agent_turn(&self, bus: &EventBus, session: &Session, session_id: &str, mut history: Vec<Message>, query: String) -> Result<String, AppError> {
        let has_kb_scope = !session.kb_id.is_empty() || !session.agent.allowed_kb_ids.is_empty();
        let tools = build_registry(has_kb_scope, session.agent.web_search_enabled);
        let engine = AgentEngine::new(tools, self.chat_model.clone(), session.chat_model_id.clone(), session.agent.max_iterations, session.agent.reflection_enabled)?;

        let tool_ctx = ToolContext {
            db: self.db.clone(),
            retrieve_engine: self.retrieve_engine.clone(),
            tenant_id: session.tenant_id.clone(),
            kb_id: session.kb_id.clone(),
            knowledge_ids: session.agent.allowed_knowledge_ids.clone(),
        };

        history.push(Message::new(session_id.to_string(), MessageRole::User, query, None));
        engine.run(bus, &tool_ctx, session_id, history).await
    }
}

#[cfg(test)]
mod tests {
    use agent_engine::InMemoryContextStorage;
    use async_trait::async_trait;
    use common::storage::db::SurrealDbClient;
    use common::utils::contracts::{ChatCompletionChunk, IndexBatchEntry, RetrieveParams, RetrievedHit};
    use futures::stream::{self, BoxStream};

    use super::*;

    struct EchoChatModel;

    #[async_trait]
    impl ChatModel for EchoChatModel {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String, AppError> {
            Ok(String::new())
        }

        async fn stream(&self, _model: &str, _messages: &[Message]) -> Result<BoxStream<'static, Result<ChatCompletionChunk, AppError>>, AppError> {
            Ok(stream::iter(vec![Ok(ChatCompletionChunk { delta: "hi".into(), finished: true })]).boxed())
        }
    }

    struct NullRetrieveEngine;

    #[async_trait]
    impl RetrieveEngine for NullRetrieveEngine {
        async fn retrieve(&self, _params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
            Ok(Vec::new())
        }
        async fn batch_index(&self, _entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_knowledge_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_chunk_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        async fn delete_by_source_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            Ok(())
        }
        fn estimate_storage_size(&self, _entries: &[IndexBatchEntry]) -> u64 {
            0
        }
        async fn copy_indices(&self, _src_kb: &str, _dst_kb: &str, _knowledge_map: &std::collections::HashMap<String, String>, _chunk_map: &std::collections::HashMap<String, String>) -> Result<(), AppError> {
            Ok(())
        }
        async fn batch_update_chunk_enabled_status(&self, _updates: &std::collections::HashMap<String, bool>) -> Result<(), AppError> {
            Ok(())
        }
        fn supports_retriever(&self, _kind: &str) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn bare_chat_turn_records_history_through_the_context_manager() {
        let db = Arc::new(SurrealDbClient::memory("test", "test").await.unwrap());
        let chat_model: Arc<dyn ChatModel> = Arc::new(EchoChatModel);
        let retrieve_engine: Arc<dyn RetrieveEngine> = Arc::new(NullRetrieveEngine);
        let storage: Arc<dyn ContextStorage> = Arc::new(InMemoryContextStorage::new());

        let dispatcher = ChatDispatcher::new(db, retrieve_engine, chat_model, None, storage.clone());
        let mut session = Session::new("tenant-1".into(), String::new(), "test-model".into());
        session.kb_id = String::new();

        let (bus, _stream) = common::events::EventBus::new(8);
        let answer = dispatcher.run_turn(&bus, &session, "session-1", "hello".into()).await.unwrap();
        assert_eq!(answer, "hi");

        let recorded = storage.load("session-1").await.unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].role, MessageRole::User);
        assert_eq!(recorded[1].role, MessageRole::Assistant);
    }
}
