use std::collections::HashSet;
use std::sync::Arc;

use common::error::AppError;
use common::events::{AgentEvent, EventBus};
use common::storage::db::SurrealDbClient;
use common::storage::types::knowledge_base::KnowledgeBase;
use common::storage::types::message::{format_history, Message, MessageRole};
use common::storage::types::session::Session;
use common::utils::contracts::{ChatModel, Reranker, RetrieveEngine};
use futures::StreamExt;
use retrieval_pipeline::{hybrid_search, HybridSearchParams, MatchedChunk};

use crate::fallback::run_fallback;
use crate::search_target::SearchTarget;

/// The two response modes share one Event Bus taxonomy, so a client can't
/// tell from the wire which path produced an answer.
pub struct ChatPipeline {
    db: Arc<SurrealDbClient>,
    retrieve_engine: Arc<dyn RetrieveEngine>,
    chat_model: Arc<dyn ChatModel>,
    reranker: Option<Arc<dyn Reranker>>,
}

impl ChatPipeline {
    pub fn new(db: Arc<SurrealDbClient>, retrieve_engine: Arc<dyn RetrieveEngine>, chat_model: Arc<dyn ChatModel>, reranker: Option<Arc<dyn Reranker>>) -> Self {
        Self { db, retrieve_engine, chat_model, reranker }
    }

    /// No knowledge bases in scope and web search off: skip retrieval
    /// entirely and stream a bare completion.
    pub async fn chat_stream(&self, bus: &EventBus, session: &Session, session_id: &str, mut history: Vec<Message>, query: String) -> Result<String, AppError> {
        history.push(Message::new(session_id.to_string(), MessageRole::User, query, None));
        self.chat_completion_stream(bus, &session.chat_model_id, &history).await
    }

    /// `preprocess -> rewrite -> query_expansion -> chunk_search -> chunk_rerank
    /// -> chunk_merge -> filter_top_k -> into_chat_message -> chat_completion_stream`,
    /// falling back per `session.fallback_strategy` when nothing survives `filter_top_k`.
    pub async fn rag_stream(&self, bus: &EventBus, session: &Session, session_id: &str, history: Vec<Message>, query: String, targets: Vec<SearchTarget>) -> Result<String, AppError> {
        match self.retrieve_and_build_prompt(bus, session, &history, &query, &targets).await {
            Ok(messages) => self.chat_completion_stream(bus, &session.chat_model_id, &messages).await,
            Err(AppError::SearchEmpty) => run_fallback(self.chat_model.as_ref(), bus, session, &query).await,
            Err(e) => {
                bus.emit(AgentEvent::Error { error: e.to_string(), stage: "rag_stream".into(), session_id: session_id.to_string() }).await;
                Err(e)
            }
        }
    }

    async fn retrieve_and_build_prompt(&self, bus: &EventBus, session: &Session, history: &[Message], query: &str, targets: &[SearchTarget]) -> Result<Vec<Message>, AppError> {
        let query = preprocess(query)?;
        let query = self.rewrite(session, history, &query).await?;
        let queries = self.query_expansion(session, &query).await?;

        let mut candidates = Vec::new();
        for target in targets {
            for variant in &queries {
                candidates.extend(self.chunk_search(session, target, variant).await?);
            }
        }

        let reranked = self.chunk_rerank(session, &query, candidates).await?;
        let merged = chunk_merge(reranked);
        let top = filter_top_k(session, merged);

        if top.is_empty() {
            return Err(AppError::SearchEmpty);
        }

        let references: Vec<String> = top.iter().map(|m| m.chunk.id.clone()).collect();
        bus.emit(AgentEvent::AgentReferences { references }).await;

        Ok(self.into_chat_message(session, history, &query, &top))
    }

    async fn rewrite(&self, session: &Session, history: &[Message], query: &str) -> Result<String, AppError> {
        if !session.rewrite.enabled {
            return Ok(query.to_string());
        }
        let user_prompt = session.rewrite.prompt_user.replace("{{history}}", &format_history(history)).replace("{{query}}", query);
        let messages = vec![
            Message::new(String::new(), MessageRole::System, session.rewrite.prompt_system.clone(), None),
            Message::new(String::new(), MessageRole::User, user_prompt, None),
        ];
        match self.chat_model.complete(&session.chat_model_id, &messages).await {
            Ok(rewritten) if !rewritten.trim().is_empty() => Ok(rewritten.trim().to_string()),
            _ => Ok(query.to_string()),
        }
    }

    async fn query_expansion(&self, session: &Session, query: &str) -> Result<Vec<String>, AppError> {
        if !session.query_expansion.enabled || session.query_expansion.variant_count == 0 {
            return Ok(vec![query.to_string()]);
        }
        let prompt = format!(
            "Generate {} alternative phrasings of this search query, one per line, no numbering:\n{}",
            session.query_expansion.variant_count, query
        );
        let messages = vec![Message::new(String::new(), MessageRole::User, prompt, None)];

        let mut variants = vec![query.to_string()];
        if let Ok(response) = self.chat_model.complete(&session.chat_model_id, &messages).await {
            variants.extend(response.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).take(session.query_expansion.variant_count));
        }
        Ok(variants)
    }

    async fn chunk_search(&self, session: &Session, target: &SearchTarget, query: &str) -> Result<Vec<MatchedChunk>, AppError> {
        let kb = self
            .db
            .get_item::<KnowledgeBase>(&target.kb_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("knowledge base {} not found", target.kb_id)))?;
        let params = HybridSearchParams {
            kb_id: target.kb_id.clone(),
            kb_type: kb.kb_type,
            query_text: query.to_string(),
            match_count: session.retrieval.top_k,
            disable_vector: false,
            disable_keywords: false,
            knowledge_ids: target.knowledge_ids.clone(),
        };
        hybrid_search(&self.db, self.retrieve_engine.as_ref(), params).await
    }

    async fn chunk_rerank(&self, session: &Session, query: &str, candidates: Vec<MatchedChunk>) -> Result<Vec<MatchedChunk>, AppError> {
        if candidates.is_empty() || !session.retrieval.rerank_enabled {
            return Ok(candidates);
        }
        let Some(reranker) = self.reranker.as_ref() else {
            return Ok(candidates);
        };

        let documents: Vec<String> = candidates.iter().map(|m| m.chunk.content.clone()).collect();
        let scores = reranker.rerank(query, &documents).await?;
        let mut scored: Vec<(f32, MatchedChunk)> = scores.into_iter().zip(candidates).collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(threshold) = session.retrieval.rerank_threshold {
            scored.retain(|(score, _)| *score >= threshold);
        }
        Ok(scored.into_iter().take(session.retrieval.rerank_top_k).map(|(_, m)| m).collect())
    }

    fn into_chat_message(&self, session: &Session, history: &[Message], query: &str, references: &[MatchedChunk]) -> Vec<Message> {
        let references_text = references.iter().map(|m| m.chunk.content.clone()).collect::<Vec<_>>().join("\n---\n");
        let user_content = session.summary_prompt.context_template.replace("{{references}}", &references_text).replace("{{query}}", query);

        let mut messages = vec![Message::new(String::new(), MessageRole::System, session.summary_prompt.system_prompt.clone(), None)];
        messages.extend(history.iter().cloned());
        messages.push(Message::new(String::new(), MessageRole::User, user_content, None));
        messages
    }

    /// Streams a completion and emits it as `agent_final_answer` fragments —
    /// the same event the Agent Engine emits for its own final answer.
    async fn chat_completion_stream(&self, bus: &EventBus, model: &str, messages: &[Message]) -> Result<String, AppError> {
        let mut stream = self.chat_model.stream(model, messages).await?;
        let mut full = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if !chunk.delta.is_empty() {
                full.push_str(&chunk.delta);
                bus.emit(AgentEvent::AgentFinalAnswer { content: chunk.delta, done: false }).await;
            }
            if chunk.finished {
                break;
            }
        }
        bus.emit(AgentEvent::AgentFinalAnswer { content: String::new(), done: true }).await;
        Ok(full)
    }
}

fn preprocess(query: &str) -> Result<String, AppError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation("query must not be empty".into()));
    }
    Ok(trimmed.to_string())
}

/// De-duplicates by chunk id, keeping first-seen rank order.
fn chunk_merge(candidates: Vec<MatchedChunk>) -> Vec<MatchedChunk> {
    let mut seen = HashSet::new();
    candidates.into_iter().filter(|m| seen.insert(m.chunk.id.clone())).collect()
}

fn filter_top_k(session: &Session, merged: Vec<MatchedChunk>) -> Vec<MatchedChunk> {
    merged.into_iter().take(session.retrieval.top_k).collect()
}
