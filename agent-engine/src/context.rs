use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::error::AppError;
use common::storage::kv::KvCache;
use common::storage::types::message::{format_history, Message, MessageRole};
use common::storage::types::session::{ContextCompressionStrategy, ContextManagerConfig};
use common::utils::contracts::ChatModel;
use tokio::sync::RwLock;

/// Pluggable backing store for per-session message history.
#[async_trait]
pub trait ContextStorage: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, AppError>;
    async fn append(&self, session_id: &str, message: Message) -> Result<(), AppError>;
    async fn clear(&self, session_id: &str) -> Result<(), AppError>;
}

/// In-memory reference storage, guarded by a reader/writer lock.
#[derive(Default)]
pub struct InMemoryContextStorage {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemoryContextStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ContextStorage for InMemoryContextStorage {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        Ok(self.sessions.read().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<(), AppError> {
        self.sessions.write().await.entry(session_id.to_string()).or_default().push(message);
        Ok(())
    }

    async fn clear(&self, session_id: &str) -> Result<(), AppError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

/// KV-cache-backed storage: the whole message list is JSON-serialised under a
/// `context:{session_id}` key with a fixed TTL, the same key-prefix-plus-TTL
/// idiom the task orchestrator uses for progress records.
pub struct KvContextStorage {
    kv: Arc<dyn KvCache>,
    ttl: Duration,
}

impl KvContextStorage {
    pub fn new(kv: Arc<dyn KvCache>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    fn key(session_id: &str) -> String {
        format!("context:{session_id}")
    }
}

#[async_trait]
impl ContextStorage for KvContextStorage {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        match self.kv.get(&Self::key(session_id)).await? {
            Some(raw) => serde_json::from_str(&raw).map_err(|e| AppError::InternalError(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<(), AppError> {
        let mut messages = self.load(session_id).await?;
        messages.push(message);
        let raw = serde_json::to_string(&messages).map_err(|e| AppError::InternalError(e.to_string()))?;
        self.kv.set(&Self::key(session_id), raw, Some(self.ttl)).await
    }

    async fn clear(&self, session_id: &str) -> Result<(), AppError> {
        self.kv.del(&Self::key(session_id)).await
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContextStats {
    pub message_count: usize,
    pub estimated_tokens: usize,
}

/// Per-session message store plus the sliding-window/smart compression
/// strategies that keep the context handed to the chat model under budget.
pub struct ContextManager {
    storage: Arc<dyn ContextStorage>,
    chat_model: Arc<dyn ChatModel>,
    summarizer_model: String,
    config: ContextManagerConfig,
}

impl ContextManager {
    pub fn new(storage: Arc<dyn ContextStorage>, chat_model: Arc<dyn ChatModel>, summarizer_model: String, config: ContextManagerConfig) -> Self {
        Self {
            storage,
            chat_model,
            summarizer_model,
            config,
        }
    }

    pub async fn add_message(&self, session_id: &str, message: Message) -> Result<(), AppError> {
        self.storage.append(session_id, message).await
    }

    pub async fn clear_context(&self, session_id: &str) -> Result<(), AppError> {
        self.storage.clear(session_id).await
    }

    pub async fn get_context_stats(&self, session_id: &str) -> Result<ContextStats, AppError> {
        let messages = self.storage.load(session_id).await?;
        Ok(ContextStats {
            message_count: messages.len(),
            estimated_tokens: messages.iter().map(Message::estimated_tokens).sum(),
        })
    }

    pub async fn get_context(&self, session_id: &str) -> Result<Vec<Message>, AppError> {
        let messages = self.storage.load(session_id).await?;
        let total_tokens: usize = messages.iter().map(Message::estimated_tokens).sum();
        if total_tokens <= self.config.max_tokens {
            return Ok(messages);
        }

        match self.config.strategy {
            ContextCompressionStrategy::SlidingWindow => Ok(self.sliding_window(messages)),
            ContextCompressionStrategy::Smart => self.smart_compress(messages).await,
        }
    }

    fn split_recent(&self, messages: Vec<Message>) -> (Vec<Message>, Vec<Message>, Vec<Message>) {
        let (system, rest): (Vec<Message>, Vec<Message>) = messages.into_iter().partition(|m| m.role == MessageRole::System);
        let keep_from = rest.len().saturating_sub(self.config.recent_message_count);
        let recent = rest[keep_from..].to_vec();
        let dropped = rest[..keep_from].to_vec();
        (system, dropped, recent)
    }

    fn sliding_window(&self, messages: Vec<Message>) -> Vec<Message> {
        let (mut system, _dropped, recent) = self.split_recent(messages);
        system.extend(recent);
        system
    }

    async fn smart_compress(&self, messages: Vec<Message>) -> Result<Vec<Message>, AppError> {
        let original = messages.clone();
        let (mut system, dropped, recent) = self.split_recent(messages);

        if dropped.len() < self.config.summarize_threshold {
            system.extend(recent);
            return Ok(system);
        }

        let transcript = format_history(&dropped);
        let prompt = vec![
            Message::new(
                String::new(),
                MessageRole::System,
                "Summarise the following conversation excerpt in under 500 tokens. Preserve facts needed to continue the conversation.".into(),
                None,
            ),
            Message::new(String::new(), MessageRole::User, transcript, None),
        ];

        match self.chat_model.complete(&self.summarizer_model, &prompt).await {
            Ok(summary) => {
                system.push(Message::new(
                    String::new(),
                    MessageRole::System,
                    format!("Summary of earlier conversation: {summary}"),
                    None,
                ));
                system.extend(recent);
                Ok(system)
            }
            // Fail-open: a broken summariser must not lose history.
            Err(_) => Ok(original),
        }
    }
}
