use std::sync::Arc;

use common::error::AppError;
use common::events::{AgentEvent, EventBus};
use common::storage::types::message::{Message, MessageRole};
use common::utils::contracts::ChatModel;
use futures::StreamExt;
use json_stream_parser::JsonStreamParser;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::{Tool, ToolContext};

/// Upper bound on `AgentSessionConfig::max_iterations`. Enforced at
/// construction so a misconfigured session can't spin the loop forever.
pub const MAX_ITERATIONS_CEILING: u32 = 30;

#[derive(Debug, Deserialize)]
struct ToolCallRequest {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// The JSON-convention the system prompt asks the chat model to reply with.
/// `ChatModel` carries no native tool-calling; this is how the loop gets
/// structured intent out of a plain-text completion.
#[derive(Debug, Default, Deserialize)]
struct ModelDecision {
    #[serde(default)]
    tool_calls: Vec<ToolCallRequest>,
    #[serde(default)]
    final_answer: Option<String>,
    #[serde(default)]
    reflection: Option<String>,
}

fn decision_from_value(value: &Value) -> ModelDecision {
    if value.is_null() {
        return ModelDecision::default();
    }
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Accumulates a streamed model response character by character, the same
/// incremental-diff idiom the chat SSE handler uses to pull only new
/// characters of a growing string field out of a partially-parsed object.
struct StreamDecoder {
    parser: JsonStreamParser,
    last_final_answer: String,
}

impl StreamDecoder {
    fn new() -> Self {
        Self {
            parser: JsonStreamParser::new(),
            last_final_answer: String::new(),
        }
    }

    /// Feeds one delta in, returning any newly-appeared slice of the
    /// `final_answer` field so it can be emitted as soon as it exists.
    fn feed(&mut self, delta: &str) -> String {
        for c in delta.chars() {
            let _ = self.parser.add_char(c);
        }
        let current = self
            .parser
            .get_result()
            .as_object()
            .and_then(|obj| obj.get("final_answer"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if current.len() > self.last_final_answer.len() {
            let fresh = current[self.last_final_answer.len()..].to_string();
            self.last_final_answer = current;
            fresh
        } else {
            String::new()
        }
    }

    fn finish(self) -> ModelDecision {
        decision_from_value(self.parser.get_result())
    }
}

/// Runs the bounded reason-act loop described for sessions with `agent.enabled`:
/// each iteration asks the chat model for either tool calls or a final answer,
/// dispatches any tool calls against the registry, and feeds results back in as
/// `Tool` messages until the model produces an answer or the iteration cap hits.
pub struct AgentEngine {
    tools: Vec<Box<dyn Tool>>,
    chat_model: Arc<dyn ChatModel>,
    model: String,
    max_iterations: u32,
    reflection_enabled: bool,
}

impl AgentEngine {
    pub fn new(tools: Vec<Box<dyn Tool>>, chat_model: Arc<dyn ChatModel>, model: String, max_iterations: u32, reflection_enabled: bool) -> Result<Self, AppError> {
        if max_iterations == 0 || max_iterations > MAX_ITERATIONS_CEILING {
            return Err(AppError::Validation(format!("max_iterations must be in 1..={MAX_ITERATIONS_CEILING}, got {max_iterations}")));
        }
        Ok(Self {
            tools,
            chat_model,
            model,
            max_iterations,
            reflection_enabled,
        })
    }

    fn system_prompt(&self) -> String {
        let tool_specs: Vec<Value> = self
            .tools
            .iter()
            .map(|t| json!({"name": t.name(), "description": t.description(), "parameters": t.parameters_schema()}))
            .collect();
        format!(
            "You can call tools to gather information before answering. Available tools:\n{}\n\n\
             Reply with a single JSON object and nothing else: \
             {{\"tool_calls\": [{{\"name\": \"...\", \"arguments\": {{...}}}}]}} to call one or more tools, \
             {{\"reflection\": \"...\", \"final_answer\": \"...\"}} once you have enough information, \
             or just {{\"final_answer\": \"...\"}} if no reflection is needed.",
            serde_json::to_string_pretty(&tool_specs).unwrap_or_default()
        )
    }

    /// Streams one completion and decodes it against the JSON convention,
    /// emitting final-answer fragments live as they appear in the stream.
    async fn next_decision(&self, bus: &EventBus, messages: &[Message]) -> Result<ModelDecision, AppError> {
        let mut stream = self.chat_model.stream(&self.model, messages).await?;
        let mut decoder = StreamDecoder::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let fresh = decoder.feed(&chunk.delta);
            if !fresh.is_empty() {
                bus.emit(AgentEvent::AgentFinalAnswer { content: fresh, done: false }).await;
            }
            if chunk.finished {
                break;
            }
        }
        Ok(decoder.finish())
    }

    pub async fn run(&self, bus: &EventBus, tool_ctx: &ToolContext, session_id: &str, mut messages: Vec<Message>) -> Result<String, AppError> {
        messages.insert(0, Message::new(session_id.to_string(), MessageRole::System, self.system_prompt(), None));

        for iteration in 0..self.max_iterations {
            bus.emit(AgentEvent::AgentIteration { index: iteration }).await;

            let decision = match self.next_decision(bus, &messages).await {
                Ok(decision) => decision,
                Err(e) => {
                    bus.emit(AgentEvent::Error {
                        error: e.to_string(),
                        stage: "agent_decision".into(),
                        session_id: session_id.to_string(),
                    })
                    .await;
                    return Err(e);
                }
            };

            if self.reflection_enabled {
                if let Some(reflection) = decision.reflection {
                    bus.emit(AgentEvent::AgentReflection { content: reflection }).await;
                }
            }

            if let Some(answer) = decision.final_answer {
                bus.emit(AgentEvent::AgentFinalAnswer { content: String::new(), done: true }).await;
                return Ok(answer);
            }

            if decision.tool_calls.is_empty() {
                // Neither a tool call nor a final answer: nothing further to
                // drive the loop, so treat silence as an empty answer.
                bus.emit(AgentEvent::AgentFinalAnswer { content: String::new(), done: true }).await;
                return Ok(String::new());
            }

            messages.push(Message::new(session_id.to_string(), MessageRole::Assistant, String::new(), None));

            for call in decision.tool_calls {
                let call_id = uuid::Uuid::new_v4().to_string();
                bus.emit(AgentEvent::AgentToolCallStart { tool_name: call.name.clone(), call_id: call_id.clone() }).await;

                let (result, is_error) = match self.tools.iter().find(|t| t.name() == call.name) {
                    Some(tool) => match tool.execute(call.arguments, tool_ctx).await {
                        Ok(result) => (result, false),
                        Err(e) => (e.to_string(), true),
                    },
                    None => (format!("unknown tool \"{}\"", call.name), true),
                };

                bus.emit(AgentEvent::AgentToolCallResult {
                    tool_name: call.name.clone(),
                    call_id: call_id.clone(),
                    result: result.clone(),
                    is_error,
                })
                .await;

                let mut tool_message = Message::new(session_id.to_string(), MessageRole::Tool, result, None);
                tool_message.tool_call_id = Some(call_id);
                messages.push(tool_message);
            }
        }

        let truncated = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Tool || m.role == MessageRole::Assistant)
            .map(|m| m.content.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "No final answer was reached.".to_string());
        let answer = format!("{truncated}\n\n(reached the iteration limit before a final answer)");
        bus.emit(AgentEvent::AgentFinalAnswer { content: answer.clone(), done: true }).await;
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use common::storage::db::SurrealDbClient;
    use common::utils::contracts::{ChatCompletionChunk, IndexBatchEntry, RetrieveParams, RetrievedHit};
    use futures::stream::{self, BoxStream};
    use futures::StreamExt as _;

    use super::*;

    fn chunk_stream(full: &'static str) -> BoxStream<'static, Result<ChatCompletionChunk, AppError>> {
        let n = full.chars().count();
        stream::iter(full.chars().enumerate().map(move |(i, c)| Ok(ChatCompletionChunk { delta: c.to_string(), finished: i == n - 1 }))).boxed()
    }

    struct ScriptedChatModel {
        responses: Vec<&'static str>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChatModel for ScriptedChatModel {
        async fn complete(&self, _model: &str, _messages: &[Message]) -> Result<String, AppError> {
            unimplemented!("engine drives completions via stream()")
        }

        async fn stream(&self, _model: &str, _messages: &[Message]) -> Result<BoxStream<'static, Result<ChatCompletionChunk, AppError>>, AppError> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(chunk_stream(self.responses[index.min(self.responses.len() - 1)]))
        }
    }

    /// Never exercised when the tool registry is empty; every method panics
    /// if the engine mistakenly reaches for retrieval.
    struct NullRetrieveEngine;

    #[async_trait]
    impl common::utils::contracts::RetrieveEngine for NullRetrieveEngine {
        async fn retrieve(&self, _params: &RetrieveParams) -> Result<Vec<RetrievedHit>, AppError> {
            unreachable!("no tools registered")
        }
        async fn batch_index(&self, _entries: Vec<IndexBatchEntry>) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        async fn delete_by_knowledge_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        async fn delete_by_chunk_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        async fn delete_by_source_id_list(&self, _ids: &[String]) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        fn estimate_storage_size(&self, _entries: &[IndexBatchEntry]) -> u64 {
            0
        }
        async fn copy_indices(&self, _src_kb: &str, _dst_kb: &str, _knowledge_map: &HashMap<String, String>, _chunk_map: &HashMap<String, String>) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        async fn batch_update_chunk_enabled_status(&self, _updates: &HashMap<String, bool>) -> Result<(), AppError> {
            unreachable!("no tools registered")
        }
        fn supports_retriever(&self, _kind: &str) -> bool {
            false
        }
    }

    async fn empty_tool_ctx() -> ToolContext {
        let db = SurrealDbClient::memory("test", "test").await.unwrap();
        ToolContext {
            db: Arc::new(db),
            retrieve_engine: Arc::new(NullRetrieveEngine),
            tenant_id: "tenant-1".into(),
            kb_id: "kb-1".into(),
            knowledge_ids: vec![],
        }
    }

    #[tokio::test]
    async fn immediate_final_answer_returns_without_tool_dispatch() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel {
            responses: vec![r#"{"final_answer": "hello there"}"#],
            calls: AtomicUsize::new(0),
        });
        let engine = AgentEngine::new(vec![], chat_model, "test-model".into(), 5, false).unwrap();
        let (bus, mut stream) = common::events::EventBus::new(32);
        let ctx = empty_tool_ctx().await;

        let answer = engine.run(&bus, &ctx, "session-1", vec![]).await.unwrap();
        assert_eq!(answer, "hello there");

        drop(bus);
        let mut saw_final = false;
        while let Some(event) = stream.next().await {
            if let AgentEvent::AgentFinalAnswer { done: true, .. } = event {
                saw_final = true;
            }
        }
        assert!(saw_final);
    }

    #[tokio::test]
    async fn exhausting_iterations_returns_a_truncated_answer() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel {
            responses: vec![r#"{"tool_calls": [{"name": "missing_tool", "arguments": {}}]}"#; 2],
            calls: AtomicUsize::new(0),
        });
        let engine = AgentEngine::new(vec![], chat_model, "test-model".into(), 2, false).unwrap();
        let (bus, _stream) = common::events::EventBus::new(32);
        let ctx = empty_tool_ctx().await;

        let answer = engine.run(&bus, &ctx, "session-1", vec![]).await.unwrap();
        assert!(answer.contains("iteration limit"));
    }

    #[tokio::test]
    async fn zero_iterations_is_rejected() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel { responses: vec![], calls: AtomicUsize::new(0) });
        assert!(AgentEngine::new(vec![], chat_model, "m".into(), 0, false).is_err());
    }

    #[tokio::test]
    async fn iteration_ceiling_boundary() {
        let chat_model: Arc<dyn ChatModel> = Arc::new(ScriptedChatModel { responses: vec![], calls: AtomicUsize::new(0) });
        assert!(AgentEngine::new(vec![], chat_model.clone(), "m".into(), MAX_ITERATIONS_CEILING, false).is_ok());
        assert!(AgentEngine::new(vec![], chat_model, "m".into(), MAX_ITERATIONS_CEILING + 1, false).is_err());
    }
}
