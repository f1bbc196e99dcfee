use common::error::AppError;
use common::events::{AgentEvent, EventBus};
use common::storage::types::message::{Message, MessageRole};
use common::storage::types::session::{FallbackStrategy, Session};
use common::utils::contracts::ChatModel;
use futures::StreamExt;

fn default_response() -> String {
    "I don't have enough information to answer that.".to_string()
}

/// Runs when `filter_top_k` leaves nothing to ground an answer on. The three
/// strategies trade off between never hallucinating (`Abstain`), a canned
/// response (`StaticResponse`), and a best-effort completion anchored to a
/// prompt that admits the knowledge base came up empty (`PromptOnly`).
pub async fn run_fallback(chat_model: &dyn ChatModel, bus: &EventBus, session: &Session, query: &str) -> Result<String, AppError> {
    match session.fallback_strategy {
        FallbackStrategy::StaticResponse => {
            let response = session.fallback_response.clone().unwrap_or_else(default_response);
            bus.emit(AgentEvent::AgentFinalAnswer { content: response.clone(), done: true }).await;
            Ok(response)
        }
        FallbackStrategy::Abstain => {
            bus.emit(AgentEvent::AgentFinalAnswer { content: String::new(), done: true }).await;
            Ok(String::new())
        }
        FallbackStrategy::PromptOnly => {
            let prompt = session.fallback_prompt.clone().unwrap_or_else(default_response).replace("{{query}}", query);
            let messages = vec![Message::new(String::new(), MessageRole::User, prompt, None)];
            match stream_or_none(chat_model, bus, &session.chat_model_id, &messages).await {
                Some(answer) => Ok(answer),
                None => {
                    let response = session.fallback_response.clone().unwrap_or_else(default_response);
                    bus.emit(AgentEvent::AgentFinalAnswer { content: response.clone(), done: true }).await;
                    Ok(response)
                }
            }
        }
    }
}

/// `None` means the stream aborted before a terminal chunk: the caller falls
/// back to the fixed response rather than leaving the turn half-answered.
async fn stream_or_none(chat_model: &dyn ChatModel, bus: &EventBus, model: &str, messages: &[Message]) -> Option<String> {
    let mut stream = chat_model.stream(model, messages).await.ok()?;
    let mut full = String::new();
    let mut saw_finished = false;
    while let Some(chunk) = stream.next().await {
        let Ok(chunk) = chunk else { break };
        if !chunk.delta.is_empty() {
            full.push_str(&chunk.delta);
            bus.emit(AgentEvent::AgentFinalAnswer { content: chunk.delta, done: false }).await;
        }
        if chunk.finished {
            saw_finished = true;
            break;
        }
    }
    if saw_finished {
        bus.emit(AgentEvent::AgentFinalAnswer { content: String::new(), done: true }).await;
        Some(full)
    } else {
        None
    }
}
