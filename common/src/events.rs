use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Typed events fanned out per-session by the `EventBus`. The Agent Engine and
/// the RAG Chat Pipeline both emit onto the same taxonomy so a consumer can
/// treat either response mode identically.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    SessionTitle { title: String },
    AgentReferences { references: Vec<String> },
    AgentToolCallStart { tool_name: String, call_id: String },
    AgentToolCallResult { tool_name: String, call_id: String, result: String, is_error: bool },
    AgentIteration { index: u32 },
    AgentReflection { content: String },
    AgentFinalAnswer { content: String, done: bool },
    Error { error: String, stage: String, session_id: String },
}

/// Per-session fan-out channel. Emissions within one turn are serialised in
/// emit order by virtue of going through a single bounded mpsc channel.
#[derive(Clone)]
pub struct EventBus {
    sender: mpsc::Sender<AgentEvent>,
}

pub struct EventStream {
    receiver: mpsc::Receiver<AgentEvent>,
}

impl EventBus {
    /// `capacity` bounds the channel, giving back-pressure to producers when a
    /// consumer falls behind.
    pub fn new(capacity: usize) -> (Self, EventStream) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, EventStream { receiver })
    }

    pub async fn emit(&self, event: AgentEvent) {
        // A dropped receiver (consumer gone) is not a producer-side error.
        let _ = self.sender.send(event).await;
    }
}

impl Stream for EventStream {
    type Item = AgentEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn emitted_events_arrive_in_order() {
        let (bus, mut stream) = EventBus::new(8);
        bus.emit(AgentEvent::AgentIteration { index: 0 }).await;
        bus.emit(AgentEvent::AgentFinalAnswer { content: "done".into(), done: true }).await;

        let first = stream.next().await.unwrap();
        assert!(matches!(first, AgentEvent::AgentIteration { index: 0 }));
        let second = stream.next().await.unwrap();
        match second {
            AgentEvent::AgentFinalAnswer { content, done } => {
                assert_eq!(content, "done");
                assert!(done);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_panic_on_emit() {
        let (bus, stream) = EventBus::new(1);
        drop(stream);
        bus.emit(AgentEvent::AgentIteration { index: 0 }).await;
    }
}
