use std::fmt;

use crate::stored_object;

#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

stored_object!(Message, "message", {
    session_id: String,
    role: MessageRole,
    content: String,
    references: Option<Vec<String>>,
    tool_call_id: Option<String>
});

impl Message {
    pub fn new(
        session_id: String,
        role: MessageRole,
        content: String,
        references: Option<Vec<String>>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            session_id,
            role,
            content,
            references,
            tool_call_id: None,
        }
    }

    /// Rough token estimate used by the context manager's compression strategies.
    pub fn estimated_tokens(&self) -> usize {
        self.content.len().div_ceil(4)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
            MessageRole::System => write!(f, "System"),
            MessageRole::Tool => write!(f, "Tool"),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role, self.content)
    }
}

pub fn format_history(history: &[Message]) -> String {
    history
        .iter()
        .map(|msg| format!("{msg}"))
        .collect::<Vec<String>>()
        .join("\n")
}
