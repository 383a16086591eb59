use serde::{Deserialize, Serialize};

/// Message in a chat conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// Sampling options forwarded to the model
#[derive(Debug, Clone, Serialize)]
pub struct ModelOptions {
    pub temperature: f64,
}

/// Request body for the chat endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub options: ModelOptions,
}

/// Non-streaming chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
}

/// One NDJSON line of a streaming chat response
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChatMessage>,
    #[serde(default)]
    pub done: bool,
}

/// Request body for the embeddings endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingRequest {
    pub model: String,
    pub prompt: String,
}

/// Embeddings response
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let msg = ChatMessage::system("be helpful");
        assert_eq!(msg.role, ChatRole::System);
        assert_eq!(msg.content, "be helpful");

        let msg = ChatMessage::user("hello");
        assert_eq!(msg.role, ChatRole::User);

        let msg = ChatMessage::assistant("hi");
        assert_eq!(msg.role, ChatRole::Assistant);
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let msg = ChatMessage::user("q");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn test_chunk_deserialization() {
        let line = r#"{"model":"m","message":{"role":"assistant","content":"tok"},"done":false}"#;
        let chunk: ChatChunk = serde_json::from_str(line).unwrap();
        assert!(!chunk.done);
        assert_eq!(chunk.message.unwrap().content, "tok");

        let line = r#"{"model":"m","done":true,"total_duration":1}"#;
        let chunk: ChatChunk = serde_json::from_str(line).unwrap();
        assert!(chunk.done);
        assert!(chunk.message.is_none());
    }
}
