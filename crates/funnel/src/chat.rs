//! The chat-completion collaborator as seen by the dispatcher.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, FunctionSchema};

/// One completion request: transcript plus the shortlisted functions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,

    /// May be empty, in which case no function can be chosen
    pub functions: Vec<FunctionSchema>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// What the model decided to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChatDecision {
    /// Call an operation. `arguments` is the raw JSON string from the model.
    FunctionCall { name: String, arguments: String },

    /// Plain assistant reply, no operation chosen
    Reply { content: String },
}

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn decide(&self, request: ChatRequest) -> anyhow::Result<ChatDecision>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_wire_format() {
        let decision = ChatDecision::FunctionCall {
            name: "get_current_weather".to_string(),
            arguments: "{\"location\":\"Boston\"}".to_string(),
        };
        let value = serde_json::to_value(&decision).unwrap();
        assert_eq!(value["kind"], "function_call");
        assert_eq!(value["name"], "get_current_weather");

        let reply: ChatDecision =
            serde_json::from_value(serde_json::json!({"kind": "reply", "content": "Hi"})).unwrap();
        assert_eq!(
            reply,
            ChatDecision::Reply {
                content: "Hi".to_string()
            }
        );
    }
}
