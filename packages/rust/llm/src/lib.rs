//! Generation-service plumbing for VaultZero.
//!
//! Every assessment stage talks to the text-generation service through the
//! [`Generator`] trait: build an ordered message list with [`create_prompt`],
//! send a [`GenerationRequest`], and turn the free-text [`Generation`] back
//! into data with the helpers in [`parse`].

mod client;
pub mod parse;
mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vaultzero_shared::Result;

pub use client::{ANTHROPIC_VERSION, AnthropicClient, ClientOptions};
pub use parse::{ParseFailure, Structured};
pub use prompt::create_prompt;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Author of one message in a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the ordered message list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A single call to the generation service.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Model identifier.
    pub model: String,
    /// System and conversation messages, in order.
    pub messages: Vec<Message>,
    /// Upper bound on output tokens.
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    /// Total characters across all messages.
    pub fn prompt_len(&self) -> usize {
        self.messages.iter().map(|m| m.content.len()).sum()
    }
}

/// The text the service produced plus usage accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub latency_ms: u64,
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Anything that can answer a [`GenerationRequest`].
///
/// Implemented by [`AnthropicClient`] for real runs and by scripted fakes in
/// tests. A single instance is shared by every stage of a run.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_serializes_lowercase() {
        let msg = Message::user("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["content"], "hello");
    }

    #[test]
    fn prompt_len_sums_messages() {
        let req = GenerationRequest {
            model: "m".into(),
            messages: vec![Message::system("abc"), Message::user("de")],
            max_tokens: 10,
            temperature: 0.0,
        };
        assert_eq!(req.prompt_len(), 5);
    }
}
