//! Scripted generator and helpers shared by the pipeline tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use vaultzero_llm::{Generation, GenerationRequest, Generator};
use vaultzero_shared::{Result, VaultZeroError};

use crate::stage::{LlmSettings, StageContext};

enum Reply {
    Text(String),
    Fail(String),
}

/// Answers by the first rule whose needle occurs in the prompt.
pub(crate) struct ScriptedGenerator {
    rules: Vec<(String, Reply)>,
    default: Option<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    models: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            default: None,
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            models: Mutex::new(Vec::new()),
        }
    }

    pub fn on(mut self, needle: &str, reply: impl Into<String>) -> Self {
        self.rules.push((needle.to_string(), Reply::Text(reply.into())));
        self
    }

    pub fn fail_on(mut self, needle: &str, message: &str) -> Self {
        self.rules
            .push((needle.to_string(), Reply::Fail(message.to_string())));
        self
    }

    pub fn with_default(mut self, reply: impl Into<String>) -> Self {
        self.default = Some(reply.into());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts seen so far, each flattened to one string.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    /// Model requested by each call.
    pub fn models(&self) -> Vec<String> {
        self.models.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let prompt: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.prompts.lock().unwrap().push(prompt.clone());
        self.models.lock().unwrap().push(request.model.clone());

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply);

        let text = match reply {
            Some(Reply::Text(text)) => text.clone(),
            Some(Reply::Fail(message)) => {
                return Err(VaultZeroError::Generation(message.clone()));
            }
            None => self.default.clone().unwrap_or_default(),
        };

        Ok(Generation {
            text,
            model: request.model.clone(),
            tokens_in: 0,
            tokens_out: 0,
            latency_ms: 0,
        })
    }
}

pub(crate) fn test_settings() -> LlmSettings {
    LlmSettings {
        model: "test-model".into(),
        summary_model: "test-summary-model".into(),
        max_tokens: 512,
        temperature: 0.0,
        timeout: Duration::from_secs(5),
    }
}

pub(crate) fn test_context(generator: Arc<ScriptedGenerator>) -> StageContext {
    StageContext::new(generator, test_settings()).with_output_dir(temp_dir())
}

/// A fresh, not-yet-created directory under the system temp dir.
pub(crate) fn temp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("vz_test_{}", Uuid::now_v7()))
}
