//! The stage contract and the context every stage runs with.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, error, info, instrument};

use vaultzero_llm::{GenerationRequest, Generator, Message};
use vaultzero_shared::{AnthropicConfig, Result, VaultZeroError};

use crate::peers::PeerIndex;
use crate::state::{StageData, StateField, WorkflowState};

/// Model parameters shared by all stages of a run.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub model: String,
    /// Model for the executive summary.
    pub summary_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Upper bound on a single call.
    pub timeout: Duration,
}

impl From<&AnthropicConfig> for LlmSettings {
    fn from(config: &AnthropicConfig) -> Self {
        Self {
            model: config.model.clone(),
            summary_model: config.summary_model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            timeout: config.request_timeout(),
        }
    }
}

/// Progress callback for reporting pipeline status.
pub trait PipelineProgress: Send + Sync {
    /// Called before stage `index` (0-based) of `total` runs.
    fn stage_started(&self, name: &str, index: usize, total: usize);
    /// Called for each sub-task inside a stage (a pillar, a framework, a file).
    fn subtask(&self, stage: &str, label: &str);
    /// Called after a stage merged its results.
    fn stage_finished(&self, name: &str, index: usize, total: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl PipelineProgress for SilentProgress {
    fn stage_started(&self, _name: &str, _index: usize, _total: usize) {}
    fn subtask(&self, _stage: &str, _label: &str) {}
    fn stage_finished(&self, _name: &str, _index: usize, _total: usize) {}
}

/// Shared handles for one run: the generation client, the peer index and
/// where reports go.
pub struct StageContext {
    generator: Arc<dyn Generator>,
    pub settings: LlmSettings,
    pub peers: Option<Arc<dyn PeerIndex>>,
    pub output_dir: PathBuf,
    /// Peers retrieved by the benchmark stage.
    pub top_k: u32,
    pub progress: Arc<dyn PipelineProgress>,
}

impl StageContext {
    pub fn new(generator: Arc<dyn Generator>, settings: LlmSettings) -> Self {
        Self {
            generator,
            settings,
            peers: None,
            output_dir: PathBuf::from("./reports"),
            top_k: 3,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_peers(mut self, peers: Arc<dyn PeerIndex>) -> Self {
        self.peers = Some(peers);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_top_k(mut self, top_k: u32) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn PipelineProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// One round trip on the analysis model.
    pub async fn call(&self, stage: &str, messages: Vec<Message>) -> Result<String> {
        let model = self.settings.model.clone();
        self.call_model(stage, model, messages).await
    }

    /// One round trip on an explicit model, bounded by the configured timeout.
    #[instrument(skip_all, fields(stage = stage, model = %model))]
    pub async fn call_model(
        &self,
        stage: &str,
        model: String,
        messages: Vec<Message>,
    ) -> Result<String> {
        let request = GenerationRequest {
            model,
            messages,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
        };
        let prompt_len = request.prompt_len();
        let started = Instant::now();

        let generation =
            match tokio::time::timeout(self.settings.timeout, self.generator.generate(&request))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(VaultZeroError::Generation(format!(
                        "call timed out after {}s",
                        self.settings.timeout.as_secs()
                    )));
                }
            };

        debug!(
            prompt_len,
            response_len = generation.text.len(),
            tokens_in = generation.tokens_in,
            tokens_out = generation.tokens_out,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "generation call"
        );
        Ok(generation.text)
    }
}

/// One step of the pipeline.
///
/// `process` is the whole contract: fail fast on missing inputs, produce the
/// stage's slots, and merge them into the state.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fields that must be present before the stage runs.
    fn required(&self) -> &'static [StateField];

    /// Build prompts, call the service, parse the responses.
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData>;

    async fn process(&self, state: WorkflowState, ctx: &StageContext) -> Result<WorkflowState> {
        let missing = state.missing(self.required());
        if !missing.is_empty() {
            error!(stage = self.name(), ?missing, "missing required input");
            return Err(VaultZeroError::MissingInput {
                stage: self.name().to_string(),
                missing: missing.iter().map(|f| f.as_str().to_string()).collect(),
            });
        }

        let started = Instant::now();
        let updates = self.produce(&state, ctx).await?;
        info!(
            stage = self.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage complete"
        );
        Ok(state.merge(updates, self.name()))
    }
}
