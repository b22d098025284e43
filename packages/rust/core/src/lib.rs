//! Assessment pipeline and domain logic for VaultZero.
//!
//! This crate ties the generation client, the peer index and the parsing
//! helpers into the two end-to-end workflows (questionnaire and document
//! upload) driven by [`Orchestrator`].

pub mod peers;
pub mod pipeline;
pub mod render;
pub mod stage;
pub mod stages;
pub mod state;

#[cfg(test)]
mod test_support;

pub use peers::{LazyPeerIndex, PeerComparison, PeerIndex, PeerMatch, PillarStats};
pub use pipeline::{FinalReport, Orchestrator, Pipeline, ReportSummary, RunOutcome, RunStatus};
pub use stage::{LlmSettings, PipelineProgress, SilentProgress, Stage, StageContext};
pub use state::{StageData, StateField, WorkflowInput, WorkflowState, WorkflowStatus};
