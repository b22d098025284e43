//! The typed workflow state threaded through every stage.
//!
//! Inputs are set once when the run starts. Each stage fills its own slots
//! in [`StageData`]; [`WorkflowState::merge`] overwrites exactly the slots a
//! stage returned and stamps the bookkeeping fields.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vaultzero_llm::{ParseFailure, Structured};
use vaultzero_shared::{Pillar, PillarScore};

use crate::stages::{
    AssessmentSynthesis, BenchmarkResults, ComplianceResults, DocumentSummary, PillarAnalysis,
    RecommendationSet, ReportOutput, Roadmap,
};

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Caller-supplied inputs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_description: Option<String>,
    /// Questionnaire answers, one paragraph per pillar.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answers: Option<BTreeMap<Pillar, String>>,
    /// Documents to ingest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<PathBuf>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_mode: Option<String>,
}

impl WorkflowInput {
    pub fn questionnaire(description: impl Into<String>, answers: BTreeMap<Pillar, String>) -> Self {
        Self {
            system_description: Some(description.into()),
            answers: Some(answers),
            ..Self::default()
        }
    }

    pub fn documents(paths: Vec<PathBuf>, mode: impl Into<String>) -> Self {
        Self {
            documents: Some(paths),
            assessment_mode: Some(mode.into()),
            ..Self::default()
        }
    }
}

/// Every slot a stage can fill. `None` means "not produced yet".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_summaries: Option<Vec<DocumentSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_technologies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_controls: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_policies: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combined_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pillar_analyses: Option<BTreeMap<Pillar, PillarAnalysis>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<PillarScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Structured<AssessmentSynthesis>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Structured<RecommendationSet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<Roadmap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<ReportOutput>,
    /// Degraded sub-task notes raised by the stage; appended to `errors`.
    #[serde(skip)]
    pub issues: Vec<String>,
}

impl StageData {
    /// Strict-JSON results that failed to decode.
    pub fn parse_failures(&self) -> Vec<&ParseFailure> {
        let mut failures = Vec::new();
        if let Some(f) = self.synthesis.as_ref().and_then(Structured::failure) {
            failures.push(f);
        }
        if let Some(f) = self
            .benchmark
            .as_ref()
            .and_then(|b| b.analysis.failure())
        {
            failures.push(f);
        }
        if let Some(f) = self.recommendations.as_ref().and_then(Structured::failure) {
            failures.push(f);
        }
        failures
    }
}

/// Named state fields a stage can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateField {
    SystemDescription,
    Answers,
    Documents,
    DocumentSummaries,
    ExtractedTechnologies,
    ExtractedControls,
    ExtractedPolicies,
    CombinedText,
    PillarAnalyses,
    OverallScore,
    Synthesis,
    Compliance,
    Benchmark,
    Recommendations,
    Roadmap,
    Report,
}

impl StateField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemDescription => "system_description",
            Self::Answers => "answers",
            Self::Documents => "documents",
            Self::DocumentSummaries => "document_summaries",
            Self::ExtractedTechnologies => "extracted_technologies",
            Self::ExtractedControls => "extracted_controls",
            Self::ExtractedPolicies => "extracted_policies",
            Self::CombinedText => "combined_text",
            Self::PillarAnalyses => "pillar_analyses",
            Self::OverallScore => "overall_score",
            Self::Synthesis => "synthesis",
            Self::Compliance => "compliance",
            Self::Benchmark => "benchmark",
            Self::Recommendations => "recommendations",
            Self::Roadmap => "roadmap",
            Self::Report => "report",
        }
    }

    fn is_set(&self, state: &WorkflowState) -> bool {
        let input = &state.input;
        let data = &state.data;
        match self {
            Self::SystemDescription => input.system_description.is_some(),
            Self::Answers => input.answers.is_some(),
            Self::Documents => input.documents.is_some(),
            Self::DocumentSummaries => data.document_summaries.is_some(),
            Self::ExtractedTechnologies => data.extracted_technologies.is_some(),
            Self::ExtractedControls => data.extracted_controls.is_some(),
            Self::ExtractedPolicies => data.extracted_policies.is_some(),
            Self::CombinedText => data.combined_text.is_some(),
            Self::PillarAnalyses => data.pillar_analyses.is_some(),
            Self::OverallScore => data.overall_score.is_some(),
            Self::Synthesis => data.synthesis.is_some(),
            Self::Compliance => data.compliance.is_some(),
            Self::Benchmark => data.benchmark.is_some(),
            Self::Recommendations => data.recommendations.is_some(),
            Self::Roadmap => data.roadmap.is_some(),
            Self::Report => data.report.is_some(),
        }
    }
}

impl fmt::Display for StateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs, accumulated stage outputs and run metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    #[serde(flatten)]
    pub input: WorkflowInput,
    #[serde(flatten)]
    pub data: StageData,
    pub workflow_started: DateTime<Utc>,
    pub workflow_status: WorkflowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_agent: Option<String>,
}

impl WorkflowState {
    pub fn new(input: WorkflowInput) -> Self {
        Self {
            input,
            data: StageData::default(),
            workflow_started: Utc::now(),
            workflow_status: WorkflowStatus::Pending,
            current_step: None,
            errors: Vec::new(),
            last_updated: None,
            last_agent: None,
        }
    }

    /// The subset of `required` that is absent, in the order given.
    pub fn missing(&self, required: &[StateField]) -> Vec<StateField> {
        required
            .iter()
            .copied()
            .filter(|f| !f.is_set(self))
            .collect()
    }

    /// Overwrite every slot present in `updates` and stamp `last_updated` /
    /// `last_agent`. Slots absent from `updates` are left untouched.
    pub fn merge(mut self, updates: StageData, agent: &str) -> Self {
        macro_rules! overwrite {
            ($($field:ident),* $(,)?) => {
                $(
                    if updates.$field.is_some() {
                        self.data.$field = updates.$field;
                    }
                )*
            };
        }

        for issue in &updates.issues {
            if !self.errors.contains(issue) {
                self.errors.push(issue.clone());
            }
        }
        for failure in updates.parse_failures() {
            let note = format!("{agent}: {failure}");
            if !self.errors.contains(&note) {
                self.errors.push(note);
            }
        }

        overwrite!(
            document_summaries,
            extracted_technologies,
            extracted_controls,
            extracted_policies,
            combined_text,
            pillar_analyses,
            overall_score,
            synthesis,
            compliance,
            benchmark,
            recommendations,
            roadmap,
            report,
        );

        self.last_updated = Some(Utc::now());
        self.last_agent = Some(agent.to_string());
        self
    }

    /// Number of strict-JSON failures currently held in state.
    pub fn parse_failure_count(&self) -> usize {
        self.data.parse_failures().len()
    }
}
