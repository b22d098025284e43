//! Linear workflow orchestration: Start → stage₁ … stageₙ → Complete | Failed.
//!
//! An [`Orchestrator`] threads one [`WorkflowState`] through an ordered list
//! of stages. Any stage error aborts the remaining sequence and leaves the
//! partially filled state for diagnostics; a clean run ends with the
//! [`FinalReport`] view of the state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use vaultzero_llm::Structured;
use vaultzero_shared::{MaturityLevel, Pillar, PillarScore, Result, RunId, RunMeta, VaultZeroError};

use crate::stage::{Stage, StageContext};
use crate::stages::{
    AssessmentStage, AssessmentSynthesis, BenchmarkResults, BenchmarkStage, ComplianceResults,
    ComplianceStage, DocumentIntake, DocumentSummary, PillarAnalysis, PillarAnalysisStage,
    RecommendationSet, RecommendationStage, ReportStage, Roadmap, RoadmapStage,
};
use crate::state::{WorkflowInput, WorkflowState, WorkflowStatus};

/// Recommendations listed in the report summary.
const SUMMARY_RECOMMENDATIONS: usize = 5;

/// A named, ordered list of stages.
pub struct Pipeline {
    pub name: &'static str,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(name: &'static str, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { name, stages }
    }

    /// Questionnaire answers → assessment, benchmark, recommendations,
    /// roadmap, report.
    pub fn questionnaire() -> Self {
        Self::new(
            "questionnaire",
            vec![
                Box::new(AssessmentStage),
                Box::new(BenchmarkStage),
                Box::new(RecommendationStage),
                Box::new(RoadmapStage),
                Box::new(ReportStage),
            ],
        )
    }

    /// Uploaded documents → intake, pillar analysis, compliance, report.
    pub fn documents() -> Self {
        Self::new(
            "documents",
            vec![
                Box::new(DocumentIntake),
                Box::new(PillarAnalysisStage),
                Box::new(ComplianceStage),
                Box::new(ReportStage),
            ],
        )
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

/// How a run ended. Both variants carry the state as it was left.
#[derive(Debug)]
pub enum RunOutcome {
    Complete {
        state: WorkflowState,
        report: FinalReport,
    },
    Failed {
        state: WorkflowState,
        stage: String,
        error: VaultZeroError,
    },
}

impl RunOutcome {
    pub fn state(&self) -> &WorkflowState {
        match self {
            Self::Complete { state, .. } | Self::Failed { state, .. } => state,
        }
    }
}

/// Snapshot of a run for progress displays.
#[derive(Debug, Clone, Serialize)]
pub struct RunStatus {
    pub current_step: Option<String>,
    pub status: WorkflowStatus,
    /// Completed stages as a share of the pipeline, 0-100.
    pub progress: u8,
    pub errors: Vec<String>,
}

/// Runs a [`Pipeline`] with one shared [`StageContext`].
pub struct Orchestrator {
    pipeline: Pipeline,
    ctx: StageContext,
    halt_on_parse_failure: bool,
}

impl Orchestrator {
    pub fn new(pipeline: Pipeline, ctx: StageContext) -> Self {
        Self {
            pipeline,
            ctx,
            halt_on_parse_failure: false,
        }
    }

    /// Treat a strict-JSON decode failure as fatal for the run.
    pub fn halt_on_parse_failure(mut self, halt: bool) -> Self {
        self.halt_on_parse_failure = halt;
        self
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Run every stage in order and report how the run ended.
    #[instrument(skip_all, fields(pipeline = self.pipeline.name))]
    pub async fn execute(&self, input: WorkflowInput) -> RunOutcome {
        let run_id = RunId::new();
        let started = Instant::now();
        let total = self.pipeline.len();

        let mut state = WorkflowState::new(input);
        state.workflow_status = WorkflowStatus::Running;
        info!(%run_id, stages = total, "workflow started");

        for (index, stage) in self.pipeline.stages.iter().enumerate() {
            let name = stage.name();
            state.current_step = Some(name.to_string());
            self.ctx.progress.stage_started(name, index, total);

            let failures_before = state.parse_failure_count();
            let snapshot = state.clone();
            state = match stage.process(state, &self.ctx).await {
                Ok(next) => next,
                Err(e) => return fail(snapshot, name, e),
            };

            if self.halt_on_parse_failure && state.parse_failure_count() > failures_before {
                let e = VaultZeroError::parse(format!(
                    "{name} returned a response that could not be decoded"
                ));
                return fail(state, name, e);
            }
            self.ctx.progress.stage_finished(name, index, total);
        }

        state.workflow_status = WorkflowStatus::Complete;
        state.current_step = None;
        if !state.errors.is_empty() {
            warn!(count = state.errors.len(), "workflow completed with degraded results");
        }

        let meta = RunMeta {
            run_id,
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: state.workflow_started,
            finished_at: Utc::now(),
        };
        let report = FinalReport::assemble(&state, self.pipeline.name, meta);
        info!(
            overall = report.overall_score,
            level = %report.overall_maturity_level,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workflow complete"
        );
        RunOutcome::Complete { state, report }
    }

    /// [`execute`](Self::execute), with a failed run as an error.
    pub async fn run(&self, input: WorkflowInput) -> Result<FinalReport> {
        match self.execute(input).await {
            RunOutcome::Complete { report, .. } => Ok(report),
            RunOutcome::Failed { stage, error, .. } => {
                Err(VaultZeroError::stage_failed(stage, error))
            }
        }
    }

    /// Where `state` stands within this orchestrator's pipeline.
    pub fn status(&self, state: &WorkflowState) -> RunStatus {
        let total = self.pipeline.len();
        let done = match state.workflow_status {
            WorkflowStatus::Complete => total,
            WorkflowStatus::Pending => 0,
            WorkflowStatus::Running | WorkflowStatus::Failed => state
                .current_step
                .as_deref()
                .and_then(|step| self.pipeline.stages.iter().position(|s| s.name() == step))
                .unwrap_or(0),
        };
        let progress = if total == 0 { 100 } else { done * 100 / total };

        RunStatus {
            current_step: state.current_step.clone(),
            status: state.workflow_status,
            progress: progress as u8,
            errors: state.errors.clone(),
        }
    }
}

fn fail(mut state: WorkflowState, stage: &str, e: VaultZeroError) -> RunOutcome {
    error!(stage, error = %e, "workflow failed");
    state.workflow_status = WorkflowStatus::Failed;
    state.errors.push(format!("{stage}: {e}"));
    RunOutcome::Failed {
        state,
        stage: stage.to_string(),
        error: e,
    }
}

// ---------------------------------------------------------------------------
// FinalReport
// ---------------------------------------------------------------------------

/// Headline numbers for the top of a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSummary {
    pub current_maturity: MaturityLevel,
    pub overall_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peer_percentile: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_maturity: Option<MaturityLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_range: Option<String>,
    pub top_recommendations: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_percentage: Option<f64>,
}

/// The caller-facing view of a completed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub meta: RunMeta,
    pub pipeline: String,
    pub summary: ReportSummary,
    pub pillars: BTreeMap<Pillar, PillarAnalysis>,
    pub overall_score: f64,
    pub overall_maturity_level: MaturityLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<Structured<AssessmentSynthesis>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<DocumentSummary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub benchmark: Option<BenchmarkResults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Structured<RecommendationSet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roadmap: Option<Roadmap>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_path: Option<PathBuf>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl FinalReport {
    pub fn assemble(state: &WorkflowState, pipeline: &str, meta: RunMeta) -> Self {
        let data = &state.data;
        let pillars = data.pillar_analyses.clone().unwrap_or_default();
        let overall = data.overall_score.unwrap_or_else(|| PillarScore::new(0.0));

        let ranked: Vec<String> = match data.recommendations.as_ref().and_then(Structured::parsed) {
            Some(set) => set
                .top(SUMMARY_RECOMMENDATIONS)
                .iter()
                .map(|r| r.recommendation.clone())
                .collect(),
            None => pillars
                .values()
                .flat_map(|a| a.tagged_recommendations())
                .take(SUMMARY_RECOMMENDATIONS)
                .collect(),
        };

        let summary = ReportSummary {
            current_maturity: overall.level(),
            overall_score: overall.score(),
            peer_percentile: data.benchmark.as_ref().and_then(|b| b.overall_percentile()),
            target_maturity: data.roadmap.as_ref().and_then(Roadmap::final_target),
            investment_range: data.roadmap.as_ref().map(|r| r.total_investment.to_string()),
            top_recommendations: ranked,
            compliance_percentage: data.compliance.as_ref().map(|c| c.percentage),
        };

        Self {
            meta,
            pipeline: pipeline.to_string(),
            summary,
            pillars,
            overall_score: overall.score(),
            overall_maturity_level: overall.level(),
            synthesis: data.synthesis.clone(),
            documents: data.document_summaries.clone(),
            compliance: data.compliance.clone(),
            benchmark: data.benchmark.clone(),
            recommendations: data.recommendations.clone(),
            roadmap: data.roadmap.clone(),
            report_path: data.report.as_ref().map(|r| r.path.clone()),
            errors: state.errors.clone(),
        }
    }

    /// Write the report as pretty JSON under `dir`.
    pub fn write_json(&self, dir: &Path, filename: &str) -> Result<PathBuf> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| VaultZeroError::parse(format!("report serialization failed: {e}")))?;
        crate::stages::write_report(dir, filename, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedGenerator, test_context};
    use std::sync::Arc;

    const SYNTHESIS: &str = r#"```json
{"system_name": "Claims Portal", "key_gaps": ["No data classification"],
 "quick_wins": ["Enable DLP in monitor mode"], "strategic_recommendations": ["Adopt ABAC"]}
```"#;

    const BENCHMARK: &str = r#"{"overall_percentile": 40, "pillar_rankings": {},
 "strengths_vs_peers": ["Identity"], "gaps_vs_peers": ["Data"],
 "peer_best_practices": [], "competitive_position": "Mid-pack."}"#;

    const RECOMMENDATIONS: &str = r#"{"prioritized_recommendations": [
 {"recommendation": "Classify sensitive data", "pillar": "Data", "priority": "Critical", "impact_score": 9},
 {"recommendation": "Roll out device posture checks", "pillar": "Devices", "priority": "High", "impact_score": 7},
 {"recommendation": "Tune SIEM alerts", "pillar": "Networks", "priority": "Low", "impact_score": 4}
]}"#;

    fn questionnaire_input() -> WorkflowInput {
        let answers = [
            (Pillar::Identity, "Okta SSO with phishing-resistant MFA for every user."),
            (Pillar::Devices, "Laptops are enrolled in MDM."),
            (Pillar::Networks, "Some VLAN segmentation."),
            (Pillar::Applications, "Apps behind a reverse proxy."),
            (Pillar::Data, "No classification; shared drives are open."),
        ]
        .into_iter()
        .map(|(p, a)| (p, a.to_string()))
        .collect();
        WorkflowInput::questionnaire("Claims processing portal for a state agency", answers)
    }

    fn scripted() -> ScriptedGenerator {
        ScriptedGenerator::new()
            .on("PILLAR: Identity", "SCORE: 4\nSTRENGTHS:\n- Phishing-resistant MFA")
            .on("PILLAR: Data", "SCORE: 1\nGAPS:\n- No data classification")
            .on("PILLAR RESULTS:", SYNTHESIS)
            .on("ASSESSMENT RESULTS:", BENCHMARK)
            .on("prioritized_recommendations", RECOMMENDATIONS)
            .on("4-PHASE", "Phase 1 starts with data classification.")
            .on("executive summary", "The portal is at the Defined level.")
            .with_default("SCORE: 2")
    }

    #[tokio::test]
    async fn questionnaire_run_assembles_report() {
        let generator = Arc::new(scripted());
        let orchestrator =
            Orchestrator::new(Pipeline::questionnaire(), test_context(generator.clone()));

        let outcome = orchestrator.execute(questionnaire_input()).await;
        let (state, report) = match outcome {
            RunOutcome::Complete { state, report } => (state, report),
            RunOutcome::Failed { stage, error, .. } => panic!("{stage} failed: {error}"),
        };

        let identity = report.pillars[&Pillar::Identity].score();
        let data = report.pillars[&Pillar::Data].score();
        assert!(identity > data);
        let mean = report.pillars.values().map(|a| a.score()).sum::<f64>() / 5.0;
        assert!((report.overall_score - mean).abs() < 1e-9);
        assert!((report.overall_score - 2.2).abs() < 1e-9);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["pillars"]["identity"]["score"], 4.0);
        assert_eq!(json["overall_maturity_level"], "Defined");

        assert_eq!(report.summary.peer_percentile, Some(40.0));
        assert_eq!(report.summary.top_recommendations[0], "Classify sensitive data");
        assert_eq!(report.summary.investment_range.as_deref(), Some("$700K - $1.45M"));
        assert_eq!(report.summary.target_maturity, Some(MaturityLevel::Optimized));
        assert!(report.report_path.as_ref().unwrap().exists());
        assert!(report.errors.is_empty());

        // five pillars, synthesis, benchmark, recommendations, roadmap, summary
        assert_eq!(generator.calls(), 10);
        assert_eq!(state.workflow_status, WorkflowStatus::Complete);
        assert_eq!(state.last_agent.as_deref(), Some("ReportWriterAgent"));

        let status = orchestrator.status(&state);
        assert_eq!(status.progress, 100);
        assert_eq!(status.status, WorkflowStatus::Complete);
    }

    #[tokio::test]
    async fn failing_pillar_still_completes() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail_on("PILLAR: Data", "HTTP 500: api_error: overloaded")
                .on("PILLAR RESULTS:", SYNTHESIS)
                .on("ASSESSMENT RESULTS:", BENCHMARK)
                .on("prioritized_recommendations", RECOMMENDATIONS)
                .on("4-PHASE", "Roadmap.")
                .on("executive summary", "Summary.")
                .with_default("SCORE: 3"),
        );
        let orchestrator = Orchestrator::new(Pipeline::questionnaire(), test_context(generator));

        let report = orchestrator.run(questionnaire_input()).await.unwrap();
        assert_eq!(report.pillars.len(), 5);
        let data = &report.pillars[&Pillar::Data];
        assert_eq!(data.score(), 0.0);
        assert!(data.degraded);
        assert!(data.gaps[0].contains("manual review needed"));
        assert!((report.overall_score - 12.0 / 5.0).abs() < 1e-9);
        assert!(report.errors.iter().any(|e| e.contains("Data")));
    }

    #[tokio::test]
    async fn missing_input_fails_before_any_call() {
        let generator = Arc::new(scripted());
        let orchestrator =
            Orchestrator::new(Pipeline::questionnaire(), test_context(generator.clone()));

        let outcome = orchestrator.execute(WorkflowInput::default()).await;
        match &outcome {
            RunOutcome::Failed { stage, error, .. } => {
                assert_eq!(stage, "AssessmentAgent");
                assert!(matches!(error, VaultZeroError::MissingInput { .. }));
            }
            RunOutcome::Complete { .. } => panic!("run should fail"),
        }
        assert_eq!(generator.calls(), 0);

        let status = orchestrator.status(outcome.state());
        assert_eq!(status.status, WorkflowStatus::Failed);
        assert_eq!(status.current_step.as_deref(), Some("AssessmentAgent"));
        assert_eq!(status.progress, 0);
        assert_eq!(status.errors.len(), 1);
    }

    #[tokio::test]
    async fn aborting_stage_keeps_partial_state() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("PILLAR RESULTS:", SYNTHESIS)
                .fail_on("ASSESSMENT RESULTS:", "HTTP 529: overloaded_error")
                .with_default("SCORE: 2"),
        );
        let orchestrator = Orchestrator::new(Pipeline::questionnaire(), test_context(generator));

        let outcome = orchestrator.execute(questionnaire_input()).await;
        let status = orchestrator.status(outcome.state());
        assert_eq!(status.current_step.as_deref(), Some("BenchmarkAgent"));
        assert_eq!(status.progress, 20);
        assert!(outcome.state().data.pillar_analyses.is_some());
        assert!(outcome.state().data.benchmark.is_none());

        let err = orchestrator.run(questionnaire_input()).await.unwrap_err();
        assert!(matches!(err, VaultZeroError::StageFailed { ref stage, .. } if stage == "BenchmarkAgent"));
    }

    #[tokio::test]
    async fn parse_failure_halts_when_configured() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("PILLAR RESULTS:", "I could not produce JSON this time.")
                .with_default("SCORE: 2"),
        );
        let orchestrator = Orchestrator::new(Pipeline::questionnaire(), test_context(generator.clone()))
            .halt_on_parse_failure(true);

        match orchestrator.execute(questionnaire_input()).await {
            RunOutcome::Failed { stage, error, state } => {
                assert_eq!(stage, "AssessmentAgent");
                assert!(matches!(error, VaultZeroError::Parse { .. }));
                assert!(state.data.synthesis.as_ref().unwrap().failure().is_some());
            }
            RunOutcome::Complete { .. } => panic!("run should halt"),
        }
        assert_eq!(generator.calls(), 6);
    }

    #[tokio::test]
    async fn parse_failure_is_recorded_by_default() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("PILLAR RESULTS:", "not json")
                .on("ASSESSMENT RESULTS:", BENCHMARK)
                .on("prioritized_recommendations", RECOMMENDATIONS)
                .with_default("SCORE: 2"),
        );
        let orchestrator = Orchestrator::new(Pipeline::questionnaire(), test_context(generator));

        let report = orchestrator.run(questionnaire_input()).await.unwrap();
        assert!(report.synthesis.unwrap().failure().is_some());
        assert!(report.errors.iter().any(|e| e.starts_with("AssessmentAgent: could not decode JSON")));
    }

    #[tokio::test]
    async fn document_run_maps_compliance() {
        let dir = crate::test_support::temp_dir();
        std::fs::create_dir_all(&dir).unwrap();
        let doc = dir.join("architecture.md");
        std::fs::write(&doc, "# Architecture\n\nAll staff sign in through Okta with MFA.").unwrap();

        let generator = Arc::new(
            ScriptedGenerator::new()
                .on(
                    "Extract Zero Trust elements",
                    "TECHNOLOGIES:\n- Okta\nCONTROLS:\n- MFA\nPOLICIES:\n- Access policy",
                )
                .on(
                    "mapping Zero Trust findings to",
                    "CONTROLS MET:\n- Policy engine deployed\nGAPS:\n- No continuous diagnostics\nTOTAL CONTROLS: 10",
                )
                .on("executive summary", "Summary.")
                .on("PILLAR: Identity", "SCORE: 3\nSTRENGTHS:\n- Okta SSO")
                .with_default("SCORE: 1\nA short document summary."),
        );
        let orchestrator = Orchestrator::new(Pipeline::documents(), test_context(generator.clone()));

        let report = orchestrator
            .run(WorkflowInput::documents(vec![doc], "full"))
            .await
            .unwrap();
        assert_eq!(report.pillars.len(), Pillar::ALL.len());
        assert_eq!(report.pillars[&Pillar::Identity].score(), 3.0);
        assert_eq!(report.documents.as_ref().unwrap().len(), 1);
        assert_eq!(report.summary.compliance_percentage, Some(10.0));
        assert!(report.benchmark.is_none());
        // summary, extraction, seven pillars, three frameworks, executive summary
        assert_eq!(generator.calls(), 13);
    }

    #[test]
    fn pipelines_are_ordered() {
        assert_eq!(
            Pipeline::questionnaire().stage_names(),
            vec![
                "AssessmentAgent",
                "BenchmarkAgent",
                "RecommendationAgent",
                "RoadmapAgent",
                "ReportWriterAgent"
            ]
        );
        assert_eq!(Pipeline::documents().len(), 4);
    }
}
