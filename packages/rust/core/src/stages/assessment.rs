//! Questionnaire assessment: score each answered pillar, then synthesise
//! the cross-pillar findings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use vaultzero_llm::{Structured, create_prompt};
use vaultzero_shared::{Pillar, PillarScore, Result, mean_score};

use crate::stage::{Stage, StageContext};
use crate::stages::pillar::{MATURITY_SCALE, PillarAnalysis, analyze_pillar, bullet_list};
use crate::state::{StageData, StateField, WorkflowState};

/// Cross-pillar synthesis returned as JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentSynthesis {
    pub system_name: String,
    pub key_gaps: Vec<String>,
    pub quick_wins: Vec<String>,
    pub strategic_recommendations: Vec<String>,
}

/// Reads the description and answers; writes `pillar_analyses`,
/// `overall_score` and `synthesis`.
pub struct AssessmentStage;

const PILLAR_SYSTEM: &str = "You are a Zero Trust security expert assessing one pillar of a system \
against NIST SP 800-207 based on the owner's own description of their controls.";

const SYNTHESIS_SYSTEM: &str = "You are a Zero Trust security expert summarising a completed \
maturity assessment. Respond with ONLY valid JSON.";

fn pillar_task(pillar: Pillar, answer: &str) -> String {
    format!(
        "PILLAR: {}

RESPONSE:
{answer}

{MATURITY_SCALE}

Respond in this format:
SCORE: <0-5>
FINDINGS:
<2-3 sentence assessment>
GAPS:
- <specific gap>
STRENGTHS:
- <specific strength>
RECOMMENDATIONS:
- <specific next step>

Be specific, actionable, and objective.",
        pillar.display_name()
    )
}

fn synthesis_task(analyses: &BTreeMap<Pillar, PillarAnalysis>) -> String {
    let mut out = String::from("PILLAR RESULTS:\n");
    for analysis in analyses.values() {
        out.push_str(&format!(
            "\n{} ({:.1}/5, {})\nGaps:\n{}\nStrengths:\n{}\n",
            analysis.pillar.display_name(),
            analysis.score(),
            analysis.rating.level(),
            bullet_list(&analysis.gaps),
            bullet_list(&analysis.strengths),
        ));
    }
    out.push_str(
        r#"
Provide the synthesis in JSON format:
{
  "system_name": "Extract from description or create an appropriate name",
  "key_gaps": ["Top 5 critical gaps across all pillars"],
  "quick_wins": ["3-5 low-effort, high-impact improvements"],
  "strategic_recommendations": ["3-5 long-term strategic initiatives"]
}"#,
    );
    out
}

#[async_trait]
impl Stage for AssessmentStage {
    fn name(&self) -> &'static str {
        "AssessmentAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[StateField::SystemDescription, StateField::Answers]
    }

    #[instrument(skip_all, fields(stage = "AssessmentAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let description = state.input.system_description.clone().unwrap_or_default();
        let answers = state.input.answers.clone().unwrap_or_default();
        info!(pillars = answers.len(), "assessing questionnaire");

        let mut analyses = BTreeMap::new();
        let mut issues = Vec::new();
        for (pillar, answer) in &answers {
            let messages = create_prompt(
                PILLAR_SYSTEM,
                &pillar_task(*pillar, answer),
                &[("System", description.clone())],
            );
            let analysis = analyze_pillar(ctx, self.name(), *pillar, messages, &mut issues).await;
            analyses.insert(*pillar, analysis);
        }

        let overall = PillarScore::new(mean_score(analyses.values().map(|a| a.score())));

        ctx.progress.subtask(self.name(), "synthesis");
        let response = ctx
            .call(
                self.name(),
                create_prompt(
                    SYNTHESIS_SYSTEM,
                    &synthesis_task(&analyses),
                    &[
                        ("System", description),
                        ("Overall score", format!("{:.2}/5.0", overall.score())),
                    ],
                ),
            )
            .await?;
        let synthesis = Structured::<AssessmentSynthesis>::from_response(&response);

        info!(
            overall = overall.score(),
            level = %overall.level(),
            synthesis_parsed = synthesis.parsed().is_some(),
            "assessment complete"
        );

        Ok(StageData {
            pillar_analyses: Some(analyses),
            overall_score: Some(overall),
            synthesis: Some(synthesis),
            issues,
            ..StageData::default()
        })
    }
}
