//! Seven-pillar maturity analysis over extracted document evidence.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::{info, instrument};

use vaultzero_llm::create_prompt;
use vaultzero_shared::{Pillar, PillarScore, Result, mean_score};

use crate::stage::{Stage, StageContext};
use crate::stages::pillar::{MATURITY_SCALE, analyze_pillar, bullet_list};
use crate::state::{StageData, StateField, WorkflowState};

/// Reads the extracted lists; writes `pillar_analyses` and `overall_score`.
pub struct PillarAnalysisStage;

fn system_prompt(pillar: Pillar) -> String {
    format!(
        "You are a Zero Trust security expert analyzing the {} pillar.

Based on NIST 800-207 guidelines, evaluate the organization's maturity in this pillar.

{MATURITY_SCALE}

Provide:
SCORE: single number 0-5
GAPS: specific weaknesses or missing controls
STRENGTHS: what is working well
RECOMMENDATIONS: specific next steps

Be realistic and critical; most organizations are at level 2-3.",
        pillar.display_name()
    )
}

#[async_trait]
impl Stage for PillarAnalysisStage {
    fn name(&self) -> &'static str {
        "ZeroTrustAnalyzerAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[
            StateField::ExtractedTechnologies,
            StateField::ExtractedControls,
            StateField::ExtractedPolicies,
        ]
    }

    #[instrument(skip_all, fields(stage = "ZeroTrustAnalyzerAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let data = &state.data;
        let technologies = data.extracted_technologies.as_deref().unwrap_or_default();
        let controls = data.extracted_controls.as_deref().unwrap_or_default();
        let policies = data.extracted_policies.as_deref().unwrap_or_default();
        info!(
            technologies = technologies.len(),
            controls = controls.len(),
            policies = policies.len(),
            "analyzing pillars"
        );

        let mut analyses = BTreeMap::new();
        let mut issues = Vec::new();
        for pillar in Pillar::ALL {
            let user = format!(
                "PILLAR: {}\n\nTECHNOLOGIES IDENTIFIED:\n{}\n\nCONTROLS IDENTIFIED:\n{}\n\nPOLICIES IDENTIFIED:\n{}\n\nAnalyze this pillar and provide score, gaps, strengths, and recommendations.",
                pillar.display_name(),
                bullet_list(technologies),
                bullet_list(controls),
                bullet_list(policies),
            );
            let messages = create_prompt(&system_prompt(pillar), &user, &[]);
            let analysis = analyze_pillar(ctx, self.name(), pillar, messages, &mut issues).await;
            analyses.insert(pillar, analysis);
        }

        let overall = PillarScore::new(mean_score(analyses.values().map(|a| a.score())));
        info!(
            overall = overall.score(),
            level = %overall.level(),
            "pillar analysis complete"
        );

        Ok(StageData {
            pillar_analyses: Some(analyses),
            overall_score: Some(overall),
            issues,
            ..StageData::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowInput;
    use crate::test_support::{ScriptedGenerator, test_context};
    use std::sync::Arc;

    fn extracted_state() -> WorkflowState {
        WorkflowState::new(WorkflowInput::documents(vec![], "full")).merge(
            StageData {
                extracted_technologies: Some(vec!["Okta".into()]),
                extracted_controls: Some(vec!["MFA".into()]),
                extracted_policies: Some(vec![]),
                ..StageData::default()
            },
            "DocumentAgent",
        )
    }

    #[tokio::test]
    async fn scores_all_seven_pillars() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("PILLAR: Identity", "SCORE: 4\nGAPS:\n- No PAM\nSTRENGTHS:\n- Okta SSO")
                .with_default("SCORE: 2\nGAPS:\n- Limited coverage"),
        );
        let ctx = test_context(generator.clone());

        let state = PillarAnalysisStage
            .process(extracted_state(), &ctx)
            .await
            .unwrap();
        let analyses = state.data.pillar_analyses.as_ref().unwrap();
        assert_eq!(analyses.len(), 7);
        assert_eq!(analyses[&Pillar::Identity].score(), 4.0);
        assert_eq!(analyses[&Pillar::Automation].score(), 2.0);
        // (4 + 6 * 2) / 7
        let overall = state.data.overall_score.unwrap().score();
        assert!((overall - 16.0 / 7.0).abs() < 1e-9);
        assert_eq!(generator.calls(), 7);
        assert!(generator.prompts()[0].contains("- Okta"));
        assert!(generator.prompts()[0].contains("POLICIES IDENTIFIED:\n- None identified"));
    }

    #[tokio::test]
    async fn failed_pillar_is_isolated() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail_on("PILLAR: Data", "HTTP 529: overloaded")
                .with_default("SCORE: 3"),
        );
        let ctx = test_context(generator);

        let state = PillarAnalysisStage
            .process(extracted_state(), &ctx)
            .await
            .unwrap();
        let analyses = state.data.pillar_analyses.as_ref().unwrap();
        assert_eq!(analyses.len(), 7);
        let data = &analyses[&Pillar::Data];
        assert_eq!(data.score(), 0.0);
        assert!(data.degraded);
        assert!(data.gaps[0].contains("manual review needed"));
        assert_eq!(analyses[&Pillar::Networks].score(), 3.0);
        assert_eq!(state.errors.len(), 1);
    }

    #[tokio::test]
    async fn requires_extraction_output() {
        let generator = Arc::new(ScriptedGenerator::new());
        let ctx = test_context(generator.clone());
        let err = PillarAnalysisStage
            .process(WorkflowState::new(WorkflowInput::default()), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("extracted_technologies"));
        assert_eq!(generator.calls(), 0);
    }
}
