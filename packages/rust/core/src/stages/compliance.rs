//! Map the pillar findings onto compliance frameworks.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use vaultzero_llm::{create_prompt, parse};
use vaultzero_shared::{ComplianceMapping, Result, percentage};

use crate::stage::{Stage, StageContext};
use crate::state::{StageData, StateField, WorkflowState};

/// A named standard and the areas the mapping prompt focuses on.
#[derive(Debug, Clone, Copy)]
pub struct Framework {
    pub id: &'static str,
    pub name: &'static str,
    pub key_areas: &'static [&'static str],
}

pub const FRAMEWORKS: [Framework; 3] = [
    Framework {
        id: "NIST SP 800-207",
        name: "Zero Trust Architecture",
        key_areas: &[
            "ZT Core Principles",
            "ZT Deployment Models",
            "Trust Algorithm",
            "ZT Components",
        ],
    },
    Framework {
        id: "CMS ARS 5.1",
        name: "CMS Acceptable Risk Safeguards",
        key_areas: &[
            "Access Control",
            "Identity Management",
            "Continuous Monitoring",
            "Incident Response",
        ],
    },
    Framework {
        id: "CISA BOD 22-01",
        name: "Reducing the Significant Risk of Known Exploited Vulnerabilities",
        key_areas: &[
            "Vulnerability Remediation",
            "Asset Management",
            "Patch Management",
        ],
    },
];

/// Assumed framework size when the response does not state one.
const DEFAULT_TOTAL_CONTROLS: u32 = 15;
/// Framework size recorded for a mapping that could not be produced.
const FAILED_TOTAL_CONTROLS: u32 = 10;
/// Items this short are list noise ("N/A", "None").
const MIN_ITEM_CHARS: usize = 6;
/// Gaps and strengths passed to each framework prompt.
const FINDINGS_PER_PROMPT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceStatus {
    Excellent,
    Good,
    Fair,
    #[serde(rename = "Needs Improvement")]
    NeedsImprovement,
    #[serde(rename = "Critical Gaps")]
    CriticalGaps,
}

impl ComplianceStatus {
    pub fn from_percentage(pct: f64) -> Self {
        if pct >= 90.0 {
            Self::Excellent
        } else if pct >= 75.0 {
            Self::Good
        } else if pct >= 60.0 {
            Self::Fair
        } else if pct >= 40.0 {
            Self::NeedsImprovement
        } else {
            Self::CriticalGaps
        }
    }
}

impl fmt::Display for ComplianceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Excellent => "Excellent",
            Self::Good => "Good",
            Self::Fair => "Fair",
            Self::NeedsImprovement => "Needs Improvement",
            Self::CriticalGaps => "Critical Gaps",
        })
    }
}

/// All framework mappings plus the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceResults {
    pub mappings: Vec<ComplianceMapping>,
    /// Σmet / Σtotal × 100, one decimal.
    pub percentage: f64,
    pub status: ComplianceStatus,
}

impl ComplianceResults {
    pub fn from_mappings(mappings: Vec<ComplianceMapping>) -> Self {
        let pct = overall_percentage(&mappings);
        Self {
            mappings,
            percentage: pct,
            status: ComplianceStatus::from_percentage(pct),
        }
    }

    pub fn all_gaps(&self) -> impl Iterator<Item = &String> {
        self.mappings.iter().flat_map(|m| m.gaps.iter())
    }

    pub fn all_met(&self) -> impl Iterator<Item = &String> {
        self.mappings.iter().flat_map(|m| m.controls_met.iter())
    }
}

/// Controls met over controls total, across every framework.
pub fn overall_percentage(mappings: &[ComplianceMapping]) -> f64 {
    let met: u64 = mappings.iter().map(|m| m.controls_met_count() as u64).sum();
    let total: u64 = mappings.iter().map(|m| u64::from(m.total_controls)).sum();
    percentage(met, total)
}

/// Build a mapping from a sectioned response.
pub fn mapping_from_response(framework: &Framework, text: &str) -> ComplianceMapping {
    let tag = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .filter(|i| i.chars().count() >= MIN_ITEM_CHARS)
            .map(|i| format!("[{}] {i}", framework.id))
            .collect()
    };
    let controls_met = tag(parse::extract_section(text, "CONTROLS MET:"));
    let gaps = tag(parse::extract_section(text, "GAPS:"));
    let stated = parse::extract_count(text, "TOTAL CONTROLS:").unwrap_or(DEFAULT_TOTAL_CONTROLS);
    let total_controls = stated.max(controls_met.len() as u32);

    ComplianceMapping {
        framework: framework.id.to_string(),
        total_controls,
        controls_met,
        gaps,
    }
}

/// Mapping recorded when the framework call fails.
pub fn failed_mapping(framework: &Framework) -> ComplianceMapping {
    ComplianceMapping {
        framework: framework.id.to_string(),
        total_controls: FAILED_TOTAL_CONTROLS,
        controls_met: Vec::new(),
        gaps: vec![format!(
            "Could not map to {}; manual review needed",
            framework.id
        )],
    }
}

/// Reads `pillar_analyses`; writes `compliance`.
pub struct ComplianceStage;

#[async_trait]
impl Stage for ComplianceStage {
    fn name(&self) -> &'static str {
        "ComplianceAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[StateField::PillarAnalyses]
    }

    #[instrument(skip_all, fields(stage = "ComplianceAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let analyses = state.data.pillar_analyses.clone().unwrap_or_default();

        let scores = analyses
            .values()
            .map(|a| format!("{}: {:.1}/5", a.pillar.display_name(), a.score()))
            .collect::<Vec<_>>()
            .join("\n");
        let gaps: Vec<String> = analyses
            .values()
            .flat_map(|a| a.tagged_gaps())
            .take(FINDINGS_PER_PROMPT)
            .collect();
        let strengths: Vec<String> = analyses
            .values()
            .flat_map(|a| a.tagged_strengths())
            .take(FINDINGS_PER_PROMPT)
            .collect();

        let mut mappings = Vec::with_capacity(FRAMEWORKS.len());
        let mut issues = Vec::new();
        for framework in &FRAMEWORKS {
            ctx.progress.subtask(self.name(), framework.id);
            let system = format!(
                "You are a compliance expert mapping Zero Trust findings to {}.\n\n\
                 Framework: {}\nKey Areas: {}\n\n\
                 Based on the organization's Zero Trust maturity scores and findings, identify \
                 which framework controls are satisfied and which have gaps. \
                 Be specific and cite actual framework requirements where possible.",
                framework.id,
                framework.name,
                framework.key_areas.join(", "),
            );
            let user = format!(
                "ZERO TRUST MATURITY SCORES:\n{scores}\n\nIDENTIFIED GAPS:\n{}\n\nIDENTIFIED STRENGTHS:\n{}\n\n\
                 Map these findings to {} compliance.\n\nProvide:\nCONTROLS MET:\n- control\n\nGAPS:\n- gap\n\nTOTAL CONTROLS: <number>",
                crate::stages::pillar::bullet_list(&gaps),
                crate::stages::pillar::bullet_list(&strengths),
                framework.id,
            );

            let mapping = match ctx.call(self.name(), create_prompt(&system, &user, &[])).await {
                Ok(text) => mapping_from_response(framework, &text),
                Err(e) => {
                    warn!(framework = framework.id, error = %e, "framework mapping failed, using fallback");
                    issues.push(format!("{}: {} mapping failed: {e}", self.name(), framework.id));
                    failed_mapping(framework)
                }
            };
            mappings.push(mapping);
        }

        let results = ComplianceResults::from_mappings(mappings);
        info!(
            percentage = results.percentage,
            status = %results.status,
            "compliance mapping complete"
        );

        Ok(StageData {
            compliance: Some(results),
            issues,
            ..StageData::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::PillarAnalysis;
    use crate::state::WorkflowInput;
    use crate::test_support::{ScriptedGenerator, test_context};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use vaultzero_shared::Pillar;

    fn mapping(total: u32, met: usize) -> ComplianceMapping {
        ComplianceMapping {
            framework: "X".into(),
            total_controls: total,
            controls_met: (0..met).map(|i| format!("control {i}")).collect(),
            gaps: vec![],
        }
    }

    #[test]
    fn aggregate_is_weighted_by_totals() {
        assert_eq!(overall_percentage(&[mapping(10, 5), mapping(20, 10)]), 50.0);
        assert_eq!(overall_percentage(&[]), 0.0);
        assert_eq!(overall_percentage(&[mapping(3, 1)]), 33.3);
    }

    #[test]
    fn status_thresholds() {
        assert_eq!(ComplianceStatus::from_percentage(90.0), ComplianceStatus::Excellent);
        assert_eq!(ComplianceStatus::from_percentage(89.9), ComplianceStatus::Good);
        assert_eq!(ComplianceStatus::from_percentage(60.0), ComplianceStatus::Fair);
        assert_eq!(ComplianceStatus::from_percentage(40.0), ComplianceStatus::NeedsImprovement);
        assert_eq!(ComplianceStatus::from_percentage(12.0), ComplianceStatus::CriticalGaps);
        assert_eq!(
            serde_json::to_value(ComplianceStatus::CriticalGaps).unwrap(),
            "Critical Gaps"
        );
    }

    #[test]
    fn response_items_are_filtered_and_tagged() {
        let text = "CONTROLS MET:\n- MFA enforced (AC-2)\n- N/A\nGAPS:\n- No KEV tracking\nTOTAL CONTROLS: 12";
        let mapping = mapping_from_response(&FRAMEWORKS[2], text);
        assert_eq!(mapping.controls_met, vec!["[CISA BOD 22-01] MFA enforced (AC-2)"]);
        assert_eq!(mapping.gaps, vec!["[CISA BOD 22-01] No KEV tracking"]);
        assert_eq!(mapping.total_controls, 12);
    }

    #[test]
    fn total_defaults_and_never_undercounts() {
        let mapping = mapping_from_response(&FRAMEWORKS[0], "CONTROLS MET:\n- Policy engine\n");
        assert_eq!(mapping.total_controls, 15);

        let text = "CONTROLS MET:\n- Control one\n- Control two\n- Control three\nTOTAL CONTROLS: 2";
        let mapping = mapping_from_response(&FRAMEWORKS[0], text);
        assert_eq!(mapping.total_controls, 3);
        assert_eq!(mapping.compliance_score(), 100.0);
    }

    #[tokio::test]
    async fn failed_framework_is_isolated() {
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail_on("mapping Zero Trust findings to CMS ARS 5.1", "HTTP 503")
                .with_default("CONTROLS MET:\n- Continuous verification\nGAPS:\n- No device posture\nTOTAL CONTROLS: 4"),
        );
        let ctx = test_context(generator.clone());
        let mut analyses = BTreeMap::new();
        analyses.insert(
            Pillar::Identity,
            PillarAnalysis::from_response(Pillar::Identity, "SCORE: 3\nGAPS:\n- No PAM"),
        );
        let state = WorkflowState::new(WorkflowInput::default()).merge(
            StageData {
                pillar_analyses: Some(analyses),
                ..StageData::default()
            },
            "ZeroTrustAnalyzerAgent",
        );

        let state = ComplianceStage.process(state, &ctx).await.unwrap();
        let results = state.data.compliance.as_ref().unwrap();
        assert_eq!(results.mappings.len(), 3);
        let cms = &results.mappings[1];
        assert_eq!(cms.total_controls, 10);
        assert_eq!(cms.controls_met_count(), 0);
        assert_eq!(cms.gaps, vec!["Could not map to CMS ARS 5.1; manual review needed"]);
        // (1 + 0 + 1) / (4 + 10 + 4)
        assert_eq!(results.percentage, 11.1);
        assert_eq!(results.status, ComplianceStatus::CriticalGaps);
        assert_eq!(generator.calls(), 3);
        assert!(generator.prompts()[0].contains("[Identity] No PAM"));
        assert_eq!(state.errors.len(), 1);
    }
}
