//! Per-pillar prompt round trip with an isolated fallback.

use serde::{Deserialize, Serialize};
use tracing::warn;

use vaultzero_llm::{Message, parse};
use vaultzero_shared::{MAX_SCORE, Pillar, PillarScore};

use crate::stage::StageContext;

/// Maturity scale explained to the model in every pillar prompt.
pub(crate) const MATURITY_SCALE: &str = "Maturity levels (0-5):
0 - No implementation
1 - Initial/Ad-hoc (some basic controls)
2 - Developing (documented processes, inconsistent)
3 - Defined (standardized, consistently applied)
4 - Managed (measured, controlled)
5 - Optimized (continuously improving, automated)";

/// One pillar's score and findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PillarAnalysis {
    pub pillar: Pillar,
    #[serde(flatten)]
    pub rating: PillarScore,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub findings: String,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// True when the score is a fallback rather than an analysis.
    #[serde(default)]
    pub degraded: bool,
}

impl PillarAnalysis {
    /// Parse a sectioned response (`SCORE:`, `FINDINGS:`, `GAPS:` ...).
    pub fn from_response(pillar: Pillar, text: &str) -> Self {
        Self {
            pillar,
            rating: PillarScore::new(parse::extract_score(text, 0.0, MAX_SCORE)),
            findings: parse::extract_paragraph(text, "FINDINGS:"),
            gaps: parse::extract_section(text, "GAPS:"),
            strengths: parse::extract_section(text, "STRENGTHS:"),
            recommendations: parse::extract_section(text, "RECOMMENDATIONS:"),
            degraded: false,
        }
    }

    /// Placeholder for a pillar whose call failed.
    pub fn failed(pillar: Pillar) -> Self {
        let name = pillar.display_name();
        Self {
            pillar,
            rating: PillarScore::new(0.0),
            findings: String::new(),
            gaps: vec![format!("Could not analyze {name}; manual review needed")],
            strengths: Vec::new(),
            recommendations: vec![format!("Manual review needed for {name}")],
            degraded: true,
        }
    }

    pub fn score(&self) -> f64 {
        self.rating.score()
    }

    fn tag(&self, items: &[String]) -> Vec<String> {
        let name = self.pillar.display_name();
        items.iter().map(|i| format!("[{name}] {i}")).collect()
    }

    pub fn tagged_gaps(&self) -> Vec<String> {
        self.tag(&self.gaps)
    }

    pub fn tagged_strengths(&self) -> Vec<String> {
        self.tag(&self.strengths)
    }

    pub fn tagged_recommendations(&self) -> Vec<String> {
        self.tag(&self.recommendations)
    }
}

/// Run one pillar prompt. A failed call yields [`PillarAnalysis::failed`]
/// plus an issue note; it never aborts the stage.
pub(crate) async fn analyze_pillar(
    ctx: &StageContext,
    stage: &str,
    pillar: Pillar,
    messages: Vec<Message>,
    issues: &mut Vec<String>,
) -> PillarAnalysis {
    ctx.progress.subtask(stage, pillar.display_name());
    match ctx.call(stage, messages).await {
        Ok(text) => PillarAnalysis::from_response(pillar, &text),
        Err(e) => {
            warn!(stage, pillar = %pillar, error = %e, "pillar analysis failed, using fallback");
            issues.push(format!(
                "{stage}: {} analysis failed: {e}",
                pillar.display_name()
            ));
            PillarAnalysis::failed(pillar)
        }
    }
}

/// Bulleted list for a prompt, with a placeholder when empty.
pub(crate) fn bullet_list(items: &[String]) -> String {
    if items.is_empty() {
        "- None identified".to_string()
    } else {
        items
            .iter()
            .map(|i| format!("- {i}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultzero_shared::MaturityLevel;

    #[test]
    fn parses_sectioned_response() {
        let text = "SCORE: 3.5\nFINDINGS:\nStrong SSO.\nGAPS:\n- No PAM\nSTRENGTHS:\n- Okta SSO\nRECOMMENDATIONS:\n1. Deploy PAM\n";
        let analysis = PillarAnalysis::from_response(Pillar::Identity, text);
        assert_eq!(analysis.score(), 3.5);
        assert_eq!(analysis.rating.level(), MaturityLevel::Managed);
        assert_eq!(analysis.findings, "Strong SSO.");
        assert_eq!(analysis.gaps, vec!["No PAM"]);
        assert_eq!(analysis.strengths, vec!["Okta SSO"]);
        assert_eq!(analysis.recommendations, vec!["Deploy PAM"]);
        assert!(!analysis.degraded);
    }

    #[test]
    fn fallback_flags_manual_review() {
        let analysis = PillarAnalysis::failed(Pillar::Visibility);
        assert_eq!(analysis.score(), 0.0);
        assert!(analysis.degraded);
        assert_eq!(
            analysis.tagged_gaps(),
            vec!["[Visibility & Analytics] Could not analyze Visibility & Analytics; manual review needed"]
        );
        assert_eq!(
            analysis.recommendations,
            vec!["Manual review needed for Visibility & Analytics"]
        );
    }

    #[test]
    fn serializes_score_at_top_level() {
        let analysis = PillarAnalysis::from_response(Pillar::Data, "SCORE: 1.2");
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["score"], 1.2);
        assert_eq!(json["maturity_level"], "Developing");
        assert_eq!(json["pillar"], "data");
    }

    #[test]
    fn bullet_list_placeholder() {
        assert_eq!(bullet_list(&[]), "- None identified");
        assert_eq!(bullet_list(&["a".into(), "b".into()]), "- a\n- b");
    }
}
