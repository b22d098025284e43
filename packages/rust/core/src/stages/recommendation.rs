//! Prioritized recommendations from the assessment and benchmark.

use std::cmp::Ordering;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use vaultzero_llm::{Structured, create_prompt};
use vaultzero_shared::Result;

use crate::stage::{Stage, StageContext};
use crate::stages::pillar::bullet_list;
use crate::state::{StageData, StateField, WorkflowState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl From<String> for Priority {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "critical" => Self::Critical,
            "high" => Self::High,
            "low" => Self::Low,
            _ => Self::Medium,
        }
    }
}

impl From<Priority> for String {
    fn from(value: Priority) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(alias = "title")]
    pub recommendation: String,
    #[serde(default)]
    pub pillar: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, alias = "effort_estimate")]
    pub effort: String,
    #[serde(default)]
    pub impact: String,
    /// 1-10.
    #[serde(default)]
    pub impact_score: f64,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub prioritized_recommendations: Vec<Recommendation>,
}

impl RecommendationSet {
    /// Priority first, then highest impact.
    pub fn sort(&mut self) {
        self.prioritized_recommendations.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| {
                b.impact_score
                    .partial_cmp(&a.impact_score)
                    .unwrap_or(Ordering::Equal)
            })
        });
    }

    pub fn top(&self, n: usize) -> &[Recommendation] {
        let end = n.min(self.prioritized_recommendations.len());
        &self.prioritized_recommendations[..end]
    }
}

const SYSTEM: &str = "You are a Zero Trust implementation strategist. Prioritize remediation \
based on the gaps identified, focusing on areas below the peer average. Be specific and \
actionable. Respond with ONLY valid JSON.";

const RESPONSE_SHAPE: &str = r#"Provide 8-12 prioritized recommendations in JSON format:
{
  "prioritized_recommendations": [
    {
      "recommendation": "Specific action",
      "pillar": "Identity",
      "priority": "Critical/High/Medium/Low",
      "effort": "Low/Medium/High",
      "impact": "Low/Medium/High",
      "impact_score": <1-10>,
      "rationale": "Why this matters for this system"
    }
  ]
}"#;

/// Reads the description, `pillar_analyses` and `benchmark`; writes
/// `recommendations`.
pub struct RecommendationStage;

#[async_trait]
impl Stage for RecommendationStage {
    fn name(&self) -> &'static str {
        "RecommendationAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[
            StateField::SystemDescription,
            StateField::PillarAnalyses,
            StateField::Benchmark,
        ]
    }

    #[instrument(skip_all, fields(stage = "RecommendationAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let description = state.input.system_description.clone().unwrap_or_default();
        let analyses = state.data.pillar_analyses.clone().unwrap_or_default();

        let mut current = String::new();
        for a in analyses.values() {
            current.push_str(&format!(
                "{} ({:.1}/5, {})\nGaps:\n{}\n\n",
                a.pillar.display_name(),
                a.score(),
                a.rating.level(),
                bullet_list(&a.gaps)
            ));
        }

        let mut position = String::new();
        if let Some(bench) = &state.data.benchmark {
            if let Some(p) = bench.overall_percentile() {
                position.push_str(&format!("Overall percentile: {p:.0}\n"));
            }
            if let Some(analysis) = bench.analysis.parsed() {
                position.push_str(&format!(
                    "Gaps vs peers:\n{}\n",
                    bullet_list(&analysis.gaps_vs_peers)
                ));
                for practice in &analysis.peer_best_practices {
                    position.push_str(&format!(
                        "Peer practice: {} ({})\n",
                        practice.practice, practice.system
                    ));
                }
            }
        }
        if let Some(synthesis) = state.data.synthesis.as_ref().and_then(Structured::parsed) {
            position.push_str(&format!(
                "Quick wins identified:\n{}\n",
                bullet_list(&synthesis.quick_wins)
            ));
        }

        let user = format!(
            "SYSTEM CONTEXT:\n{description}\n\nCURRENT STATE:\n{current}BENCHMARK POSITION:\n{position}\n{RESPONSE_SHAPE}"
        );
        let response = ctx
            .call(self.name(), create_prompt(SYSTEM, &user, &[]))
            .await?;

        let mut recommendations = Structured::<RecommendationSet>::from_response(&response);
        if let Structured::Parsed(set) = &mut recommendations {
            set.sort();
            info!(count = set.prioritized_recommendations.len(), "recommendations ready");
        }

        Ok(StageData {
            recommendations: Some(recommendations),
            ..StageData::default()
        })
    }
}
