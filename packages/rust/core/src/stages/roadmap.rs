//! Four-phase, two-year implementation roadmap.
//!
//! The narrative comes from the model; phases, investment and maturity
//! targets are computed locally from the recommendations and the current
//! overall score.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use vaultzero_llm::{Structured, create_prompt};
use vaultzero_shared::{MAX_SCORE, MaturityLevel, PillarScore, Result};

use crate::stage::{Stage, StageContext};
use crate::stages::recommendation::Recommendation;
use crate::state::{StageData, StateField, WorkflowState};

/// Recommendations carried into the roadmap.
const ROADMAP_RECOMMENDATIONS: usize = 10;

/// A dollar range, printed as `$50K - $150K`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsdRange {
    pub min: u64,
    pub max: u64,
}

impl UsdRange {
    pub const fn new(min: u64, max: u64) -> Self {
        Self { min, max }
    }
}

impl std::ops::Add for UsdRange {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.min + rhs.min, self.max + rhs.max)
    }
}

impl fmt::Display for UsdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", usd(self.min), usd(self.max))
    }
}

/// `$50K`, `$700K`, `$1.45M`.
pub fn usd(amount: u64) -> String {
    if amount >= 1_000_000 {
        let millions = format!("{:.2}", amount as f64 / 1_000_000.0);
        let trimmed = millions.trim_end_matches('0').trim_end_matches('.');
        format!("${trimmed}M")
    } else if amount >= 1_000 {
        format!("${}K", amount / 1_000)
    } else {
        format!("${amount}")
    }
}

struct PhasePlan {
    name: &'static str,
    start_month: u32,
    end_month: u32,
    focus: &'static str,
    /// Initiatives taken from the ranked list; `None` takes the rest.
    take: Option<usize>,
    investment: UsdRange,
}

const PHASES: [PhasePlan; 4] = [
    PhasePlan {
        name: "Immediate Quick Wins",
        start_month: 0,
        end_month: 3,
        focus: "Low-hanging fruit, quick security improvements, compliance quick wins",
        take: Some(3),
        investment: UsdRange::new(50_000, 150_000),
    },
    PhasePlan {
        name: "Foundation Building",
        start_month: 3,
        end_month: 6,
        focus: "Core infrastructure, critical capabilities, foundational security controls",
        take: Some(3),
        investment: UsdRange::new(150_000, 300_000),
    },
    PhasePlan {
        name: "Strategic Capabilities",
        start_month: 6,
        end_month: 12,
        focus: "Major transformations, advanced features, strategic security architecture",
        take: Some(2),
        investment: UsdRange::new(300_000, 600_000),
    },
    PhasePlan {
        name: "Optimization & Maturity",
        start_month: 12,
        end_month: 24,
        focus: "Fine-tuning, automation, advanced analytics, continuous improvement",
        take: None,
        investment: UsdRange::new(200_000, 400_000),
    },
];

/// Share of the gap to the top of the scale closed by each milestone.
const TARGETS: [(u32, f64); 3] = [(6, 0.35), (12, 0.60), (24, 0.90)];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    pub number: u32,
    pub name: String,
    pub timeframe: String,
    pub start_month: u32,
    pub end_month: u32,
    pub focus: String,
    pub initiatives: Vec<Recommendation>,
    pub investment: UsdRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturityTarget {
    pub month: u32,
    #[serde(flatten)]
    pub target: PillarScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Roadmap {
    pub narrative: String,
    pub phases: Vec<Phase>,
    pub total_investment: UsdRange,
    pub targets: Vec<MaturityTarget>,
}

impl Roadmap {
    /// Allocate `recommendations` (already ranked) across the phases.
    pub fn plan(narrative: String, current: f64, recommendations: &[Recommendation]) -> Self {
        let mut remaining = recommendations
            .iter()
            .take(ROADMAP_RECOMMENDATIONS)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter();

        let phases: Vec<Phase> = PHASES
            .iter()
            .zip(1..)
            .map(|(plan, number)| {
                let initiatives: Vec<Recommendation> = match plan.take {
                    Some(n) => remaining.by_ref().take(n).collect(),
                    None => remaining.by_ref().collect(),
                };
                Phase {
                    number,
                    name: plan.name.to_string(),
                    timeframe: format!("Months {}-{}", plan.start_month, plan.end_month),
                    start_month: plan.start_month,
                    end_month: plan.end_month,
                    focus: plan.focus.to_string(),
                    initiatives,
                    investment: plan.investment,
                }
            })
            .collect();

        let total_investment = phases
            .iter()
            .map(|p| p.investment)
            .fold(UsdRange::new(0, 0), |acc, r| acc + r);

        Self {
            narrative,
            phases,
            total_investment,
            targets: targets(current),
        }
    }

    /// The final milestone's label.
    pub fn final_target(&self) -> Option<MaturityLevel> {
        self.targets.last().map(|t| t.target.level())
    }
}

/// Maturity expected at each milestone from `current`.
pub fn targets(current: f64) -> Vec<MaturityTarget> {
    let current = PillarScore::new(current).score();
    TARGETS
        .iter()
        .map(|(month, share)| {
            let score = current + (MAX_SCORE - current) * share;
            MaturityTarget {
                month: *month,
                target: PillarScore::new((score * 100.0).round() / 100.0),
            }
        })
        .collect()
}

/// Reads `pillar_analyses`, `overall_score` and `recommendations`; writes
/// `roadmap`.
pub struct RoadmapStage;

#[async_trait]
impl Stage for RoadmapStage {
    fn name(&self) -> &'static str {
        "RoadmapAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[
            StateField::PillarAnalyses,
            StateField::OverallScore,
            StateField::Recommendations,
        ]
    }

    #[instrument(skip_all, fields(stage = "RoadmapAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let overall = state.data.overall_score.map_or(0.0, |s| s.score());
        let ranked: Vec<Recommendation> = state
            .data
            .recommendations
            .as_ref()
            .and_then(Structured::parsed)
            .map(|set| set.top(ROADMAP_RECOMMENDATIONS).to_vec())
            .unwrap_or_default();

        let organization = state
            .data
            .synthesis
            .as_ref()
            .and_then(Structured::parsed)
            .map(|s| s.system_name.clone())
            .filter(|n| !n.is_empty())
            .or_else(|| state.input.system_description.clone())
            .unwrap_or_else(|| "Your Organization".to_string());

        let mut context = format!("ORGANIZATION: {organization}\n\nCURRENT MATURITY SCORES:\n");
        if let Some(analyses) = &state.data.pillar_analyses {
            for a in analyses.values() {
                context.push_str(&format!("- {}: {:.1}/5.0\n", a.pillar.display_name(), a.score()));
            }
        }
        context.push_str(&format!(
            "\nOVERALL MATURITY: {overall:.1}/5.0\nTARGET MATURITY: 5.0/5.0 (within 24 months)\n\nTOP {ROADMAP_RECOMMENDATIONS} PRIORITIZED RECOMMENDATIONS:\n"
        ));
        for (i, rec) in ranked.iter().enumerate() {
            context.push_str(&format!(
                "{}. [{}] {}\n   Impact: {}/10 | Effort: {}\n   Pillar: {}\n\n",
                i + 1,
                rec.priority,
                rec.recommendation,
                rec.impact_score,
                if rec.effort.is_empty() { "N/A" } else { rec.effort.as_str() },
                if rec.pillar.is_empty() { "N/A" } else { rec.pillar.as_str() },
            ));
        }

        let user = format!(
            "{context}Create a detailed 4-PHASE roadmap:
- Phase 1 (Months 0-3): Immediate Quick Wins
- Phase 2 (Months 3-6): Foundation Building
- Phase 3 (Months 6-12): Strategic Capabilities
- Phase 4 (Months 12-24): Optimization & Maturity

For each phase give 3-5 initiatives drawn from the recommendations, quarterly milestones, \
expected maturity improvement, key dependencies and success metrics."
        );
        let narrative = ctx
            .call(
                self.name(),
                create_prompt(
                    "You are a Zero Trust security architect creating a 2-year implementation roadmap.",
                    &user,
                    &[],
                ),
            )
            .await?;

        let roadmap = Roadmap::plan(narrative.trim().to_string(), overall, &ranked);
        info!(
            initiatives = ranked.len(),
            investment = %roadmap.total_investment,
            "roadmap complete"
        );

        Ok(StageData {
            roadmap: Some(roadmap),
            ..StageData::default()
        })
    }
}
