//! Markdown rendering of a finished assessment.

use chrono::{DateTime, Utc};

use vaultzero_llm::Structured;
use vaultzero_shared::MAX_SCORE;

use crate::stages::DocumentStatus;
use crate::state::WorkflowState;

const MAX_STRENGTHS: usize = 10;
const MAX_GAPS: usize = 15;

/// Render the assessment report.
pub fn render_report(
    state: &WorkflowState,
    executive_summary: &str,
    generated_at: DateTime<Utc>,
) -> String {
    let data = &state.data;
    let mut md = String::new();

    md.push_str("# Zero Trust Architecture Assessment\n\n");
    if let Some(name) = data
        .synthesis
        .as_ref()
        .and_then(Structured::parsed)
        .map(|s| s.system_name.as_str())
        .filter(|n| !n.is_empty())
    {
        md.push_str(&format!("**System:** {name}  \n"));
    }
    md.push_str(&format!(
        "**Assessment Date:** {}  \n",
        generated_at.format("%B %d, %Y")
    ));
    if let Some(overall) = data.overall_score {
        md.push_str(&format!(
            "**Overall Maturity:** {} ({:.2}/{MAX_SCORE:.1})  \n",
            overall.level(),
            overall.score()
        ));
    }
    md.push_str(&format!(
        "**Generated by:** VaultZero v{}\n\n",
        env!("CARGO_PKG_VERSION")
    ));

    md.push_str("## Executive Summary\n\n");
    md.push_str(executive_summary.trim());
    md.push_str("\n\n");

    if let Some(analyses) = &data.pillar_analyses {
        md.push_str("## Zero Trust Maturity Assessment\n\n");
        md.push_str("| Pillar | Score | Maturity Level |\n");
        md.push_str("|---|---|---|\n");
        for a in analyses.values() {
            let marker = if a.degraded { " (manual review)" } else { "" };
            md.push_str(&format!(
                "| {}{marker} | {:.1}/{MAX_SCORE:.0} | {} |\n",
                a.pillar.display_name(),
                a.score(),
                a.rating.level()
            ));
        }
        md.push('\n');

        for a in analyses.values().filter(|a| !a.findings.is_empty()) {
            md.push_str(&format!(
                "**{}:** {}\n\n",
                a.pillar.display_name(),
                a.findings
            ));
        }

        let strengths: Vec<String> = analyses.values().flat_map(|a| a.tagged_strengths()).collect();
        let gaps: Vec<String> = analyses.values().flat_map(|a| a.tagged_gaps()).collect();
        md.push_str("## Key Findings\n\n### Strengths\n\n");
        bullets(&mut md, &strengths, MAX_STRENGTHS, "No significant strengths identified.");
        md.push_str("### Gaps & Weaknesses\n\n");
        bullets(&mut md, &gaps, MAX_GAPS, "No critical gaps identified.");
    }

    if let Some(synthesis) = data.synthesis.as_ref().and_then(Structured::parsed) {
        if !synthesis.quick_wins.is_empty() {
            md.push_str("### Quick Wins\n\n");
            bullets(&mut md, &synthesis.quick_wins, usize::MAX, "");
        }
        if !synthesis.strategic_recommendations.is_empty() {
            md.push_str("### Strategic Recommendations\n\n");
            bullets(&mut md, &synthesis.strategic_recommendations, usize::MAX, "");
        }
    }

    if let Some(compliance) = &data.compliance {
        md.push_str("## Compliance Framework Mapping\n\n");
        md.push_str(&format!(
            "**Overall Compliance:** {:.1}% ({})\n\n",
            compliance.percentage, compliance.status
        ));
        for m in &compliance.mappings {
            md.push_str(&format!(
                "### {}\n\nCompliance: {:.1}% ({}/{} controls)\n\n",
                m.framework,
                m.compliance_score(),
                m.controls_met_count(),
                m.total_controls
            ));
            if !m.controls_met.is_empty() {
                md.push_str("Controls met:\n\n");
                bullets(&mut md, &m.controls_met, usize::MAX, "");
            }
            if !m.gaps.is_empty() {
                md.push_str("Gaps:\n\n");
                bullets(&mut md, &m.gaps, usize::MAX, "");
            }
        }
    }

    if let Some(bench) = &data.benchmark {
        md.push_str("## Peer Benchmark\n\n");
        if let Some(p) = bench.overall_percentile() {
            md.push_str(&format!("**Overall Percentile:** {p:.0}th\n\n"));
        }
        if let Some(cmp) = &bench.comparison {
            md.push_str(&format!("{}\n\n", cmp.summary));
        }
        if !bench.peers.is_empty() {
            md.push_str("| Peer | Type | Maturity |\n|---|---|---|\n");
            for peer in &bench.peers {
                md.push_str(&format!(
                    "| {} | {} | {} |\n",
                    peer.system_id, peer.system_type, peer.overall_maturity
                ));
            }
            md.push('\n');
        }
        match &bench.analysis {
            Structured::Parsed(analysis) => {
                if !analysis.competitive_position.is_empty() {
                    md.push_str(&format!("{}\n\n", analysis.competitive_position));
                }
                if !analysis.peer_best_practices.is_empty() {
                    md.push_str("### Peer Best Practices\n\n");
                    for bp in &analysis.peer_best_practices {
                        md.push_str(&format!(
                            "- **{}** ({}): {}\n",
                            bp.practice, bp.system, bp.implementation
                        ));
                    }
                    md.push('\n');
                }
            }
            Structured::Failed(_) => {
                md.push_str("_Benchmark analysis could not be parsed; see processing notes._\n\n");
            }
        }
    }

    if let Some(set) = data.recommendations.as_ref().and_then(Structured::parsed) {
        md.push_str("## Prioritized Recommendations\n\n");
        md.push_str("| # | Recommendation | Pillar | Priority | Effort | Impact |\n");
        md.push_str("|---|---|---|---|---|---|\n");
        for (i, r) in set.prioritized_recommendations.iter().enumerate() {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} | {}/10 |\n",
                i + 1,
                r.recommendation,
                r.pillar,
                r.priority,
                r.effort,
                r.impact_score
            ));
        }
        md.push('\n');
    } else if let Some(analyses) = &data.pillar_analyses {
        let recs: Vec<String> = analyses
            .values()
            .flat_map(|a| a.tagged_recommendations())
            .collect();
        if !recs.is_empty() {
            md.push_str("## Recommendations\n\n");
            bullets(&mut md, &recs, usize::MAX, "");
        }
    }

    if let Some(roadmap) = &data.roadmap {
        md.push_str("## Implementation Roadmap\n\n");
        for phase in &roadmap.phases {
            md.push_str(&format!(
                "### Phase {}: {} ({})\n\n{}\n\nInvestment: {}\n\n",
                phase.number, phase.name, phase.timeframe, phase.focus, phase.investment
            ));
            let names: Vec<String> = phase
                .initiatives
                .iter()
                .map(|r| r.recommendation.clone())
                .collect();
            bullets(&mut md, &names, usize::MAX, "");
        }
        md.push_str(&format!(
            "**Two-year investment:** {}\n\n",
            roadmap.total_investment
        ));
        md.push_str("**Maturity targets:**\n\n");
        for t in &roadmap.targets {
            md.push_str(&format!(
                "- Month {}: {:.2} ({})\n",
                t.month,
                t.target.score(),
                t.target.level()
            ));
        }
        md.push('\n');
        if !roadmap.narrative.is_empty() {
            md.push_str("### Roadmap Detail\n\n");
            md.push_str(roadmap.narrative.trim());
            md.push_str("\n\n");
        }
    }

    if let Some(docs) = &data.document_summaries {
        md.push_str("## Documents Reviewed\n\n");
        md.push_str("| File | Status | Summary |\n|---|---|---|\n");
        for d in docs {
            let (status, detail) = match d.status {
                DocumentStatus::Success => ("parsed", d.summary.clone().unwrap_or_default()),
                DocumentStatus::Failed => ("failed", d.error.clone().unwrap_or_default()),
            };
            md.push_str(&format!(
                "| {} | {status} | {} |\n",
                d.filename,
                detail.replace('\n', " ").replace('|', "\\|")
            ));
        }
        md.push('\n');
    }

    if !state.errors.is_empty() {
        md.push_str("## Processing Notes\n\n");
        bullets(&mut md, &state.errors, usize::MAX, "");
    }

    md
}

fn bullets(md: &mut String, items: &[String], limit: usize, empty: &str) {
    if items.is_empty() {
        if !empty.is_empty() {
            md.push_str(empty);
            md.push_str("\n\n");
        }
        return;
    }
    for item in items.iter().take(limit) {
        md.push_str(&format!("- {item}\n"));
    }
    md.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ComplianceResults, PillarAnalysis};
    use crate::state::{StageData, WorkflowInput};
    use std::collections::BTreeMap;
    use vaultzero_shared::{ComplianceMapping, Pillar, PillarScore};

    fn finished_state() -> WorkflowState {
        let mut analyses = BTreeMap::new();
        analyses.insert(
            Pillar::Identity,
            PillarAnalysis::from_response(
                Pillar::Identity,
                "SCORE: 4\nFINDINGS:\nStrong SSO.\nSTRENGTHS:\n- Okta SSO\nGAPS:\n- No PAM",
            ),
        );
        analyses.insert(Pillar::Data, PillarAnalysis::failed(Pillar::Data));
        let mut state = WorkflowState::new(WorkflowInput::default()).merge(
            StageData {
                pillar_analyses: Some(analyses),
                overall_score: Some(PillarScore::new(2.0)),
                compliance: Some(ComplianceResults::from_mappings(vec![ComplianceMapping {
                    framework: "NIST SP 800-207".into(),
                    total_controls: 4,
                    controls_met: vec!["[NIST SP 800-207] Policy engine".into()],
                    gaps: vec![],
                }])),
                ..StageData::default()
            },
            "ComplianceAgent",
        );
        state.errors.push("ZeroTrustAnalyzerAgent: Data analysis failed".into());
        state
    }

    #[test]
    fn report_has_core_sections() {
        let md = render_report(&finished_state(), "Summary text.", Utc::now());
        assert!(md.starts_with("# Zero Trust Architecture Assessment"));
        assert!(md.contains("**Overall Maturity:** Defined (2.00/5.0)"));
        assert!(md.contains("## Executive Summary\n\nSummary text."));
        assert!(md.contains("| Identity | 4.0/5 | Optimized |"));
        assert!(md.contains("| Data (manual review) | 0.0/5 | Initial |"));
        assert!(md.contains("- [Identity] Okta SSO"));
        assert!(md.contains("**Overall Compliance:** 25.0% (Critical Gaps)"));
        assert!(md.contains("## Processing Notes"));
        assert!(!md.contains("## Peer Benchmark"));
    }
}
