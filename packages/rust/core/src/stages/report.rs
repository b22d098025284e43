//! Executive summary and the Markdown report file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use vaultzero_llm::{Structured, create_prompt};
use vaultzero_shared::{PillarScore, Result, VaultZeroError};

use crate::render::render_report;
use crate::stage::{Stage, StageContext};
use crate::stages::pillar::bullet_list;
use crate::state::{StageData, StateField, WorkflowState};

const SUMMARY_SYSTEM: &str = "You are writing an executive summary for a Zero Trust security assessment.

Write a concise 3-4 paragraph summary that includes:
1. Overall assessment (maturity level and score)
2. Key strengths (2-3 highlights)
3. Critical gaps (2-3 priorities)
4. Strategic recommendations (high-level)

Target audience: C-level executives and security leadership.
Tone: professional, clear, action-oriented.
Length: 300-400 words.";

/// Items of each kind given to the summary prompt.
const SUMMARY_ITEMS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOutput {
    pub path: PathBuf,
    pub filename: String,
    pub executive_summary: String,
}

/// Reads `pillar_analyses` and `overall_score`; writes `report`.
pub struct ReportStage;

#[async_trait]
impl Stage for ReportStage {
    fn name(&self) -> &'static str {
        "ReportWriterAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[StateField::PillarAnalyses, StateField::OverallScore]
    }

    #[instrument(skip_all, fields(stage = "ReportWriterAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let data = &state.data;
        let analyses = data.pillar_analyses.clone().unwrap_or_default();
        let overall = data.overall_score.unwrap_or_else(|| PillarScore::new(0.0));

        let strengths: Vec<String> = analyses
            .values()
            .flat_map(|a| a.tagged_strengths())
            .take(SUMMARY_ITEMS)
            .collect();
        let gaps: Vec<String> = analyses
            .values()
            .flat_map(|a| a.tagged_gaps())
            .take(SUMMARY_ITEMS)
            .collect();

        let mut user = format!(
            "OVERALL MATURITY: {} ({:.2}/5.0)\n",
            overall.level(),
            overall.score()
        );
        if let Some(compliance) = &data.compliance {
            user.push_str(&format!("COMPLIANCE: {:.1}%\n", compliance.percentage));
        }
        if let Some(p) = data.benchmark.as_ref().and_then(|b| b.overall_percentile()) {
            user.push_str(&format!("PEER PERCENTILE: {p:.0}\n"));
        }
        user.push_str(&format!(
            "\nTOP STRENGTHS:\n{}\n\nCRITICAL GAPS:\n{}\n",
            bullet_list(&strengths),
            bullet_list(&gaps)
        ));
        if let Some(set) = data.recommendations.as_ref().and_then(Structured::parsed) {
            let top: Vec<String> = set
                .top(SUMMARY_ITEMS)
                .iter()
                .map(|r| format!("[{}] {}", r.priority, r.recommendation))
                .collect();
            user.push_str(&format!("\nTOP RECOMMENDATIONS:\n{}\n", bullet_list(&top)));
        }
        user.push_str("\nWrite the executive summary.");

        ctx.progress.subtask(self.name(), "executive summary");
        let summary = ctx
            .call_model(
                self.name(),
                ctx.settings.summary_model.clone(),
                create_prompt(SUMMARY_SYSTEM, &user, &[]),
            )
            .await?;
        let summary = summary.trim().to_string();

        let now = Utc::now();
        let filename = format!("ZeroTrust_Assessment_{}.md", now.format("%Y%m%d_%H%M%S"));
        let markdown = render_report(state, &summary, now);
        let path = write_report(&ctx.output_dir, &filename, &markdown)?;
        info!(path = %path.display(), "report written");

        Ok(StageData {
            report: Some(ReportOutput {
                path,
                filename,
                executive_summary: summary,
            }),
            ..StageData::default()
        })
    }
}

/// Write `content` under `dir` via a temp file and rename.
pub fn write_report(dir: &Path, filename: &str, content: &str) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|e| VaultZeroError::io(dir, e))?;
    let target = dir.join(filename);
    let temp = dir.join(format!(".{filename}.tmp"));
    std::fs::write(&temp, content).map_err(|e| VaultZeroError::io(&temp, e))?;
    std::fs::rename(&temp, &target).map_err(|e| VaultZeroError::io(&target, e))?;
    debug!(file = %filename, size = content.len(), "wrote report file");
    Ok(target)
}
