//! Peer benchmark: retrieve similar systems and compare against them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument, warn};

use vaultzero_llm::{Structured, create_prompt};
use vaultzero_shared::{Pillar, Result};

use crate::peers::{PeerComparison, PeerMatch, compare_to_peers};
use crate::stage::{Stage, StageContext};
use crate::state::{StageData, StateField, WorkflowState};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PillarRanking {
    #[serde(default)]
    pub percentile: f64,
    #[serde(default)]
    pub vs_peers: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BestPractice {
    pub practice: String,
    pub system: String,
    pub implementation: String,
}

/// The model's comparison, returned as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkAnalysis {
    #[serde(default)]
    pub overall_percentile: Option<f64>,
    #[serde(default)]
    pub pillar_rankings: BTreeMap<String, PillarRanking>,
    #[serde(default)]
    pub strengths_vs_peers: Vec<String>,
    #[serde(default)]
    pub gaps_vs_peers: Vec<String>,
    #[serde(default)]
    pub peer_best_practices: Vec<BestPractice>,
    #[serde(default)]
    pub competitive_position: String,
}

/// Everything the benchmark stage produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResults {
    pub peers: Vec<PeerMatch>,
    /// Local ranking against the whole corpus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison: Option<PeerComparison>,
    pub analysis: Structured<BenchmarkAnalysis>,
}

impl BenchmarkResults {
    /// Model percentile when it gave one, otherwise the local one.
    pub fn overall_percentile(&self) -> Option<f64> {
        self.analysis
            .parsed()
            .and_then(|a| a.overall_percentile)
            .or_else(|| self.comparison.as_ref().map(|c| f64::from(c.overall_percentile)))
    }
}

const SYSTEM: &str = "You are a Zero Trust benchmarking expert. Compare a system against \
similar peer systems. Be specific and actionable; focus on meaningful differences. \
Respond with ONLY valid JSON.";

const RESPONSE_SHAPE: &str = r#"Provide a comprehensive benchmark analysis in JSON format:
{
  "overall_percentile": <0-100, where the system ranks among peers>,
  "pillar_rankings": {
    "<pillar>": {"percentile": <0-100>, "vs_peers": "above/at/below average"}
  },
  "strengths_vs_peers": ["Area where the system exceeds the peer average"],
  "gaps_vs_peers": ["Area where the system lags behind peers"],
  "peer_best_practices": [
    {"practice": "Best practice from peer systems", "system": "Which peer does this well", "implementation": "How they implemented it"}
  ],
  "competitive_position": "2-3 sentence summary of where the system stands vs peers"
}"#;

/// Reads the description and `pillar_analyses`; writes `benchmark`.
pub struct BenchmarkStage;

#[async_trait]
impl Stage for BenchmarkStage {
    fn name(&self) -> &'static str {
        "BenchmarkAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[StateField::SystemDescription, StateField::PillarAnalyses]
    }

    #[instrument(skip_all, fields(stage = "BenchmarkAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let description = state.input.system_description.clone().unwrap_or_default();
        let analyses = state.data.pillar_analyses.clone().unwrap_or_default();
        let mut issues = Vec::new();

        let (peers, comparison) = match &ctx.peers {
            Some(index) => {
                ctx.progress.subtask(self.name(), "peer search");
                let peers = match index.search(&description, ctx.top_k).await {
                    Ok(peers) => peers,
                    Err(e) => {
                        warn!(error = %e, "peer search failed, continuing without peers");
                        issues.push(format!("{}: peer search failed: {e}", self.name()));
                        Vec::new()
                    }
                };
                let scores: BTreeMap<Pillar, f64> =
                    analyses.iter().map(|(p, a)| (*p, a.score())).collect();
                let comparison = match index.records().await {
                    Ok(records) => compare_to_peers(&scores, &records),
                    Err(e) => {
                        warn!(error = %e, "peer records unavailable");
                        None
                    }
                };
                (peers, comparison)
            }
            None => {
                warn!("no peer index configured, benchmarking without peers");
                (Vec::new(), None)
            }
        };
        info!(peers = peers.len(), "retrieved similar systems");

        let system_name = state
            .data
            .synthesis
            .as_ref()
            .and_then(Structured::parsed)
            .map(|s| s.system_name.clone())
            .unwrap_or_default();
        let assessment = json!({
            "system_name": system_name,
            "pillars": analyses
                .iter()
                .map(|(pillar, a)| {
                    (pillar.as_str().to_string(), json!({
                        "score": a.score(),
                        "maturity_level": a.rating.level(),
                        "gaps": a.gaps,
                        "strengths": a.strengths,
                    }))
                })
                .collect::<serde_json::Map<_, _>>(),
        });

        let mut user = format!(
            "SYSTEM:\nDescription: {description}\n\nASSESSMENT RESULTS:\n{}\n\nSIMILAR BENCHMARK SYSTEMS:\n{}\n",
            pretty(&assessment),
            pretty(&peers),
        );
        if let Some(cmp) = &comparison {
            user.push_str(&format!(
                "\nCORPUS STATISTICS ({} peers):\n{}\n",
                cmp.peer_count,
                pretty(&cmp.pillars)
            ));
        }
        user.push('\n');
        user.push_str(RESPONSE_SHAPE);

        ctx.progress.subtask(self.name(), "comparison");
        let response = ctx
            .call(self.name(), create_prompt(SYSTEM, &user, &[]))
            .await?;
        let analysis = Structured::<BenchmarkAnalysis>::from_response(&response);

        let results = BenchmarkResults {
            peers,
            comparison,
            analysis,
        };
        info!(percentile = ?results.overall_percentile(), "benchmark complete");

        Ok(StageData {
            benchmark: Some(results),
            issues,
            ..StageData::default()
        })
    }
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peers::PeerIndex;
    use crate::stages::PillarAnalysis;
    use crate::state::WorkflowInput;
    use crate::test_support::{ScriptedGenerator, test_context};
    use std::sync::Arc;
    use vaultzero_shared::{PeerAssessment, PeerPillar, VaultZeroError};

    struct FixedPeers;

    #[async_trait]
    impl PeerIndex for FixedPeers {
        async fn search(&self, _description: &str, k: u32) -> Result<Vec<PeerMatch>> {
            Ok((0..k)
                .map(|i| PeerMatch {
                    system_id: format!("SYS-00{i}"),
                    system_type: "Claims Processing".into(),
                    overall_maturity: "Defined".into(),
                    similarity_score: -1.5 + f64::from(i),
                    content_preview: "System ID: ...".into(),
                })
                .collect())
        }

        async fn records(&self) -> Result<Vec<PeerAssessment>> {
            let mut pillars = BTreeMap::new();
            pillars.insert(
                "identity".to_string(),
                PeerPillar {
                    maturity_level: "Defined".into(),
                    score: 2.0,
                    detailed_assessment: vec![],
                },
            );
            Ok(vec![PeerAssessment {
                system_id: "SYS-001".into(),
                system_type: "Claims".into(),
                overall_maturity_level: "Defined".into(),
                system_description: String::new(),
                pillars,
            }])
        }
    }

    struct BrokenPeers;

    #[async_trait]
    impl PeerIndex for BrokenPeers {
        async fn search(&self, _description: &str, _k: u32) -> Result<Vec<PeerMatch>> {
            Err(VaultZeroError::Storage("database is locked".into()))
        }
    }

    fn assessed_state() -> WorkflowState {
        let mut answers = BTreeMap::new();
        answers.insert(Pillar::Identity, "SSO".to_string());
        let mut analyses = BTreeMap::new();
        analyses.insert(
            Pillar::Identity,
            PillarAnalysis::from_response(Pillar::Identity, "SCORE: 3"),
        );
        WorkflowState::new(WorkflowInput::questionnaire("Claims portal", answers)).merge(
            StageData {
                pillar_analyses: Some(analyses),
                ..StageData::default()
            },
            "AssessmentAgent",
        )
    }

    const ANALYSIS: &str = r#"```json
{"overall_percentile": 65, "pillar_rankings": {"identity": {"percentile": 70, "vs_peers": "above average"}},
 "strengths_vs_peers": ["Identity"], "gaps_vs_peers": [], "peer_best_practices": [{"practice": "FIDO2", "system": "SYS-001", "implementation": "Keys for admins"}],
 "competitive_position": "Ahead on identity."}
```"#;

    #[tokio::test]
    async fn retrieves_peers_and_compares() {
        let generator = Arc::new(ScriptedGenerator::new().with_default(ANALYSIS));
        let ctx = test_context(generator.clone())
            .with_peers(Arc::new(FixedPeers))
            .with_top_k(2);

        let state = BenchmarkStage
            .process(assessed_state(), &ctx)
            .await
            .unwrap();
        let bench = state.data.benchmark.as_ref().unwrap();
        assert_eq!(bench.peers.len(), 2);
        assert_eq!(bench.peers[0].similarity_score, -1.5);
        let analysis = bench.analysis.parsed().unwrap();
        assert_eq!(analysis.overall_percentile, Some(65.0));
        assert_eq!(analysis.peer_best_practices[0].system, "SYS-001");
        assert_eq!(bench.overall_percentile(), Some(65.0));
        assert_eq!(bench.comparison.as_ref().unwrap().pillars[&Pillar::Identity].percentile, 100);

        let prompt = &generator.prompts()[0];
        assert!(prompt.contains("SYS-001"));
        assert!(prompt.contains("\"identity\""));
    }

    #[tokio::test]
    async fn missing_percentile_keeps_analysis() {
        let reply = r#"{"strengths_vs_peers": ["mfa"], "competitive_position": "average"}"#;
        let generator = Arc::new(ScriptedGenerator::new().with_default(reply));
        let ctx = test_context(generator).with_peers(Arc::new(FixedPeers));

        let state = BenchmarkStage
            .process(assessed_state(), &ctx)
            .await
            .unwrap();
        let bench = state.data.benchmark.as_ref().unwrap();
        let analysis = bench.analysis.parsed().unwrap();
        assert_eq!(analysis.strengths_vs_peers, vec!["mfa".to_string()]);
        assert_eq!(analysis.overall_percentile, None);
        let local = bench.comparison.as_ref().unwrap().overall_percentile;
        assert_eq!(bench.overall_percentile(), Some(f64::from(local)));
        assert_eq!(state.parse_failure_count(), 0);
    }

    #[tokio::test]
    async fn runs_without_index() {
        let generator = Arc::new(ScriptedGenerator::new().with_default("not json"));
        let ctx = test_context(generator);

        let state = BenchmarkStage
            .process(assessed_state(), &ctx)
            .await
            .unwrap();
        let bench = state.data.benchmark.as_ref().unwrap();
        assert!(bench.peers.is_empty());
        assert!(bench.comparison.is_none());
        assert!(bench.analysis.failure().is_some());
        assert_eq!(bench.overall_percentile(), None);
        assert_eq!(state.parse_failure_count(), 1);
    }

    #[tokio::test]
    async fn failed_search_degrades() {
        let generator = Arc::new(ScriptedGenerator::new().with_default(ANALYSIS));
        let ctx = test_context(generator).with_peers(Arc::new(BrokenPeers));

        let state = BenchmarkStage
            .process(assessed_state(), &ctx)
            .await
            .unwrap();
        assert!(state.data.benchmark.as_ref().unwrap().peers.is_empty());
        assert!(state.errors.iter().any(|e| e.contains("peer search failed")));
    }
}
