//! Peer-benchmark lookup over the assessment corpus.
//!
//! Records are rendered into indexable text, stored in libSQL and ranked
//! with FTS5 `bm25`. The raw rank is passed through as the similarity score,
//! so lower means closer.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use vaultzero_shared::{
    BenchmarkConfig, PeerAssessment, Pillar, Result, VaultZeroError, expand_home, mean_score,
};
use vaultzero_storage::{PeerDocument, PeerHit, Storage};

/// Corpus compiled into the binary, used when no dataset is configured.
const EMBEDDED_CORPUS: &str = include_str!("../data/peer_assessments.json");

/// Characters of peer text handed to the comparison prompt.
const PREVIEW_CHARS: usize = 500;

/// A retrieved peer, shaped for the benchmark prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerMatch {
    pub system_id: String,
    pub system_type: String,
    pub overall_maturity: String,
    /// bm25 rank; lower is closer.
    pub similarity_score: f64,
    pub content_preview: String,
}

impl From<PeerHit> for PeerMatch {
    fn from(hit: PeerHit) -> Self {
        Self {
            content_preview: crate::stages::truncate_chars(&hit.content, PREVIEW_CHARS).to_string(),
            system_id: hit.system_id,
            system_type: hit.system_type,
            overall_maturity: hit.maturity,
            similarity_score: hit.rank,
        }
    }
}

/// Read-only access to previously assessed systems.
#[async_trait]
pub trait PeerIndex: Send + Sync {
    /// The `k` peers closest to `description`, closest first.
    async fn search(&self, description: &str, k: u32) -> Result<Vec<PeerMatch>>;

    /// Every record in the corpus.
    async fn records(&self) -> Result<Vec<PeerAssessment>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl PeerIndex for Storage {
    async fn search(&self, description: &str, k: u32) -> Result<Vec<PeerMatch>> {
        let hits = self.search_peers(description, k).await?;
        Ok(hits.into_iter().map(PeerMatch::from).collect())
    }

    async fn records(&self) -> Result<Vec<PeerAssessment>> {
        let mut records = Vec::new();
        for raw in self.list_peer_records().await? {
            match serde_json::from_str::<PeerAssessment>(&raw) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "skipping unreadable peer record"),
            }
        }
        Ok(records)
    }
}

/// A peer index opened on first use and seeded when empty.
pub struct LazyPeerIndex {
    database: PathBuf,
    dataset: Option<PathBuf>,
    storage: OnceCell<Storage>,
}

impl LazyPeerIndex {
    pub fn new(database: impl Into<PathBuf>, dataset: Option<PathBuf>) -> Self {
        Self {
            database: database.into(),
            dataset,
            storage: OnceCell::new(),
        }
    }

    pub fn from_config(config: &BenchmarkConfig) -> Self {
        Self::new(
            expand_home(&config.database),
            config.dataset.as_deref().map(expand_home),
        )
    }

    async fn storage(&self) -> Result<&Storage> {
        self.storage
            .get_or_try_init(|| async {
                let storage = Storage::open(&self.database).await?;
                if storage.peer_count().await? == 0 {
                    let corpus = load_corpus(self.dataset.as_deref())?;
                    let indexed = index_corpus(&storage, &corpus).await?;
                    info!(peers = indexed, path = %self.database.display(), "seeded peer index");
                }
                Ok::<_, VaultZeroError>(storage)
            })
            .await
    }
}

#[async_trait]
impl PeerIndex for LazyPeerIndex {
    async fn search(&self, description: &str, k: u32) -> Result<Vec<PeerMatch>> {
        self.storage().await?.search(description, k).await
    }

    async fn records(&self) -> Result<Vec<PeerAssessment>> {
        self.storage().await?.records().await
    }
}

// ---------------------------------------------------------------------------
// Corpus
// ---------------------------------------------------------------------------

/// Load the corpus from `dataset`, or the embedded one when `None`.
pub fn load_corpus(dataset: Option<&Path>) -> Result<Vec<PeerAssessment>> {
    match dataset {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| VaultZeroError::io(path, e))?;
            parse_corpus(&text)
        }
        None => parse_corpus(EMBEDDED_CORPUS),
    }
}

/// Accepts a bare list, `{"assessments": [...]}` or `{"data": [...]}`.
pub fn parse_corpus(text: &str) -> Result<Vec<PeerAssessment>> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| VaultZeroError::parse(format!("invalid peer corpus: {e}")))?;

    let items = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut map) => match map
            .remove("assessments")
            .or_else(|| map.remove("data"))
        {
            Some(serde_json::Value::Array(items)) => items,
            Some(_) => {
                return Err(VaultZeroError::parse(
                    "peer corpus collection is not a list",
                ));
            }
            None => vec![serde_json::Value::Object(map)],
        },
        _ => return Err(VaultZeroError::parse("peer corpus must be a list or object")),
    };

    let mut records = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let mut record: PeerAssessment = serde_json::from_value(item)
            .map_err(|e| VaultZeroError::parse(format!("peer record {idx}: {e}")))?;
        if record.system_id.is_empty() {
            record.system_id = format!("SYSTEM-{idx}");
        }
        if record.system_type.is_empty() {
            record.system_type = "Unknown".into();
        }
        if record.overall_maturity_level.is_empty() {
            record.overall_maturity_level = "Unknown".into();
        }
        records.push(record);
    }
    Ok(records)
}

/// The text indexed for one record.
pub fn render_peer_text(record: &PeerAssessment) -> String {
    let mut parts = vec![
        format!("System ID: {}", record.system_id),
        format!("System Type: {}", record.system_type),
        format!("Overall Maturity: {}", record.overall_maturity_level),
        format!("Description: {}", record.system_description),
    ];
    for (name, pillar) in &record.pillars {
        let maturity = if pillar.maturity_level.is_empty() {
            "Unknown"
        } else {
            pillar.maturity_level.as_str()
        };
        parts.push(format!("{name} Pillar: {maturity} (Score: {})", pillar.score));
        for qa in &pillar.detailed_assessment {
            parts.push(format!("Q: {}\nA: {}", qa.question, qa.answer));
        }
    }
    parts.join("\n")
}

/// Replace the stored corpus with `records`.
pub async fn index_corpus(storage: &Storage, records: &[PeerAssessment]) -> Result<usize> {
    storage.clear_peers().await?;
    for record in records {
        let record_json = serde_json::to_string(record)
            .map_err(|e| VaultZeroError::parse(format!("peer record {}: {e}", record.system_id)))?;
        storage
            .upsert_peer(&PeerDocument {
                system_id: record.system_id.clone(),
                system_type: record.system_type.clone(),
                maturity: record.overall_maturity_level.clone(),
                content: render_peer_text(record),
                record_json,
            })
            .await?;
        debug!(system_id = %record.system_id, "indexed peer");
    }
    Ok(records.len())
}

// ---------------------------------------------------------------------------
// Local statistics
// ---------------------------------------------------------------------------

/// Distribution of one pillar's scores across the corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarStats {
    pub count: usize,
    pub average: f64,
    pub median: f64,
    /// Sample standard deviation; 0 with fewer than two scores.
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
}

impl PillarStats {
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        if scores.is_empty() {
            return None;
        }
        let mut sorted = scores.to_vec();
        sorted.sort_by(f64::total_cmp);
        let n = sorted.len();
        let average = mean_score(sorted.iter().copied());
        let median = if n % 2 == 0 {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        } else {
            sorted[n / 2]
        };
        let std_dev = if n < 2 {
            0.0
        } else {
            let var = sorted.iter().map(|s| (s - average).powi(2)).sum::<f64>() / (n - 1) as f64;
            var.sqrt()
        };
        Some(Self {
            count: n,
            average: round2(average),
            median: round2(median),
            std_dev: round2(std_dev),
            min: round2(sorted[0]),
            max: round2(sorted[n - 1]),
        })
    }
}

/// Share of `scores` strictly below `score`, as a whole percentage.
pub fn percentile_of(score: f64, scores: &[f64]) -> u32 {
    if scores.is_empty() {
        return 0;
    }
    let below = scores.iter().filter(|s| **s < score).count();
    (below * 100 / scores.len()) as u32
}

/// Per-pillar scores found in the corpus.
pub fn pillar_scores(records: &[PeerAssessment]) -> BTreeMap<Pillar, Vec<f64>> {
    let mut out: BTreeMap<Pillar, Vec<f64>> = BTreeMap::new();
    for record in records {
        for (name, pillar) in &record.pillars {
            if let Ok(key) = name.parse::<Pillar>() {
                out.entry(key).or_default().push(pillar.score);
            }
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PillarComparison {
    pub score: f64,
    pub percentile: u32,
    pub peer_average: f64,
    /// Score minus peer average.
    pub vs_average: f64,
}

/// Local ranking of an assessment against the whole corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerComparison {
    pub overall_score: f64,
    pub overall_percentile: u32,
    pub peer_count: usize,
    pub pillars: BTreeMap<Pillar, PillarComparison>,
    pub summary: String,
}

/// Rank `scores` against `records`. `None` when the corpus is empty.
pub fn compare_to_peers(
    scores: &BTreeMap<Pillar, f64>,
    records: &[PeerAssessment],
) -> Option<PeerComparison> {
    if records.is_empty() {
        return None;
    }
    let by_pillar = pillar_scores(records);

    let mut pillars = BTreeMap::new();
    for (pillar, score) in scores {
        let Some(peer_scores) = by_pillar.get(pillar) else {
            continue;
        };
        let Some(stats) = PillarStats::from_scores(peer_scores) else {
            continue;
        };
        pillars.insert(
            *pillar,
            PillarComparison {
                score: *score,
                percentile: percentile_of(*score, peer_scores),
                peer_average: stats.average,
                vs_average: round2(score - stats.average),
            },
        );
    }

    let overall_score = mean_score(scores.values().copied());
    let peer_overall: Vec<f64> = records
        .iter()
        .filter(|r| !r.pillars.is_empty())
        .map(|r| mean_score(r.pillars.values().map(|p| p.score)))
        .collect();
    let overall_percentile = percentile_of(overall_score, &peer_overall);

    let mut ranked: Vec<(&Pillar, &PillarComparison)> = pillars.iter().collect();
    ranked.sort_by(|a, b| b.1.percentile.cmp(&a.1.percentile));
    let strongest = ranked.first().map_or("N/A", |(p, _)| p.display_name());
    let weakest = ranked.last().map_or("N/A", |(p, _)| p.display_name());

    Some(PeerComparison {
        overall_score: round2(overall_score),
        overall_percentile,
        peer_count: records.len(),
        pillars,
        summary: format!(
            "Overall maturity at {overall_percentile}th percentile. Strongest in {strongest}, opportunities in {weakest}."
        ),
    })
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
