//! Core domain types for Zero Trust maturity assessments.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::VaultZeroError;

/// Upper bound of the maturity scale.
pub const MAX_SCORE: f64 = 5.0;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for workflow run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pillar
// ---------------------------------------------------------------------------

/// One of the seven NIST SP 800-207 security dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Identity,
    Devices,
    Networks,
    Applications,
    Data,
    Visibility,
    Automation,
}

impl Pillar {
    /// All seven pillars, in assessment order.
    pub const ALL: [Pillar; 7] = [
        Pillar::Identity,
        Pillar::Devices,
        Pillar::Networks,
        Pillar::Applications,
        Pillar::Data,
        Pillar::Visibility,
        Pillar::Automation,
    ];

    /// The five pillars covered by the questionnaire.
    pub const CORE: [Pillar; 5] = [
        Pillar::Identity,
        Pillar::Devices,
        Pillar::Networks,
        Pillar::Applications,
        Pillar::Data,
    ];

    /// Stable lowercase key used in maps and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Devices => "devices",
            Self::Networks => "networks",
            Self::Applications => "applications",
            Self::Data => "data",
            Self::Visibility => "visibility",
            Self::Automation => "automation",
        }
    }

    /// Human-readable name as used in prompts and reports.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Identity => "Identity",
            Self::Devices => "Devices",
            Self::Networks => "Networks",
            Self::Applications => "Applications/Workloads",
            Self::Data => "Data",
            Self::Visibility => "Visibility & Analytics",
            Self::Automation => "Automation & Orchestration",
        }
    }
}

impl fmt::Display for Pillar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for Pillar {
    type Err = VaultZeroError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        let pillar = match key.as_str() {
            "identity" => Self::Identity,
            "devices" | "device" => Self::Devices,
            "networks" | "network" => Self::Networks,
            "applications" | "application" | "applications/workloads" | "workloads" => {
                Self::Applications
            }
            "data" => Self::Data,
            "visibility" | "visibility & analytics" | "visibility_analytics" => Self::Visibility,
            "automation" | "automation & orchestration" | "automation_orchestration" => {
                Self::Automation
            }
            _ => {
                return Err(VaultZeroError::validation(format!("unknown pillar: {s}")));
            }
        };
        Ok(pillar)
    }
}

// ---------------------------------------------------------------------------
// Maturity
// ---------------------------------------------------------------------------

/// Ordinal maturity label on the 0–5 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaturityLevel {
    Initial,
    Developing,
    Defined,
    Managed,
    Optimized,
}

impl MaturityLevel {
    /// Threshold a numeric score into its label.
    pub fn from_score(score: f64) -> Self {
        if score < 1.0 {
            Self::Initial
        } else if score < 2.0 {
            Self::Developing
        } else if score < 3.0 {
            Self::Defined
        } else if score < 4.0 {
            Self::Managed
        } else {
            Self::Optimized
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "Initial",
            Self::Developing => "Developing",
            Self::Defined => "Defined",
            Self::Managed => "Managed",
            Self::Optimized => "Optimized",
        }
    }
}

impl fmt::Display for MaturityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp a score into `[0, MAX_SCORE]`; NaN becomes 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, MAX_SCORE)
    }
}

/// A pillar's numeric rating. The label is always derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "PillarScoreRepr", from = "PillarScoreRepr")]
pub struct PillarScore {
    score: f64,
}

#[derive(Serialize, Deserialize)]
struct PillarScoreRepr {
    score: f64,
    #[serde(default, skip_deserializing)]
    maturity_level: Option<MaturityLevel>,
}

impl From<PillarScore> for PillarScoreRepr {
    fn from(value: PillarScore) -> Self {
        Self {
            score: value.score,
            maturity_level: Some(value.level()),
        }
    }
}

impl From<PillarScoreRepr> for PillarScore {
    fn from(value: PillarScoreRepr) -> Self {
        Self::new(value.score)
    }
}

impl PillarScore {
    /// Build a score, clamping into the valid range.
    pub fn new(score: f64) -> Self {
        Self {
            score: clamp_score(score),
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn level(&self) -> MaturityLevel {
        MaturityLevel::from_score(self.score)
    }
}

/// Arithmetic mean of a set of scores (0 for an empty set).
pub fn mean_score<I>(scores: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = scores
        .into_iter()
        .fold((0.0, 0usize), |(sum, n), s| (sum + s, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

// ---------------------------------------------------------------------------
// Compliance
// ---------------------------------------------------------------------------

/// Result of mapping findings onto one compliance framework.
///
/// `controls_met_count` and `compliance_score` are derived from the lists,
/// so they cannot disagree with them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "ComplianceMappingRepr", from = "ComplianceMappingRepr")]
pub struct ComplianceMapping {
    pub framework: String,
    pub total_controls: u32,
    pub controls_met: Vec<String>,
    pub gaps: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct ComplianceMappingRepr {
    framework: String,
    total_controls: u32,
    #[serde(default, skip_deserializing)]
    controls_met_count: usize,
    controls_met: Vec<String>,
    gaps: Vec<String>,
    #[serde(default, skip_deserializing)]
    compliance_score: f64,
}

impl From<ComplianceMapping> for ComplianceMappingRepr {
    fn from(value: ComplianceMapping) -> Self {
        Self {
            controls_met_count: value.controls_met_count(),
            compliance_score: value.compliance_score(),
            framework: value.framework,
            total_controls: value.total_controls,
            controls_met: value.controls_met,
            gaps: value.gaps,
        }
    }
}

impl From<ComplianceMappingRepr> for ComplianceMapping {
    fn from(value: ComplianceMappingRepr) -> Self {
        Self {
            framework: value.framework,
            total_controls: value.total_controls,
            controls_met: value.controls_met,
            gaps: value.gaps,
        }
    }
}

impl ComplianceMapping {
    pub fn controls_met_count(&self) -> usize {
        self.controls_met.len()
    }

    /// Percentage of controls satisfied, rounded to one decimal.
    pub fn compliance_score(&self) -> f64 {
        percentage(self.controls_met_count() as u64, u64::from(self.total_controls))
    }
}

/// `part / whole * 100` rounded to one decimal, 0 when `whole` is 0.
pub fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    let pct = part as f64 / whole as f64 * 100.0;
    (pct * 10.0).round() / 10.0
}

// ---------------------------------------------------------------------------
// Peer corpus
// ---------------------------------------------------------------------------

/// One question/answer pair from a previous assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
}

/// Per-pillar record inside a peer assessment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerPillar {
    #[serde(default)]
    pub maturity_level: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detailed_assessment: Vec<QaPair>,
}

/// A previously-assessed system in the benchmark corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerAssessment {
    #[serde(default)]
    pub system_id: String,
    #[serde(default)]
    pub system_type: String,
    #[serde(default)]
    pub overall_maturity_level: String,
    #[serde(default)]
    pub system_description: String,
    #[serde(default)]
    pub pillars: std::collections::BTreeMap<String, PeerPillar>,
}

/// Metadata stamped on an emitted report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMeta {
    pub run_id: RunId,
    pub tool_version: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
