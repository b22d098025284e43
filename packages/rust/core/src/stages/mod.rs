//! The pipeline stages.

mod analyzer;
mod assessment;
mod benchmark;
mod compliance;
mod document;
pub(crate) mod pillar;
mod recommendation;
mod report;
mod roadmap;

pub use analyzer::PillarAnalysisStage;
pub use assessment::{AssessmentStage, AssessmentSynthesis};
pub use benchmark::{BenchmarkAnalysis, BenchmarkResults, BenchmarkStage, BestPractice, PillarRanking};
pub use compliance::{
    ComplianceResults, ComplianceStage, ComplianceStatus, FRAMEWORKS, Framework,
    failed_mapping, mapping_from_response, overall_percentage,
};
pub use document::{DocumentIntake, DocumentStatus, DocumentSummary, load_document};
pub(crate) use document::truncate_chars;
pub use pillar::PillarAnalysis;
pub use recommendation::{Priority, Recommendation, RecommendationSet, RecommendationStage};
pub use report::{ReportOutput, ReportStage, write_report};
pub use roadmap::{MaturityTarget, Phase, Roadmap, RoadmapStage, UsdRange, targets, usd};
