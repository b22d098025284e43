//! Document intake: parse uploaded files, summarise each, extract the
//! technologies, controls and policies they mention.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use vaultzero_llm::{create_prompt, parse};
use vaultzero_shared::{Result, VaultZeroError};

use crate::stage::{Stage, StageContext};
use crate::state::{StageData, StateField, WorkflowState};

/// Characters of each document sent for its summary.
const SUMMARY_PREVIEW_CHARS: usize = 2_000;
/// Characters of combined text sent for extraction.
const EXTRACTION_CHARS: usize = 5_000;
/// Characters of combined text kept in state.
const COMBINED_TEXT_CHARS: usize = 10_000;

const SUMMARY_SYSTEM: &str = "You are analyzing a document for a Zero Trust security assessment.
Create a brief summary focusing on:
- Document type and purpose
- Key security-relevant information
- Technologies or systems mentioned
- Any Zero Trust controls discussed";

const EXTRACTION_SYSTEM: &str = "You are a Zero Trust security expert extracting information from documents.
Extract and list:
1. Technologies: cloud platforms, identity systems, networking tools, security products
2. Controls: specific Zero Trust controls mentioned (MFA, least privilege, encryption, etc.)
3. Policies: security, access and data policies referenced

Format as:
TECHNOLOGIES:
- item
CONTROLS:
- item
POLICIES:
- item";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Success,
    Failed,
}

/// Outcome of ingesting one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub filename: String,
    pub path: PathBuf,
    pub status: DocumentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// SHA-256 of the extracted text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub length: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DocumentSummary {
    fn failed(path: &Path, error: String) -> Self {
        Self {
            filename: file_name(path),
            path: path.to_path_buf(),
            status: DocumentStatus::Failed,
            summary: None,
            content_hash: None,
            length: 0,
            error: Some(error),
        }
    }
}

/// Reads `documents`; writes summaries, extracted lists and combined text.
pub struct DocumentIntake;

#[async_trait]
impl Stage for DocumentIntake {
    fn name(&self) -> &'static str {
        "DocumentAgent"
    }

    fn required(&self) -> &'static [StateField] {
        &[StateField::Documents]
    }

    #[instrument(skip_all, fields(stage = "DocumentAgent"))]
    async fn produce(&self, state: &WorkflowState, ctx: &StageContext) -> Result<StageData> {
        let paths = state.input.documents.as_deref().unwrap_or_default();
        let mut summaries = Vec::with_capacity(paths.len());
        let mut texts = Vec::new();
        let mut issues = Vec::new();

        for path in paths {
            ctx.progress.subtask(self.name(), &file_name(path));
            let text = match load_document(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "document could not be parsed");
                    issues.push(format!("{}: {}: {e}", self.name(), path.display()));
                    summaries.push(DocumentSummary::failed(path, e.to_string()));
                    continue;
                }
            };

            let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
            let user = format!(
                "Document: {}\n\nPreview:\n{}\n\nProvide a concise 3-4 sentence summary.",
                file_name(path),
                truncate_chars(&text, SUMMARY_PREVIEW_CHARS)
            );
            // The text was parsed, so the file stays in the extraction even
            // without a summary.
            let summary = match ctx
                .call(self.name(), create_prompt(SUMMARY_SYSTEM, &user, &[]))
                .await
            {
                Ok(summary) => Some(summary.trim().to_string()),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "document summary failed");
                    issues.push(format!("{}: summary of {} failed: {e}", self.name(), path.display()));
                    None
                }
            };
            summaries.push(DocumentSummary {
                filename: file_name(path),
                path: path.clone(),
                status: DocumentStatus::Success,
                summary,
                content_hash: Some(hash),
                length: text.chars().count(),
                error: None,
            });
            texts.push(format!("=== {} ===\n{}", file_name(path), text));
        }

        let combined = texts.join("\n\n");
        let (technologies, controls, policies) = if combined.trim().is_empty() {
            warn!("no document text to extract from");
            (Vec::new(), Vec::new(), Vec::new())
        } else {
            self.extract(ctx, &combined, &mut issues).await
        };

        info!(
            documents = paths.len(),
            technologies = technologies.len(),
            controls = controls.len(),
            policies = policies.len(),
            "document intake complete"
        );

        Ok(StageData {
            document_summaries: Some(summaries),
            extracted_technologies: Some(technologies),
            extracted_controls: Some(controls),
            extracted_policies: Some(policies),
            combined_text: Some(truncate_chars(&combined, COMBINED_TEXT_CHARS).to_string()),
            issues,
            ..StageData::default()
        })
    }
}

impl DocumentIntake {
    async fn extract(
        &self,
        ctx: &StageContext,
        combined: &str,
        issues: &mut Vec<String>,
    ) -> (Vec<String>, Vec<String>, Vec<String>) {
        let user = format!(
            "Extract Zero Trust elements from this text:\n\n{}\n\nProvide structured extraction as specified.",
            truncate_chars(combined, EXTRACTION_CHARS)
        );
        match ctx
            .call(self.name(), create_prompt(EXTRACTION_SYSTEM, &user, &[]))
            .await
        {
            Ok(text) => (
                parse::extract_section(&text, "TECHNOLOGIES:"),
                parse::extract_section(&text, "CONTROLS:"),
                parse::extract_section(&text, "POLICIES:"),
            ),
            Err(e) => {
                warn!(error = %e, "extraction failed, continuing with empty lists");
                issues.push(format!("{}: extraction failed: {e}", self.name()));
                (Vec::new(), Vec::new(), Vec::new())
            }
        }
    }
}

/// Read a supported document as text. HTML is converted to Markdown.
pub fn load_document(path: &Path) -> Result<String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "txt" | "md" | "markdown" | "csv" | "json" | "log" => {
            std::fs::read_to_string(path).map_err(|e| VaultZeroError::io(path, e))
        }
        "html" | "htm" => {
            let html = std::fs::read_to_string(path).map_err(|e| VaultZeroError::io(path, e))?;
            let converter = htmd::HtmlToMarkdown::builder()
                .skip_tags(vec!["script", "style", "nav", "iframe", "noscript", "svg"])
                .build();
            converter
                .convert(&html)
                .map_err(|e| VaultZeroError::parse(format!("htmd conversion failed: {e}")))
        }
        "" => Err(VaultZeroError::validation(format!(
            "{}: file has no extension",
            path.display()
        ))),
        other => Err(VaultZeroError::validation(format!(
            "unsupported file type: .{other}"
        ))),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// The first `max` characters of `text`, cut on a char boundary.
pub(crate) fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::WorkflowInput;
    use crate::test_support::{ScriptedGenerator, temp_dir, test_context};
    use std::sync::Arc;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        std::fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn html_is_converted_to_markdown() {
        let dir = temp_dir();
        let path = write(
            &dir,
            "policy.html",
            "<html><body><h1>Access Policy</h1><script>x()</script><p>MFA is <b>required</b>.</p></body></html>",
        );
        let text = load_document(&path).unwrap();
        assert!(text.contains("Access Policy"));
        assert!(text.contains("**required**"));
        assert!(!text.contains("x()"));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = temp_dir();
        let path = write(&dir, "deck.pptx", "binary");
        let err = load_document(&path).unwrap_err();
        assert!(err.to_string().contains(".pptx"));
    }

    #[tokio::test]
    async fn failed_file_does_not_stop_others() {
        let dir = temp_dir();
        let good = write(&dir, "ssp.md", "# System Security Plan\nOkta SSO with MFA for all staff.");
        let bad = write(&dir, "scan.pdf", "%PDF-1.7");
        let missing = dir.join("gone.txt");

        let generator = Arc::new(
            ScriptedGenerator::new()
                .on("Provide a concise 3-4 sentence summary", "A security plan describing SSO.")
                .on(
                    "Extract Zero Trust elements",
                    "TECHNOLOGIES:\n- Okta\nCONTROLS:\n- MFA\nPOLICIES:\n- Access policy\n",
                ),
        );
        let ctx = test_context(generator.clone());
        let state = WorkflowState::new(WorkflowInput::documents(
            vec![bad.clone(), good.clone(), missing],
            "full",
        ));

        let state = DocumentIntake.process(state, &ctx).await.unwrap();
        let summaries = state.data.document_summaries.as_ref().unwrap();
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].status, DocumentStatus::Failed);
        assert_eq!(summaries[1].status, DocumentStatus::Success);
        assert_eq!(summaries[1].filename, "ssp.md");
        assert_eq!(summaries[1].content_hash.as_ref().unwrap().len(), 64);
        assert_eq!(summaries[2].status, DocumentStatus::Failed);

        assert_eq!(state.data.extracted_technologies, Some(vec!["Okta".to_string()]));
        assert_eq!(state.data.extracted_controls, Some(vec!["MFA".to_string()]));
        assert_eq!(state.data.extracted_policies, Some(vec!["Access policy".to_string()]));
        assert!(state.data.combined_text.as_ref().unwrap().contains("=== ssp.md ==="));
        assert_eq!(state.errors.len(), 2);
        // one summary + one extraction
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn summary_failure_keeps_document_text() {
        let dir = temp_dir();
        let good = write(&dir, "zta.md", "Illumio microsegmentation across all workloads.");
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail_on("Provide a concise 3-4 sentence summary", "HTTP 529")
                .on("Extract Zero Trust elements", "TECHNOLOGIES:\n- Illumio\n"),
        );
        let ctx = test_context(generator);

        let state = DocumentIntake
            .process(
                WorkflowState::new(WorkflowInput::documents(vec![good], "full")),
                &ctx,
            )
            .await
            .unwrap();
        let summaries = state.data.document_summaries.as_ref().unwrap();
        assert_eq!(summaries[0].status, DocumentStatus::Success);
        assert!(summaries[0].summary.is_none());
        assert!(summaries[0].content_hash.is_some());
        assert!(state.data.combined_text.as_ref().unwrap().contains("=== zta.md ==="));
        assert_eq!(state.data.extracted_technologies, Some(vec!["Illumio".to_string()]));
        assert!(state.errors.iter().any(|e| e.contains("summary of")));
    }

    #[tokio::test]
    async fn extraction_failure_yields_empty_lists() {
        let dir = temp_dir();
        let good = write(&dir, "notes.txt", "Zscaler ZPA replaces the VPN.");
        let generator = Arc::new(
            ScriptedGenerator::new()
                .fail_on("Extract Zero Trust elements", "HTTP 500")
                .with_default("summary"),
        );
        let ctx = test_context(generator);

        let state = DocumentIntake
            .process(
                WorkflowState::new(WorkflowInput::documents(vec![good], "full")),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(state.data.extracted_technologies, Some(vec![]));
        assert_eq!(state.data.extracted_controls, Some(vec![]));
        assert!(state.errors.iter().any(|e| e.contains("extraction failed")));
    }

    #[tokio::test]
    async fn no_documents_makes_no_calls() {
        let generator = Arc::new(ScriptedGenerator::new());
        let ctx = test_context(generator.clone());
        let state = DocumentIntake
            .process(
                WorkflowState::new(WorkflowInput::documents(vec![], "full")),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(state.data.document_summaries.as_ref().unwrap().len(), 0);
        assert_eq!(generator.calls(), 0);
    }
}
