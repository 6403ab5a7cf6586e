//! Extractor - pulls page content for the best unextracted search hits.
//!
//! Runs sequentially, checking for cancellation before each page.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::providers::{ExtractionLimits, ExtractionProvider};
use super::{StageContext, StageOutcome, StatePatch, StageWorker};
use crate::error::ProviderError;
use crate::llm::retry;
use crate::research::{
    AgentKind, Citation, ExtractedContent, ProgressDetail, ResearchState, SearchResult,
};

/// Content length at which an extraction reaches full quality.
const FULL_QUALITY_CHARS: f64 = 2000.0;

/// Default cap on characters kept per page.
const DEFAULT_MAX_CHARS: usize = 20_000;

/// Quality of an extraction from its length: `min(1, chars / 2000)`.
pub fn content_quality(content_length: usize) -> f64 {
    (content_length as f64 / FULL_QUALITY_CHARS).min(1.0)
}

/// Extracts page content through an [`ExtractionProvider`].
pub struct ExtractionWorker {
    provider: Arc<dyn ExtractionProvider>,
    max_chars: usize,
}

impl ExtractionWorker {
    pub fn new(provider: Arc<dyn ExtractionProvider>) -> Self {
        Self {
            provider,
            max_chars: DEFAULT_MAX_CHARS,
        }
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    /// Unextracted hits, best quality first.
    pub fn select_targets(state: &ResearchState, limit: usize) -> Vec<&SearchResult> {
        let mut targets: Vec<&SearchResult> = state.unextracted_results().collect();
        targets.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
        targets.truncate(limit);
        targets
    }
}

#[async_trait]
impl StageWorker for ExtractionWorker {
    fn agent(&self) -> AgentKind {
        AgentKind::Extractor
    }

    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome {
        let targets = Self::select_targets(state, ctx.config.extractions_per_round.max(1));
        if targets.is_empty() {
            return StageOutcome::failure("no unextracted search results");
        }

        let limits = ExtractionLimits {
            max_chars: self.max_chars,
            timeout: ctx.config.timeouts.extraction,
        };
        let provider = self.provider.as_ref();
        let limits_ref = &limits;
        let mut patch = StatePatch::new();
        let mut failures: Vec<String> = Vec::new();

        for (i, target) in targets.iter().enumerate() {
            if ctx.is_cancelled() {
                tracing::info!(
                    project_id = %state.project_id,
                    extracted = patch.extracted_content.len(),
                    "Extraction cancelled"
                );
                return StageOutcome::cancelled(patch);
            }

            ctx.report(
                &state.project_id,
                ProgressDetail {
                    stage: AgentKind::Extractor.to_string(),
                    step: "extracting".to_string(),
                    total_items: targets.len(),
                    completed_items: i,
                    current_item: Some(target.url.clone()),
                },
            );

            let url = target.url.as_str();
            let result = retry(&ctx.config.retry_policy, ProviderError::is_transient, |_| async move {
                match tokio::time::timeout(limits_ref.timeout, provider.extract(url, limits_ref)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(ProviderError::Timeout {
                        provider: provider.name().to_string(),
                        seconds: limits_ref.timeout.as_secs(),
                    }),
                }
            })
            .await;

            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(project_id = %state.project_id, url = %url, error = %e, "Extraction failed");
                    failures.push(e.to_string());
                    patch.failed_urls.push(target.url.clone());
                    continue;
                }
            };

            let content: String = page.content.chars().take(self.max_chars).collect();
            let content_length = content.chars().count();
            let title = if page.title.trim().is_empty() {
                target.title.clone()
            } else {
                page.title
            };

            patch.citations.push(Citation {
                url: target.url.clone(),
                title: title.clone(),
                accessed_at: Utc::now(),
            });
            patch.extracted_content.push(ExtractedContent {
                url: target.url.clone(),
                title,
                content,
                content_length,
                quality_score: content_quality(content_length),
                extracted_at: Utc::now(),
            });
        }

        let extracted = patch.extracted_content.len();
        tracing::info!(
            project_id = %state.project_id,
            extracted = extracted,
            failed = failures.len(),
            "Extraction round finished"
        );

        if extracted == 0 {
            return StageOutcome::failure(format!(
                "all {} extractions failed: {}",
                failures.len(),
                failures.first().map(String::as_str).unwrap_or("unknown error")
            ))
            .with_patch(patch);
        }

        patch.current_step = Some(format!("extracted {} pages", extracted));
        StageOutcome::success(
            format!("extracted {} of {} pages", extracted, targets.len()),
            patch,
        )
    }
}
