//! Searcher - runs search queries with bounded concurrency.
//!
//! Query selection order: pending follow-up queries (highest priority
//! first), then plan queries not yet run, then broadening queries once both
//! are exhausted. Every query in a round settles before results are merged;
//! a failed query is logged and stays eligible for the next round.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;

use super::providers::{SearchHit, SearchLimits, SearchProvider};
use super::{StageContext, StageOutcome, StatePatch, StageWorker};
use crate::error::ProviderError;
use crate::llm::retry;
use crate::research::{
    AgentKind, CoverageDimension, ProgressDetail, QueryDescriptor, QueryPriority, ResearchState,
    SearchResult,
};

/// Result of one query in a round.
enum QueryRun {
    Completed(String, Vec<SearchHit>),
    Failed(String, ProviderError),
    Skipped,
}

/// Runs searches against a [`SearchProvider`].
pub struct SearchWorker {
    provider: Arc<dyn SearchProvider>,
}

impl SearchWorker {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self { provider }
    }

    /// Picks up to `limit` queries that have not been run yet.
    pub fn select_queries(state: &ResearchState, limit: usize) -> Vec<QueryDescriptor> {
        let mut seen = HashSet::new();
        let mut selected = Vec::new();

        let mut pending = state.pending_queries.clone();
        pending.sort_by_key(|q| q.priority);

        let plan = state
            .search_plan
            .as_ref()
            .map(|p| p.queries.clone())
            .unwrap_or_default();

        for query in pending.into_iter().chain(plan) {
            if selected.len() >= limit {
                return selected;
            }
            if state.has_searched(&query.query) || !seen.insert(query.query.to_lowercase()) {
                continue;
            }
            selected.push(query);
        }

        if selected.is_empty() {
            for query in broadening_queries(state) {
                if selected.len() >= limit {
                    break;
                }
                if !state.has_searched(&query.query) && seen.insert(query.query.to_lowercase()) {
                    selected.push(query);
                }
            }
        }
        selected
    }

    async fn run_query(
        &self,
        query: &QueryDescriptor,
        limits: &SearchLimits,
        ctx: &StageContext,
    ) -> QueryRun {
        if ctx.is_cancelled() {
            return QueryRun::Skipped;
        }

        let provider = self.provider.as_ref();
        let text = query.query.as_str();
        let result = retry(&ctx.config.retry_policy, ProviderError::is_transient, |_| async move {
            match tokio::time::timeout(limits.timeout, provider.search(text, limits)).await {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout {
                    provider: provider.name().to_string(),
                    seconds: limits.timeout.as_secs(),
                }),
            }
        })
        .await;

        match result {
            Ok(hits) => QueryRun::Completed(query.query.clone(), hits),
            Err(e) => QueryRun::Failed(query.query.clone(), e),
        }
    }
}

#[async_trait]
impl StageWorker for SearchWorker {
    fn agent(&self) -> AgentKind {
        AgentKind::Searcher
    }

    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome {
        if ctx.is_cancelled() {
            return StageOutcome::cancelled(StatePatch::default());
        }

        let queries = Self::select_queries(state, ctx.config.queries_per_round.max(1));
        if queries.is_empty() {
            return StageOutcome::failure("no queries left to search");
        }

        let limits = SearchLimits {
            max_results: ctx.config.results_per_query,
            timeout: ctx.config.timeouts.search,
        };
        let semaphore = Semaphore::new(ctx.config.search_concurrency.max(1));
        let completed = AtomicUsize::new(0);
        let total = queries.len();

        let runs = join_all(queries.iter().map(|query| {
            let semaphore = &semaphore;
            let completed = &completed;
            let limits = &limits;
            async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return QueryRun::Skipped;
                };
                let run = self.run_query(query, limits, ctx).await;
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                ctx.report(
                    &state.project_id,
                    ProgressDetail {
                        stage: AgentKind::Searcher.to_string(),
                        step: "searching".to_string(),
                        total_items: total,
                        completed_items: done,
                        current_item: Some(query.query.clone()),
                    },
                );
                run
            }
        }))
        .await;

        let mut patch = StatePatch::new();
        let mut failures = Vec::new();
        let mut batch = Vec::new();

        for run in runs {
            match run {
                QueryRun::Completed(query, hits) => {
                    for hit in hits {
                        batch.push(SearchResult {
                            url: hit.url,
                            title: hit.title,
                            snippet: hit.snippet,
                            source: self.provider.name().to_string(),
                            quality_score: hit.quality_score.clamp(0.0, 1.0),
                            query: query.clone(),
                            retrieved_at: Utc::now(),
                        });
                    }
                    patch.executed_queries.push(query);
                }
                QueryRun::Failed(query, e) => {
                    tracing::warn!(
                        project_id = %state.project_id,
                        query = %query,
                        error = %e,
                        "Search query failed"
                    );
                    failures.push(e.to_string());
                }
                QueryRun::Skipped => {}
            }
        }

        let mut seen_urls: HashSet<&str> =
            state.search_results.iter().map(|r| r.url.as_str()).collect();
        for result in &batch {
            if seen_urls.insert(result.url.as_str()) {
                patch.search_results.push(result.clone());
            }
        }

        if ctx.is_cancelled() {
            return StageOutcome::cancelled(patch);
        }

        let new_results = patch.search_results.len();
        let summary = format!(
            "{} new results from {} queries ({} failed)",
            new_results,
            patch.executed_queries.len(),
            failures.len()
        );
        tracing::info!(
            project_id = %state.project_id,
            new_results = new_results,
            failed = failures.len(),
            "Search round finished"
        );
        patch.current_step = Some(format!("searched {} queries", patch.executed_queries.len()));

        if new_results > 0 {
            StageOutcome::success(summary, patch)
        } else {
            let summary = match failures.first() {
                Some(first) if patch.executed_queries.is_empty() => {
                    format!("all {} searches failed: {}", failures.len(), first)
                }
                _ => summary,
            };
            StageOutcome {
                success: false,
                summary,
                patch,
                cancelled: false,
            }
        }
    }
}

/// Wider queries used once the plan and follow-ups are exhausted.
fn broadening_queries(state: &ResearchState) -> Vec<QueryDescriptor> {
    let subject = if state.title.trim().is_empty() {
        state.keywords.join(" ")
    } else {
        state.title.trim().to_string()
    };
    [
        ("reviews", CoverageDimension::Features),
        ("vs", CoverageDimension::Competitors),
        ("case study", CoverageDimension::UseCases),
        ("architecture", CoverageDimension::TechStack),
        ("industry report", CoverageDimension::Market),
        ("news", CoverageDimension::General),
    ]
    .into_iter()
    .map(|(suffix, dimension)| {
        QueryDescriptor::new(
            format!("{} {}", subject, suffix),
            "Broaden coverage",
            dimension,
            QueryPriority::Low,
        )
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::providers::mock::MockSearch;
    use crate::llm::RetryPolicy;
    use crate::pipeline::config::ResearchConfig;
    use crate::research::SearchPlan;
    use std::time::Duration;

    fn ctx(config: ResearchConfig) -> StageContext {
        StageContext::new(
            Arc::new(config.with_retry_policy(RetryPolicy::new(2, Duration::ZERO))),
            Default::default(),
        )
    }

    fn planned_state(queries: &[&str]) -> ResearchState {
        let mut state = ResearchState::new("p", "Acme", "", vec![]);
        state.search_plan = Some(SearchPlan {
            queries: queries
                .iter()
                .map(|q| QueryDescriptor::new(*q, "", CoverageDimension::General, QueryPriority::Medium))
                .collect(),
            focus_areas: vec![],
            created_at: Utc::now(),
        });
        state
    }

    #[test]
    fn test_pending_queries_come_first() {
        let mut state = planned_state(&["plan a", "plan b"]);
        state.pending_queries = vec![
            QueryDescriptor::new("low", "", CoverageDimension::General, QueryPriority::Low),
            QueryDescriptor::new("high", "", CoverageDimension::Market, QueryPriority::High),
        ];

        let selected = SearchWorker::select_queries(&state, 3);
        let texts: Vec<&str> = selected.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(texts, vec!["high", "low", "plan a"]);
    }

    #[test]
    fn test_searched_queries_are_skipped() {
        let mut state = planned_state(&["plan a", "plan b"]);
        state.executed_queries.push("plan a".to_string());
        let selected = SearchWorker::select_queries(&state, 10);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].query, "plan b");
    }

    #[test]
    fn test_broadening_when_exhausted() {
        let mut state = planned_state(&["plan a"]);
        state.executed_queries.push("plan a".to_string());
        let selected = SearchWorker::select_queries(&state, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].query, "Acme reviews");
    }

    #[tokio::test]
    async fn test_search_round_merges_unique_results() {
        let provider = Arc::new(MockSearch::new(3, 0.9));
        let worker = SearchWorker::new(provider.clone());
        let state = planned_state(&["one", "two", "three"]);

        let outcome = worker
            .run(&state, &ctx(ResearchConfig::default().with_search_concurrency(2)))
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.patch.search_results.len(), 9);
        assert_eq!(outcome.patch.executed_queries.len(), 3);
        assert_eq!(provider.calls(), 3);
        assert!(outcome
            .patch
            .search_results
            .iter()
            .all(|r| r.source == "mock-search"));
    }

    #[tokio::test]
    async fn test_failed_query_is_not_marked_executed() {
        let provider = Arc::new(MockSearch::new(2, 0.5).failing_on("two"));
        let worker = SearchWorker::new(provider.clone());
        let state = planned_state(&["one", "two"]);

        let outcome = worker.run(&state, &ctx(ResearchConfig::default())).await;

        assert!(outcome.success);
        assert_eq!(outcome.patch.executed_queries, vec!["one".to_string()]);
        // "two" is retried once by the policy.
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_all_failures_report_unsuccessful() {
        let provider = Arc::new(MockSearch::new(2, 0.5).failing_on("only"));
        let worker = SearchWorker::new(provider);
        let outcome = worker
            .run(&planned_state(&["only"]), &ctx(ResearchConfig::default()))
            .await;

        assert!(!outcome.success);
        assert!(outcome.summary.contains("all 1 searches failed"));
        assert!(outcome.patch.search_results.is_empty());
    }

    #[tokio::test]
    async fn test_known_urls_are_not_new() {
        let provider = Arc::new(MockSearch::new(1, 0.5));
        let worker = SearchWorker::new(provider);
        let mut state = planned_state(&["dup"]);
        state.search_results.push(SearchResult {
            url: "https://example.com/dup/0".to_string(),
            title: String::new(),
            snippet: String::new(),
            source: "earlier".to_string(),
            quality_score: 0.5,
            query: "other".to_string(),
            retrieved_at: Utc::now(),
        });

        let outcome = worker.run(&state, &ctx(ResearchConfig::default())).await;

        assert!(!outcome.success);
        assert_eq!(outcome.patch.executed_queries, vec!["dup".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_round_skips_queries() {
        let provider = Arc::new(MockSearch::new(1, 0.5));
        let worker = SearchWorker::new(provider.clone());
        let context = ctx(ResearchConfig::default());
        context.cancel.cancel();

        let outcome = worker.run(&planned_state(&["a", "b"]), &context).await;

        assert!(outcome.cancelled);
        assert_eq!(provider.calls(), 0);
    }
}
