//! Planner - builds the search plan for a research project.
//!
//! The base plan is deterministic: one query per coverage dimension plus
//! one per keyword. When a text-generation client is configured the model
//! may add further queries; a failed or unparsable reply leaves the base
//! plan untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::{StageContext, StageOutcome, StatePatch, StageWorker};
use crate::llm::{generate_with_retry, GenerationOptions, TextGenerationClient};
use crate::prompts::build_planning_prompt;
use crate::research::{
    AgentKind, CoverageDimension, QueryDescriptor, QueryPriority, ResearchState, SearchPlan,
};
use crate::utils::json_extraction::extract_json_object;

/// Most model-proposed queries added to a plan.
const MAX_EXTRA_QUERIES: usize = 8;

// ============================================================================
// LLM Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct PlanResponse {
    #[serde(default)]
    queries: Vec<PlannedQuery>,
    #[serde(default, alias = "focusAreas")]
    focus_areas: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlannedQuery {
    query: String,
    #[serde(default)]
    purpose: String,
    #[serde(default)]
    dimension: String,
}

fn parse_dimension(value: &str) -> CoverageDimension {
    match value.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
        "features" | "feature" => CoverageDimension::Features,
        "competitors" | "competitor" => CoverageDimension::Competitors,
        "use_cases" | "usecases" | "use_case" => CoverageDimension::UseCases,
        "tech_stack" | "techstack" | "technology" => CoverageDimension::TechStack,
        "market" | "market_data" => CoverageDimension::Market,
        _ => CoverageDimension::General,
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Produces the [`SearchPlan`] for a project.
pub struct PlannerWorker {
    llm: Option<Arc<dyn TextGenerationClient>>,
    options: GenerationOptions,
}

impl Default for PlannerWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerWorker {
    pub fn new() -> Self {
        Self {
            llm: None,
            options: GenerationOptions::new().with_temperature(0.4),
        }
    }

    /// Lets the model propose queries on top of the base plan.
    pub fn with_llm(mut self, llm: Arc<dyn TextGenerationClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// The deterministic part of the plan.
    pub fn base_plan(state: &ResearchState, instructions: &str) -> SearchPlan {
        let subject = research_subject(state);
        let mut queries = vec![
            QueryDescriptor::new(
                format!("{} features", subject),
                "Catalogue product features",
                CoverageDimension::Features,
                QueryPriority::High,
            ),
            QueryDescriptor::new(
                format!("{} competitors alternatives", subject),
                "Identify competing products",
                CoverageDimension::Competitors,
                QueryPriority::High,
            ),
            QueryDescriptor::new(
                format!("{} use cases", subject),
                "Find how the product is used",
                CoverageDimension::UseCases,
                QueryPriority::Medium,
            ),
            QueryDescriptor::new(
                format!("{} technology stack", subject),
                "Identify underlying technology",
                CoverageDimension::TechStack,
                QueryPriority::Medium,
            ),
            QueryDescriptor::new(
                format!("{} market size growth", subject),
                "Estimate market size and growth",
                CoverageDimension::Market,
                QueryPriority::Medium,
            ),
            QueryDescriptor::new(
                format!("{} overview", subject),
                "General background",
                CoverageDimension::General,
                QueryPriority::Low,
            ),
        ];

        for keyword in &state.keywords {
            let keyword = keyword.trim();
            if keyword.is_empty() || keyword.eq_ignore_ascii_case(&subject) {
                continue;
            }
            push_unique(
                &mut queries,
                QueryDescriptor::new(
                    format!("{} {}", subject, keyword),
                    format!("Keyword coverage: {}", keyword),
                    CoverageDimension::General,
                    QueryPriority::Low,
                ),
            );
        }

        let mut focus_areas: Vec<String> = [
            CoverageDimension::Features,
            CoverageDimension::Competitors,
            CoverageDimension::UseCases,
            CoverageDimension::TechStack,
            CoverageDimension::Market,
        ]
        .iter()
        .map(|d| d.to_string())
        .collect();
        if !instructions.trim().is_empty() {
            focus_areas.push(instructions.trim().to_string());
        }

        SearchPlan {
            queries,
            focus_areas,
            created_at: Utc::now(),
        }
    }

    /// Asks the model for extra queries; `None` when it could not help.
    async fn refine(
        &self,
        llm: &dyn TextGenerationClient,
        state: &ResearchState,
        ctx: &StageContext,
    ) -> Option<PlanResponse> {
        let prompt = build_planning_prompt(state);
        let reply = generate_with_retry(
            llm,
            &prompt.user,
            Some(prompt.system.as_str()),
            &self.options,
            ctx.config.timeouts.analysis,
            &ctx.config.retry_policy,
        )
        .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(project_id = %state.project_id, error = %e, "Plan refinement failed");
                return None;
            }
        };

        let parsed = extract_json_object(&reply)
            .and_then(|json| serde_json::from_str::<PlanResponse>(&json).ok());
        if parsed.is_none() {
            tracing::warn!(project_id = %state.project_id, "Plan refinement reply was not valid JSON");
        }
        parsed
    }
}

#[async_trait]
impl StageWorker for PlannerWorker {
    fn agent(&self) -> AgentKind {
        AgentKind::Planner
    }

    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome {
        if ctx.is_cancelled() {
            return StageOutcome::cancelled(StatePatch::default());
        }

        let mut plan = Self::base_plan(state, &ctx.instructions);
        let base_count = plan.queries.len();

        if let Some(llm) = &self.llm {
            if let Some(response) = self.refine(llm.as_ref(), state, ctx).await {
                for planned in response.queries.into_iter().take(MAX_EXTRA_QUERIES) {
                    if planned.query.trim().is_empty() {
                        continue;
                    }
                    push_unique(
                        &mut plan.queries,
                        QueryDescriptor::new(
                            planned.query.trim(),
                            planned.purpose,
                            parse_dimension(&planned.dimension),
                            QueryPriority::Medium,
                        ),
                    );
                }
                for area in response.focus_areas {
                    if !area.trim().is_empty() && !plan.focus_areas.contains(&area) {
                        plan.focus_areas.push(area);
                    }
                }
            }
        }

        let summary = format!(
            "planned {} queries ({} from the model)",
            plan.queries.len(),
            plan.queries.len() - base_count
        );
        tracing::info!(project_id = %state.project_id, queries = plan.queries.len(), "Search plan ready");

        StageOutcome::success(
            summary,
            StatePatch {
                search_plan: Some(plan),
                current_step: Some("plan ready".to_string()),
                ..StatePatch::default()
            },
        )
    }
}

/// Title, else the keywords, else a generic subject.
fn research_subject(state: &ResearchState) -> String {
    let title = state.title.trim();
    if !title.is_empty() {
        return title.to_string();
    }
    let keywords: Vec<&str> = state
        .keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if keywords.is_empty() {
        "the product".to_string()
    } else {
        keywords.join(" ")
    }
}

fn push_unique(queries: &mut Vec<QueryDescriptor>, query: QueryDescriptor) {
    if !queries
        .iter()
        .any(|q| q.query.eq_ignore_ascii_case(&query.query))
    {
        queries.push(query);
    }
}
