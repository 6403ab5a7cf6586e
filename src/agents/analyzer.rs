//! Analyzer - turns extracted content into a structured analysis.
//!
//! The model reply is parsed leniently: camelCase or snake_case keys,
//! features and competitors as objects or bare strings, market figures as
//! strings or numbers. Each run merges into the previous analysis so a
//! re-analysis never loses findings.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::error::{AgentError, AgentResult};
use super::{StageContext, StageOutcome, StatePatch, StageWorker};
use crate::llm::{generate_with_retry, GenerationOptions, TextGenerationClient};
use crate::prompts::build_analysis_prompt;
use crate::research::{
    AgentKind, Analysis, Competitor, ExtractedContent, Feature, MarketData, ResearchState, Swot,
};
use crate::utils::json_extraction::{try_extract_json_object, JsonExtractionResult};

/// Sources sent to the model per analysis.
const DEFAULT_MAX_SOURCES: usize = 12;

// ============================================================================
// LLM Response Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AnalysisResponse {
    features: Vec<NamedItem>,
    competitors: Vec<NamedItem>,
    #[serde(alias = "useCases")]
    use_cases: Vec<String>,
    #[serde(alias = "techStack")]
    tech_stack: Vec<String>,
    swot: Swot,
    #[serde(alias = "marketData")]
    market_data: MarketDataResponse,
    #[serde(alias = "confidenceScore")]
    confidence_score: Option<f64>,
    #[serde(alias = "dataGaps")]
    data_gaps: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NamedItem {
    Plain(String),
    Detailed {
        name: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        url: Option<String>,
    },
}

impl NamedItem {
    fn into_parts(self) -> (String, String, Option<String>) {
        match self {
            NamedItem::Plain(name) => (name, String::new(), None),
            NamedItem::Detailed {
                name,
                description,
                url,
            } => (name, description, url.filter(|u| !u.trim().is_empty())),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct MarketDataResponse {
    #[serde(alias = "marketSize")]
    market_size: Option<Value>,
    #[serde(alias = "growthRate")]
    growth_rate: Option<Value>,
    notes: Vec<String>,
}

fn value_text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl AnalysisResponse {
    fn into_analysis(self) -> Analysis {
        let features = self
            .features
            .into_iter()
            .map(NamedItem::into_parts)
            .filter(|(name, _, _)| !name.trim().is_empty())
            .map(|(name, description, _)| Feature { name, description })
            .collect();
        let competitors = self
            .competitors
            .into_iter()
            .map(NamedItem::into_parts)
            .filter(|(name, _, _)| !name.trim().is_empty())
            .map(|(name, description, url)| Competitor {
                name,
                description,
                url,
            })
            .collect();

        Analysis {
            features,
            competitors,
            use_cases: self.use_cases,
            tech_stack: self.tech_stack,
            swot: self.swot,
            market_data: MarketData {
                market_size: value_text(self.market_data.market_size),
                growth_rate: value_text(self.market_data.growth_rate),
                notes: self.market_data.notes,
            },
            confidence_score: self.confidence_score.unwrap_or(0.0).clamp(0.0, 1.0),
            data_gaps: self.data_gaps,
        }
    }
}

/// Parses a model reply into an [`Analysis`].
///
/// # Errors
///
/// Returns `AgentError::ResponseParse` when no JSON object can be found or
/// it does not match the expected shape.
pub fn parse_analysis(reply: &str) -> AgentResult<Analysis> {
    let json = match try_extract_json_object(reply) {
        JsonExtractionResult::Success(json) => json,
        JsonExtractionResult::Truncated {
            unclosed_braces, ..
        } => {
            return Err(AgentError::ResponseParse(format!(
                "analysis JSON truncated ({} unclosed braces)",
                unclosed_braces
            )))
        }
        JsonExtractionResult::NotFound => {
            return Err(AgentError::ResponseParse(
                "no JSON object in analysis reply".to_string(),
            ))
        }
    };

    let response: AnalysisResponse = serde_json::from_str(&json)
        .map_err(|e| AgentError::ResponseParse(format!("analysis JSON: {}", e)))?;
    Ok(response.into_analysis())
}

// ============================================================================
// Merging
// ============================================================================

fn push_unique_text(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        let trimmed = item.trim();
        if !trimmed.is_empty() && !target.iter().any(|t| t.eq_ignore_ascii_case(trimmed)) {
            target.push(trimmed.to_string());
        }
    }
}

/// Combines a fresh analysis with the previous one.
///
/// Lists are unioned (case-insensitive on names), market figures prefer the
/// fresh value, confidence and data gaps come from the fresh analysis.
pub fn merge_analysis(previous: Option<&Analysis>, fresh: Analysis) -> Analysis {
    let Some(previous) = previous else {
        return fresh;
    };
    let mut merged = previous.clone();

    for feature in fresh.features {
        match merged
            .features
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(&feature.name))
        {
            Some(existing) if existing.description.is_empty() => {
                existing.description = feature.description
            }
            Some(_) => {}
            None => merged.features.push(feature),
        }
    }

    for competitor in fresh.competitors {
        match merged
            .competitors
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&competitor.name))
        {
            Some(existing) => {
                if existing.description.is_empty() {
                    existing.description = competitor.description;
                }
                if existing.url.is_none() {
                    existing.url = competitor.url;
                }
            }
            None => merged.competitors.push(competitor),
        }
    }

    push_unique_text(&mut merged.use_cases, fresh.use_cases);
    push_unique_text(&mut merged.tech_stack, fresh.tech_stack);
    push_unique_text(&mut merged.swot.strengths, fresh.swot.strengths);
    push_unique_text(&mut merged.swot.weaknesses, fresh.swot.weaknesses);
    push_unique_text(&mut merged.swot.opportunities, fresh.swot.opportunities);
    push_unique_text(&mut merged.swot.threats, fresh.swot.threats);

    let fresh_size = fresh.market_data.has_market_size();
    let fresh_growth = fresh.market_data.has_growth_rate();
    if fresh_size {
        merged.market_data.market_size = fresh.market_data.market_size;
    }
    if fresh_growth {
        merged.market_data.growth_rate = fresh.market_data.growth_rate;
    }
    push_unique_text(&mut merged.market_data.notes, fresh.market_data.notes);

    merged.confidence_score = fresh.confidence_score;
    merged.data_gaps = fresh.data_gaps;
    merged
}

// ============================================================================
// Worker
// ============================================================================

/// Runs the analysis step over extracted content.
pub struct AnalyzerWorker {
    llm: Arc<dyn TextGenerationClient>,
    options: GenerationOptions,
    max_sources: usize,
}

impl AnalyzerWorker {
    pub fn new(llm: Arc<dyn TextGenerationClient>) -> Self {
        Self {
            llm,
            options: GenerationOptions::new().with_temperature(0.2).with_max_tokens(4000),
            max_sources: DEFAULT_MAX_SOURCES,
        }
    }

    pub fn with_max_sources(mut self, max_sources: usize) -> Self {
        self.max_sources = max_sources.max(1);
        self
    }

    pub fn with_generation_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    async fn analyze(
        &self,
        state: &ResearchState,
        ctx: &StageContext,
    ) -> AgentResult<(String, StatePatch)> {
        let mut sources: Vec<&ExtractedContent> = state.extracted_content.iter().collect();
        if sources.is_empty() {
            return Err(AgentError::MissingInput("no extracted content to analyze".to_string()));
        }
        sources.sort_by(|a, b| b.quality_score.total_cmp(&a.quality_score));
        sources.truncate(self.max_sources);

        let prompt = build_analysis_prompt(state, &sources);
        let system = if ctx.instructions.trim().is_empty() {
            prompt.system.clone()
        } else {
            format!("{}\n\n## SUPERVISOR NOTES\n\n{}", prompt.system, ctx.instructions.trim())
        };

        let reply = generate_with_retry(
            self.llm.as_ref(),
            &prompt.user,
            Some(system.as_str()),
            &self.options,
            ctx.config.timeouts.analysis,
            &ctx.config.retry_policy,
        )
        .await?;

        let fresh = parse_analysis(&reply)?;
        let analysis = merge_analysis(state.analysis.as_ref(), fresh);
        let summary = format!(
            "analyzed {} sources: {} features, {} competitors, confidence {:.2}",
            sources.len(),
            analysis.features.len(),
            analysis.competitors.len(),
            analysis.confidence_score
        );

        Ok((
            summary,
            StatePatch {
                analysis: Some(analysis),
                current_step: Some("analysis updated".to_string()),
                ..StatePatch::default()
            },
        ))
    }
}

#[async_trait]
impl StageWorker for AnalyzerWorker {
    fn agent(&self) -> AgentKind {
        AgentKind::Analyzer
    }

    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome {
        if ctx.is_cancelled() {
            return StageOutcome::cancelled(StatePatch::default());
        }

        let outcome = StageOutcome::from_result(self.analyze(state, ctx).await);
        if !outcome.success {
            tracing::warn!(project_id = %state.project_id, summary = %outcome.summary, "Analysis failed");
        }
        outcome
    }
}
