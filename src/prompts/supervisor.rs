//! Decision prompt for the LLM-assisted supervisor.
//!
//! The model only sees counters and thresholds, never raw content.

use super::StagePrompt;
use crate::quality::QualityThresholds;
use crate::research::ResearchState;

const SUPERVISOR_SYSTEM_PROMPT: &str = r#"You are the supervisor of a market research pipeline with five stages:

- planner: builds the search plan
- searcher: runs web searches from the plan and follow-up queries
- extractor: extracts full content from the best search results
- analyzer: turns extracted content into features, competitors, SWOT and market data
- reporter: writes the final report

Given counters for the current run and the minimum evidence each stage needs,
choose the next stage. Advance only when the current stage has cleared its
thresholds; otherwise repeat it or send the run back to gather more evidence.
Choose "done" only when the report stage has finished.

## OUTPUT FORMAT

Output a JSON object:
{
  "nextAgent": "planner|searcher|extractor|analyzer|reporter|done",
  "reason": "why this stage is next",
  "instructions": "what the stage should focus on",
  "shouldContinue": true
}

Output ONLY the JSON object. No additional text."#;

/// Builds the decision prompt for `state`.
///
/// # Arguments
///
/// * `state` - Snapshot of the run being decided
/// * `thresholds` - Minimum evidence per stage
/// * `max_iterations` - Loop budget for the run
pub fn build_supervisor_prompt(
    state: &ResearchState,
    thresholds: &QualityThresholds,
    max_iterations: u32,
) -> StagePrompt {
    let analysis = state.analysis.as_ref();
    let features = analysis.map_or(0, |a| a.features.len());
    let competitors = analysis.map_or(0, |a| a.competitors.len());
    let confidence = analysis.map_or(0.0, |a| a.confidence_score);
    let quality_score = state.data_quality.as_ref().map_or(0.0, |q| q.score);
    let gaps = state
        .data_quality
        .as_ref()
        .map(|q| q.data_gaps.join("; "))
        .unwrap_or_default();

    let user = format!(
        r#"## RESEARCH PROJECT

Title: {title}
Description: {description}
Keywords: {keywords}

## CURRENT STATE

Status: {status}
Iteration: {iteration} of {max_iterations}
Retries: {retries} of {max_retries}
Search plan: {plan}
Search results: {results} ({high_quality} high quality)
Extracted pages: {extracted} ({substantial} substantial)
Analysis: {has_analysis}
Features: {features}
Competitors: {competitors}
Confidence: {confidence:.2}
Quality score: {quality_score:.1}
Known gaps: {gaps}

## THRESHOLDS

Minimum search results: {min_results} (or {min_hq} high quality)
Minimum extractions: {min_extractions} (or {min_substantial} substantial)
Minimum features: {min_features}
Minimum competitors: {min_competitors}
Minimum confidence: {min_confidence:.2}

Decide the next stage."#,
        title = state.title,
        description = state.description,
        keywords = state.keywords.join(", "),
        status = state.status,
        iteration = state.iterations_used,
        max_iterations = max_iterations,
        retries = state.retry_count,
        max_retries = state.max_retries,
        plan = if state.search_plan.is_some() { "ready" } else { "missing" },
        results = state.search_results.len(),
        high_quality = state.high_quality_result_count(),
        extracted = state.extracted_content.len(),
        substantial = state.substantial_extraction_count(),
        has_analysis = if analysis.is_some() { "available" } else { "none" },
        features = features,
        competitors = competitors,
        confidence = confidence,
        quality_score = quality_score,
        gaps = if gaps.is_empty() { "none" } else { gaps.as_str() },
        min_results = thresholds.min_search_results,
        min_hq = thresholds.min_high_quality_results,
        min_extractions = thresholds.min_extractions,
        min_substantial = thresholds.min_substantial_extractions,
        min_features = thresholds.min_features,
        min_competitors = thresholds.min_competitors,
        min_confidence = thresholds.min_confidence,
    );

    StagePrompt::new(SUPERVISOR_SYSTEM_PROMPT, user)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_carries_counters() {
        let mut state = ResearchState::new("p", "Acme CRM", "CRM market", vec!["crm".into()]);
        state.iterations_used = 4;
        let prompt = build_supervisor_prompt(&state, &QualityThresholds::default(), 20);
        assert!(prompt.system.contains("nextAgent"));
        assert!(prompt.user.contains("Acme CRM"));
        assert!(prompt.user.contains("Iteration: 4 of 20"));
        assert!(prompt.user.contains("Search plan: missing"));
        assert!(prompt.user.contains("Minimum search results: 15"));
    }
}
