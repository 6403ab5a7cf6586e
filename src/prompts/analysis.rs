//! Prompts for the analysis, planning and report stages.

use super::StagePrompt;
use crate::research::{ExtractedContent, ResearchState};

/// Upper bound on characters of page content sent per source.
pub const MAX_SOURCE_CHARS: usize = 4000;

const ANALYSIS_SYSTEM_PROMPT: &str = r#"You are a product and market analyst. From the source material provided,
extract structured findings about the product or market under research.

Only report what the sources support. List anything you could not establish
under "dataGaps".

## OUTPUT FORMAT

Output a JSON object:
{
  "features": [{"name": "...", "description": "..."}],
  "competitors": [{"name": "...", "description": "...", "url": "..."}],
  "useCases": ["..."],
  "techStack": ["..."],
  "swot": {"strengths": [], "weaknesses": [], "opportunities": [], "threats": []},
  "marketData": {"marketSize": "...", "growthRate": "...", "notes": []},
  "confidenceScore": 0.0,
  "dataGaps": ["..."]
}

"confidenceScore" is your confidence in the findings, between 0.0 and 1.0.
Output ONLY the JSON object. No additional text."#;

const PLANNING_SYSTEM_PROMPT: &str = r#"You plan web research for a market and product study.
Propose focused search queries that cover features, competitors, use cases,
technology stack and market size.

## OUTPUT FORMAT

Output a JSON object:
{
  "queries": [{"query": "...", "purpose": "...", "dimension": "features|competitors|use_cases|tech_stack|market|general"}],
  "focusAreas": ["..."]
}

Output ONLY the JSON object. No additional text."#;

const SUMMARY_SYSTEM_PROMPT: &str = r#"You write the executive summary of a market research report.
Write two or three plain sentences grounded in the findings provided.
Output only the summary text."#;

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Builds the analysis prompt over the extracted sources.
pub fn build_analysis_prompt(state: &ResearchState, sources: &[&ExtractedContent]) -> StagePrompt {
    let mut user = format!(
        "## RESEARCH SUBJECT\n\nTitle: {}\nDescription: {}\nKeywords: {}\n\n## SOURCES\n",
        state.title,
        state.description,
        state.keywords.join(", ")
    );

    for (i, source) in sources.iter().enumerate() {
        user.push_str(&format!(
            "\n### Source {} - {}\nURL: {}\n\n{}\n",
            i + 1,
            source.title,
            source.url,
            truncate_chars(&source.content, MAX_SOURCE_CHARS)
        ));
    }

    if let Some(quality) = &state.data_quality {
        if !quality.data_gaps.is_empty() {
            user.push_str("\n## KNOWN GAPS\n\n");
            for gap in &quality.data_gaps {
                user.push_str(&format!("- {}\n", gap));
            }
        }
    }

    StagePrompt::new(ANALYSIS_SYSTEM_PROMPT, user)
}

/// Builds the prompt asking for extra plan queries.
pub fn build_planning_prompt(state: &ResearchState) -> StagePrompt {
    let user = format!(
        "Title: {}\nDescription: {}\nKeywords: {}\n\nPropose up to 8 search queries.",
        state.title,
        state.description,
        state.keywords.join(", ")
    );
    StagePrompt::new(PLANNING_SYSTEM_PROMPT, user)
}

/// Builds the executive-summary prompt from the key findings.
pub fn build_summary_prompt(title: &str, findings: &[String]) -> StagePrompt {
    let mut user = format!("Report: {}\n\nKey findings:\n", title);
    for finding in findings {
        user.push_str(&format!("- {}\n", finding));
    }
    StagePrompt::new(SUMMARY_SYSTEM_PROMPT, user)
}
