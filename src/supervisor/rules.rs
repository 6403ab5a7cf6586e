//! Deterministic decision rules.
//!
//! A total function of the status and the coverage counters: advance when
//! the current stage cleared its threshold, otherwise repeat it.

use super::{Decision, DecisionSource};
use crate::quality::QualityThresholds;
use crate::research::{AgentKind, ResearchState, ResearchStatus};

/// Whether dispatching `agent` from `status` is possible: either a re-run of
/// the current stage, an edge of the status graph, or `done` from
/// `reporting`.
pub fn is_admissible(status: ResearchStatus, agent: AgentKind) -> bool {
    if status.is_terminal() {
        return agent == AgentKind::Done;
    }
    match agent {
        AgentKind::Done => status == ResearchStatus::Reporting,
        _ => {
            let target = agent.status();
            target == status || status.can_transition_to(target)
        }
    }
}

fn decision(next_agent: AgentKind, reason: String, instructions: &str) -> Decision {
    Decision {
        next_agent,
        should_continue: next_agent != AgentKind::Done,
        reason,
        instructions: instructions.to_string(),
        source: DecisionSource::Rules,
    }
}

/// Rule-based decision for `state`.
pub fn rule_decision(state: &ResearchState, thresholds: &QualityThresholds) -> Decision {
    let t = thresholds;

    match state.status {
        ResearchStatus::Pending => decision(
            AgentKind::Planner,
            "Research has not started; building a search plan".to_string(),
            "Create a search plan covering every coverage dimension",
        ),

        ResearchStatus::Planning => {
            if state.search_plan.is_some() {
                decision(
                    AgentKind::Searcher,
                    "Search plan is ready".to_string(),
                    "Execute the planned queries",
                )
            } else {
                decision(
                    AgentKind::Planner,
                    "No search plan yet".to_string(),
                    "Create a search plan covering every coverage dimension",
                )
            }
        }

        ResearchStatus::Searching => {
            let total = state.search_results.len();
            let high_quality = state.high_quality_result_count();
            if total >= t.min_search_results || high_quality >= t.min_high_quality_results {
                decision(
                    AgentKind::Extractor,
                    format!(
                        "Collected {} search results ({} high quality)",
                        total, high_quality
                    ),
                    "Extract content from the highest quality results",
                )
            } else {
                decision(
                    AgentKind::Searcher,
                    format!(
                        "Only {} of {} search results ({} of {} high quality)",
                        total, t.min_search_results, high_quality, t.min_high_quality_results
                    ),
                    "Run additional queries to broaden coverage",
                )
            }
        }

        ResearchStatus::Extracting => {
            let total = state.extracted_content.len();
            let substantial = state.substantial_extraction_count();
            if total >= t.min_extractions || substantial >= t.min_substantial_extractions {
                decision(
                    AgentKind::Analyzer,
                    format!(
                        "Extracted {} pages ({} substantial)",
                        total, substantial
                    ),
                    "Analyze the extracted content",
                )
            } else if state.unextracted_results().next().is_none() {
                decision(
                    AgentKind::Searcher,
                    format!(
                        "Only {} of {} extractions and no unextracted results left",
                        total, t.min_extractions
                    ),
                    "Find more sources to extract",
                )
            } else {
                decision(
                    AgentKind::Extractor,
                    format!("Only {} of {} extractions", total, t.min_extractions),
                    "Extract more of the remaining results",
                )
            }
        }

        ResearchStatus::Analyzing => match &state.analysis {
            None => decision(
                AgentKind::Analyzer,
                "No analysis yet".to_string(),
                "Analyze the extracted content",
            ),
            Some(analysis) => {
                let features = analysis.features.len();
                let competitors = analysis.competitors.len();
                let confidence = analysis.confidence_score;
                let thresholds_met = features >= t.min_features
                    && competitors >= t.min_competitors
                    && confidence >= t.min_confidence;
                let assessed_complete = state
                    .data_quality
                    .as_ref()
                    .is_some_and(|q| q.is_complete);

                if thresholds_met || assessed_complete {
                    decision(
                        AgentKind::Reporter,
                        format!(
                            "Analysis sufficient: {} features, {} competitors, confidence {:.2}",
                            features, competitors, confidence
                        ),
                        "Write the final report",
                    )
                } else {
                    decision(
                        AgentKind::Analyzer,
                        format!(
                            "Analysis insufficient: {}/{} features, {}/{} competitors, confidence {:.2}/{:.2}",
                            features,
                            t.min_features,
                            competitors,
                            t.min_competitors,
                            confidence,
                            t.min_confidence
                        ),
                        "Deepen the analysis and fill the known gaps",
                    )
                }
            }
        },

        ResearchStatus::Reporting => decision(
            AgentKind::Done,
            "Report stage finished".to_string(),
            "",
        ),

        ResearchStatus::Completed | ResearchStatus::Failed | ResearchStatus::Cancelled => {
            decision(
                AgentKind::Done,
                format!("Research is {}", state.status),
                "",
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::{Analysis, Competitor, ExtractedContent, Feature, SearchPlan, SearchResult};
    use chrono::Utc;

    fn state(status: ResearchStatus) -> ResearchState {
        let mut s = ResearchState::new("p", "Acme", "", vec![]);
        s.status = status;
        s
    }

    fn hit(i: usize, quality: f64) -> SearchResult {
        SearchResult {
            url: format!("https://example.com/{}", i),
            title: String::new(),
            snippet: String::new(),
            source: "test".to_string(),
            quality_score: quality,
            query: "q".to_string(),
            retrieved_at: Utc::now(),
        }
    }

    fn page(i: usize, len: usize) -> ExtractedContent {
        ExtractedContent {
            url: format!("https://example.com/{}", i),
            title: String::new(),
            content: "x".repeat(len),
            content_length: len,
            quality_score: 0.5,
            extracted_at: Utc::now(),
        }
    }

    fn analysis(features: usize, competitors: usize, confidence: f64) -> Analysis {
        Analysis {
            features: vec![Feature::default(); features],
            competitors: vec![Competitor::default(); competitors],
            confidence_score: confidence,
            ..Analysis::default()
        }
    }

    #[test]
    fn test_pending_goes_to_planner() {
        let d = rule_decision(&state(ResearchStatus::Pending), &QualityThresholds::default());
        assert_eq!(d.next_agent, AgentKind::Planner);
        assert!(d.should_continue);
        assert_eq!(d.source, DecisionSource::Rules);
    }

    #[test]
    fn test_planning_waits_for_plan() {
        let t = QualityThresholds::default();
        let mut s = state(ResearchStatus::Planning);
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Planner);
        s.search_plan = Some(SearchPlan {
            queries: vec![],
            focus_areas: vec![],
            created_at: Utc::now(),
        });
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Searcher);
    }

    #[test]
    fn test_searching_with_enough_results_goes_to_extractor() {
        let mut s = state(ResearchStatus::Searching);
        s.search_results = (0..20).map(|i| hit(i, 0.1)).collect();
        let d = rule_decision(&s, &QualityThresholds::default());
        assert_eq!(d.next_agent, AgentKind::Extractor);
        assert!(d.should_continue);
    }

    #[test]
    fn test_searching_high_quality_shortcut() {
        let mut s = state(ResearchStatus::Searching);
        s.search_results = (0..5).map(|i| hit(i, 0.9)).collect();
        assert_eq!(
            rule_decision(&s, &QualityThresholds::default()).next_agent,
            AgentKind::Extractor
        );
        s.search_results = (0..5).map(|i| hit(i, 0.5)).collect();
        assert_eq!(
            rule_decision(&s, &QualityThresholds::default()).next_agent,
            AgentKind::Searcher
        );
    }

    #[test]
    fn test_extracting_paths() {
        let t = QualityThresholds::default();
        let mut s = state(ResearchStatus::Extracting);
        s.search_results = (0..4).map(|i| hit(i, 0.5)).collect();
        s.extracted_content = vec![page(0, 100)];
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Extractor);

        s.extracted_content = (0..4).map(|i| page(i, 100)).collect();
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Searcher);

        s.extracted_content = (0..5).map(|i| page(i, 900)).collect();
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Analyzer);
    }

    #[test]
    fn test_analyzing_insufficient_repeats_analyzer() {
        let t = QualityThresholds::default()
            .with_min_features(3)
            .with_min_competitors(2);
        let mut s = state(ResearchStatus::Analyzing);
        s.analysis = Some(analysis(1, 1, 0.3));
        let d = rule_decision(&s, &t);
        assert_eq!(d.next_agent, AgentKind::Analyzer);
        assert!(d.should_continue);
    }

    #[test]
    fn test_analyzing_sufficient_goes_to_reporter() {
        let t = QualityThresholds::default()
            .with_min_features(3)
            .with_min_competitors(2);
        let mut s = state(ResearchStatus::Analyzing);
        s.analysis = Some(analysis(3, 2, 0.8));
        assert_eq!(rule_decision(&s, &t).next_agent, AgentKind::Reporter);
    }

    #[test]
    fn test_reporting_is_done() {
        let d = rule_decision(&state(ResearchStatus::Reporting), &QualityThresholds::default());
        assert_eq!(d.next_agent, AgentKind::Done);
        assert!(!d.should_continue);
    }

    #[test]
    fn test_terminal_is_done() {
        for status in [
            ResearchStatus::Completed,
            ResearchStatus::Failed,
            ResearchStatus::Cancelled,
        ] {
            let d = rule_decision(&state(status), &QualityThresholds::default());
            assert_eq!(d.next_agent, AgentKind::Done);
            assert!(!d.should_continue);
        }
    }

    #[test]
    fn test_rule_decisions_are_always_admissible() {
        let t = QualityThresholds::default();
        for status in [
            ResearchStatus::Pending,
            ResearchStatus::Planning,
            ResearchStatus::Searching,
            ResearchStatus::Extracting,
            ResearchStatus::Analyzing,
            ResearchStatus::Reporting,
        ] {
            let d = rule_decision(&state(status), &t);
            assert!(is_admissible(status, d.next_agent), "{}", status);
        }
    }

    #[test]
    fn test_admissibility() {
        assert!(is_admissible(ResearchStatus::Searching, AgentKind::Searcher));
        assert!(is_admissible(ResearchStatus::Extracting, AgentKind::Extractor));
        assert!(is_admissible(ResearchStatus::Analyzing, AgentKind::Searcher));
        assert!(!is_admissible(ResearchStatus::Searching, AgentKind::Reporter));
        assert!(!is_admissible(ResearchStatus::Analyzing, AgentKind::Done));
        assert!(!is_admissible(ResearchStatus::Pending, AgentKind::Searcher));
    }
}
