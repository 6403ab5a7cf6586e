//! Reporter - synthesizes the final structured report.
//!
//! The report body is assembled deterministically from the analysis; only
//! the executive summary is written by the model when one is configured,
//! with a plain-text fallback when it is not or the call fails.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use super::{StageContext, StageOutcome, StatePatch, StageWorker};
use crate::llm::{generate_with_retry, GenerationOptions, TextGenerationClient};
use crate::prompts::build_summary_prompt;
use crate::research::{AgentKind, Analysis, ResearchReport, ResearchState};

/// Names listed per finding before truncating with a count.
const NAMES_PER_FINDING: usize = 5;

/// Builds the [`ResearchReport`] once analysis is available.
pub struct ReportWorker {
    llm: Option<Arc<dyn TextGenerationClient>>,
    options: GenerationOptions,
}

impl Default for ReportWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportWorker {
    pub fn new() -> Self {
        Self {
            llm: None,
            options: GenerationOptions::new().with_temperature(0.3).with_max_tokens(600),
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn TextGenerationClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Headline findings derived from the analysis and evidence counts.
    pub fn key_findings(state: &ResearchState, analysis: &Analysis) -> Vec<String> {
        let mut findings = Vec::new();

        if !analysis.features.is_empty() {
            let names: Vec<&str> = analysis.features.iter().map(|f| f.name.as_str()).collect();
            findings.push(format!(
                "{} features identified: {}",
                names.len(),
                list_names(&names)
            ));
        }
        if !analysis.competitors.is_empty() {
            let names: Vec<&str> = analysis.competitors.iter().map(|c| c.name.as_str()).collect();
            findings.push(format!(
                "{} competitors identified: {}",
                names.len(),
                list_names(&names)
            ));
        }
        if !analysis.use_cases.is_empty() {
            let names: Vec<&str> = analysis.use_cases.iter().map(String::as_str).collect();
            findings.push(format!("Primary use cases: {}", list_names(&names)));
        }
        if let Some(size) = analysis.market_data.market_size.as_deref().filter(|s| !s.trim().is_empty()) {
            findings.push(format!("Estimated market size: {}", size));
        }
        if let Some(rate) = analysis.market_data.growth_rate.as_deref().filter(|s| !s.trim().is_empty()) {
            findings.push(format!("Market growth rate: {}", rate));
        }
        findings.push(format!(
            "Based on {} extracted sources from {} search results",
            state.extracted_content.len(),
            state.search_results.len()
        ));
        findings
    }

    /// Recommendations from SWOT opportunities, threats and open gaps.
    pub fn recommendations(analysis: &Analysis, data_gaps: &[String]) -> Vec<String> {
        let mut recommendations: Vec<String> = analysis
            .swot
            .opportunities
            .iter()
            .map(|o| format!("Pursue opportunity: {}", o))
            .collect();
        recommendations.extend(
            analysis
                .swot
                .threats
                .iter()
                .map(|t| format!("Mitigate threat: {}", t)),
        );
        recommendations.extend(
            data_gaps
                .iter()
                .map(|g| format!("Investigate further: {}", g)),
        );
        recommendations
    }

    fn fallback_summary(title: &str, findings: &[String]) -> String {
        let mut summary = format!("{}.", title);
        for finding in findings.iter().take(3) {
            summary.push(' ');
            summary.push_str(finding);
            summary.push('.');
        }
        summary
    }

    async fn summarize(
        &self,
        state: &ResearchState,
        ctx: &StageContext,
        title: &str,
        findings: &[String],
    ) -> String {
        let Some(llm) = &self.llm else {
            return Self::fallback_summary(title, findings);
        };
        if ctx.is_cancelled() {
            return Self::fallback_summary(title, findings);
        }

        let prompt = build_summary_prompt(title, findings);
        match generate_with_retry(
            llm.as_ref(),
            &prompt.user,
            Some(prompt.system.as_str()),
            &self.options,
            ctx.config.timeouts.analysis,
            &ctx.config.retry_policy,
        )
        .await
        {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => Self::fallback_summary(title, findings),
            Err(e) => {
                tracing::warn!(project_id = %state.project_id, error = %e, "Summary generation failed, using fallback");
                Self::fallback_summary(title, findings)
            }
        }
    }
}

#[async_trait]
impl StageWorker for ReportWorker {
    fn agent(&self) -> AgentKind {
        AgentKind::Reporter
    }

    async fn run(&self, state: &ResearchState, ctx: &StageContext) -> StageOutcome {
        if ctx.is_cancelled() {
            return StageOutcome::cancelled(StatePatch::default());
        }

        let Some(analysis) = &state.analysis else {
            return StageOutcome::failure("no analysis available");
        };

        let title = if state.title.trim().is_empty() {
            "Market Research Report".to_string()
        } else {
            format!("{} Market Research Report", state.title.trim())
        };

        let mut data_gaps = analysis.data_gaps.clone();
        if let Some(quality) = &state.data_quality {
            for gap in &quality.data_gaps {
                if !data_gaps.contains(gap) {
                    data_gaps.push(gap.clone());
                }
            }
        }

        let key_findings = Self::key_findings(state, analysis);
        let summary = self.summarize(state, ctx, &title, &key_findings).await;

        let report = ResearchReport {
            title,
            summary,
            recommendations: Self::recommendations(analysis, &data_gaps),
            key_findings,
            features: analysis.features.clone(),
            competitors: analysis.competitors.clone(),
            swot: analysis.swot.clone(),
            market_data: analysis.market_data.clone(),
            data_gaps,
            citations: state.citations.clone(),
            confidence_score: analysis.confidence_score,
            generated_at: Utc::now(),
        };

        tracing::info!(
            project_id = %state.project_id,
            findings = report.key_findings.len(),
            citations = report.citations.len(),
            "Report generated"
        );

        StageOutcome::success(
            format!("report generated with {} findings", report.key_findings.len()),
            StatePatch {
                report: Some(report),
                current_step: Some("report ready".to_string()),
                ..StatePatch::default()
            },
        )
    }
}

fn list_names(names: &[&str]) -> String {
    if names.len() <= NAMES_PER_FINDING {
        names.join(", ")
    } else {
        format!(
            "{} and {} more",
            names[..NAMES_PER_FINDING].join(", "),
            names.len() - NAMES_PER_FINDING
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::mock::MockLlmClient;
    use crate::llm::RetryPolicy;
    use crate::pipeline::config::ResearchConfig;
    use crate::research::{Competitor, Feature, MarketData, Swot};

    fn ctx() -> StageContext {
        let config = ResearchConfig::default().with_retry_policy(RetryPolicy::none());
        StageContext::new(Arc::new(config), Default::default())
    }

    fn analysed_state() -> ResearchState {
        let mut state = ResearchState::new("p", "Acme CRM", "", vec![]);
        state.analysis = Some(Analysis {
            features: (0..7)
                .map(|i| Feature {
                    name: format!("F{}", i),
                    description: String::new(),
                })
                .collect(),
            competitors: vec![Competitor {
                name: "Rival".to_string(),
                ..Competitor::default()
            }],
            swot: Swot {
                opportunities: vec!["SMB market".to_string()],
                threats: vec!["Price war".to_string()],
                ..Swot::default()
            },
            market_data: MarketData {
                market_size: Some("$5B".to_string()),
                growth_rate: None,
                notes: vec![],
            },
            confidence_score: 0.75,
            data_gaps: vec!["pricing".to_string()],
            ..Analysis::default()
        });
        state
    }

    #[tokio::test]
    async fn test_no_analysis_available() {
        let state = ResearchState::new("p", "", "", vec![]);
        let outcome = ReportWorker::new().run(&state, &ctx()).await;
        assert!(!outcome.success);
        assert!(outcome.summary.contains("no analysis available"));
        assert!(outcome.patch.report.is_none());
    }

    #[tokio::test]
    async fn test_report_without_model_uses_fallback_summary() {
        let outcome = ReportWorker::new().run(&analysed_state(), &ctx()).await;

        assert!(outcome.success);
        let report = outcome.patch.report.expect("report");
        assert_eq!(report.title, "Acme CRM Market Research Report");
        assert!(report.summary.starts_with("Acme CRM Market Research Report."));
        assert_eq!(report.key_findings[0], "7 features identified: F0, F1, F2, F3, F4 and 2 more");
        assert!(report.key_findings.iter().any(|f| f.contains("$5B")));
        assert_eq!(
            report.recommendations,
            vec![
                "Pursue opportunity: SMB market".to_string(),
                "Mitigate threat: Price war".to_string(),
                "Investigate further: pricing".to_string(),
            ]
        );
        assert_eq!(report.confidence_score, 0.75);
    }

    #[tokio::test]
    async fn test_model_summary_is_used() {
        let llm = Arc::new(MockLlmClient::replying("  Acme leads the SMB segment.  "));
        let outcome = ReportWorker::new()
            .with_llm(llm)
            .run(&analysed_state(), &ctx())
            .await;
        let report = outcome.patch.report.expect("report");
        assert_eq!(report.summary, "Acme leads the SMB segment.");
    }

    #[tokio::test]
    async fn test_model_failure_falls_back() {
        let llm = Arc::new(MockLlmClient::new(vec![Err(LlmError::EmptyResponse)]));
        let outcome = ReportWorker::new()
            .with_llm(llm)
            .run(&analysed_state(), &ctx())
            .await;
        assert!(outcome.success);
        let report = outcome.patch.report.expect("report");
        assert!(report.summary.starts_with("Acme CRM Market Research Report."));
    }

    #[tokio::test]
    async fn test_quality_gaps_are_merged() {
        let mut state = analysed_state();
        state.data_quality = Some(crate::research::DataQuality {
            score: 40.0,
            is_complete: false,
            reliability: 1.0,
            issues: vec![],
            data_gaps: vec!["pricing".to_string(), "market growth rate".to_string()],
            assessed_at: Utc::now(),
        });
        let report = ReportWorker::new()
            .run(&state, &ctx())
            .await
            .patch
            .report
            .expect("report");
        assert_eq!(
            report.data_gaps,
            vec!["pricing".to_string(), "market growth rate".to_string()]
        );
    }
}
