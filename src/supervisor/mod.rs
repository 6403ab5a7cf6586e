//! Decision engine choosing the next pipeline stage.
//!
//! [`Supervisor::decide`] never fails: LLM-assisted decisions that time out,
//! error, or cannot be parsed fall back to [`rule_decision`] for the same
//! state. The supervisor only reads state snapshots.

pub mod parse;
pub mod rules;

use std::sync::Arc;
use std::time::Duration;

use crate::llm::{generate_with_retry, GenerationOptions, RetryPolicy, TextGenerationClient};
use crate::pipeline::config::{ResearchConfig, SupervisorMode};
use crate::progress::ProgressSink;
use crate::prompts::build_supervisor_prompt;
use crate::quality::QualityThresholds;
use crate::research::{AgentKind, ProgressDetail, ResearchState};

pub use parse::{is_truthy, parse_decision, DecisionParse, ParseFailure, ParsedDecision};
pub use rules::{is_admissible, rule_decision};

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionSource {
    /// Rule-based mode.
    Rules,
    /// Parsed from the model's reply.
    Llm,
    /// The model was consulted but its answer was unusable.
    Fallback,
}

/// The supervisor's instruction to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub next_agent: AgentKind,
    pub reason: String,
    pub instructions: String,
    pub should_continue: bool,
    pub source: DecisionSource,
}

impl From<ParsedDecision> for Decision {
    fn from(parsed: ParsedDecision) -> Self {
        Self {
            next_agent: parsed.next_agent,
            reason: parsed.reason,
            instructions: parsed.instructions,
            should_continue: parsed.should_continue,
            source: DecisionSource::Llm,
        }
    }
}

/// Picks the next stage for a research run.
pub struct Supervisor {
    mode: SupervisorMode,
    client: Option<Arc<dyn TextGenerationClient>>,
    thresholds: QualityThresholds,
    max_iterations: u32,
    timeout: Duration,
    retry_policy: RetryPolicy,
    options: GenerationOptions,
    progress_sink: Option<Arc<dyn ProgressSink>>,
}

impl Supervisor {
    /// A supervisor that only applies the rules.
    pub fn rule_based(thresholds: QualityThresholds) -> Self {
        let defaults = ResearchConfig::default();
        Self {
            mode: SupervisorMode::RuleBased,
            client: None,
            thresholds,
            max_iterations: defaults.max_iterations,
            timeout: defaults.timeouts.decision,
            retry_policy: defaults.retry_policy,
            options: GenerationOptions::new().with_temperature(0.2),
            progress_sink: None,
        }
    }

    /// Builds a supervisor from configuration.
    ///
    /// LLM-assisted mode without a client degrades to rule-based decisions.
    pub fn from_config(
        config: &ResearchConfig,
        client: Option<Arc<dyn TextGenerationClient>>,
    ) -> Self {
        let mode = match (config.supervisor_mode, &client) {
            (SupervisorMode::LlmAssisted, None) => {
                tracing::warn!("LLM-assisted supervisor requested without a client, using rules");
                SupervisorMode::RuleBased
            }
            (mode, _) => mode,
        };
        Self {
            mode,
            client,
            thresholds: config.thresholds.clone(),
            max_iterations: config.max_iterations,
            timeout: config.timeouts.decision,
            retry_policy: config.retry_policy.clone(),
            options: GenerationOptions::new().with_temperature(0.2),
            progress_sink: None,
        }
    }

    pub fn with_generation_options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress_sink = Some(sink);
        self
    }

    pub fn mode(&self) -> SupervisorMode {
        self.mode
    }

    /// Decides the next stage for `state`. Always returns an admissible
    /// decision.
    pub async fn decide(&self, state: &ResearchState) -> Decision {
        self.notify(state, "deciding");

        let decision = match (self.mode, &self.client) {
            (SupervisorMode::LlmAssisted, Some(client)) => {
                self.llm_decision(state, client.as_ref()).await
            }
            _ => rule_decision(state, &self.thresholds),
        };

        tracing::info!(
            project_id = %state.project_id,
            status = %state.status,
            next_agent = %decision.next_agent,
            should_continue = decision.should_continue,
            source = ?decision.source,
            reason = %decision.reason,
            "Supervisor decision"
        );
        self.notify(state, "decided");
        decision
    }

    async fn llm_decision(
        &self,
        state: &ResearchState,
        client: &dyn TextGenerationClient,
    ) -> Decision {
        let prompt = build_supervisor_prompt(state, &self.thresholds, self.max_iterations);
        let reply = generate_with_retry(
            client,
            &prompt.user,
            Some(prompt.system.as_str()),
            &self.options,
            self.timeout,
            &self.retry_policy,
        )
        .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(
                    project_id = %state.project_id,
                    error = %e,
                    "Supervisor model call failed, using rule decision"
                );
                return self.fallback(state);
            }
        };

        match parse_decision(&reply) {
            DecisionParse::Parsed(parsed) if is_admissible(state.status, parsed.next_agent) => {
                parsed.into()
            }
            DecisionParse::Parsed(parsed) => {
                tracing::warn!(
                    project_id = %state.project_id,
                    status = %state.status,
                    next_agent = %parsed.next_agent,
                    "Supervisor model chose an unreachable stage, using rule decision"
                );
                self.fallback(state)
            }
            DecisionParse::Failure(failure) => {
                tracing::warn!(
                    project_id = %state.project_id,
                    failure = %failure,
                    "Could not parse supervisor reply, using rule decision"
                );
                self.fallback(state)
            }
        }
    }

    fn fallback(&self, state: &ResearchState) -> Decision {
        Decision {
            source: DecisionSource::Fallback,
            ..rule_decision(state, &self.thresholds)
        }
    }

    fn notify(&self, state: &ResearchState, step: &str) {
        if let Some(sink) = &self.progress_sink {
            let detail = ProgressDetail {
                stage: "supervisor".to_string(),
                step: step.to_string(),
                total_items: 1,
                completed_items: usize::from(step == "decided"),
                current_item: Some(state.status.to_string()),
            };
            sink.update(&state.project_id, &detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::progress::ChannelProgressSink;
    use crate::research::{ResearchStatus, SearchResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Mock text-generation client replaying canned replies.
    struct MockClient {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        call_count: AtomicUsize,
    }

    impl MockClient {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
            }
        }

        fn replying(text: &str) -> Self {
            Self::new(vec![Ok(text.to_string())])
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TextGenerationClient for MockClient {
        async fn generate(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
            _options: &GenerationOptions,
        ) -> Result<String, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().expect("lock poisoned");
            if responses.is_empty() {
                return Err(LlmError::EmptyResponse);
            }
            if idx < responses.len() {
                std::mem::replace(&mut responses[idx], Err(LlmError::EmptyResponse))
            } else {
                Err(LlmError::EmptyResponse)
            }
        }
    }

    /// Never answers within the timeout.
    struct SlowClient;

    #[async_trait]
    impl TextGenerationClient for SlowClient {
        async fn generate(
            &self,
            _prompt: &str,
            _system_prompt: Option<&str>,
            _options: &GenerationOptions,
        ) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(r#"{"nextAgent": "planner"}"#.to_string())
        }
    }

    fn llm_supervisor(client: Arc<dyn TextGenerationClient>) -> Supervisor {
        let config = ResearchConfig::default()
            .with_supervisor_mode(SupervisorMode::LlmAssisted)
            .with_retry_policy(RetryPolicy::new(2, Duration::ZERO));
        Supervisor::from_config(&config, Some(client))
    }

    fn searching_state(results: usize) -> ResearchState {
        let mut s = ResearchState::new("p", "Acme", "", vec![]);
        s.status = ResearchStatus::Searching;
        s.search_results = (0..results)
            .map(|i| SearchResult {
                url: format!("https://example.com/{}", i),
                title: String::new(),
                snippet: String::new(),
                source: "test".to_string(),
                quality_score: 0.2,
                query: "q".to_string(),
                retrieved_at: Utc::now(),
            })
            .collect();
        s
    }

    fn same_as_rules(d: &Decision, state: &ResearchState) {
        let rules = rule_decision(state, &QualityThresholds::default());
        assert_eq!(d.next_agent, rules.next_agent);
        assert_eq!(d.should_continue, rules.should_continue);
        assert_eq!(d.reason, rules.reason);
        assert_eq!(d.source, DecisionSource::Fallback);
    }

    #[tokio::test]
    async fn test_rule_based_decide() {
        let sup = Supervisor::rule_based(QualityThresholds::default());
        let d = sup.decide(&searching_state(20)).await;
        assert_eq!(d.next_agent, AgentKind::Extractor);
        assert!(d.should_continue);
        assert_eq!(d.source, DecisionSource::Rules);
    }

    #[tokio::test]
    async fn test_llm_decision_is_used() {
        let client = Arc::new(MockClient::replying(
            r#"{"nextAgent": "searcher", "reason": "broaden", "instructions": "more"}"#,
        ));
        let sup = llm_supervisor(client.clone());
        let d = sup.decide(&searching_state(20)).await;
        assert_eq!(d.next_agent, AgentKind::Searcher);
        assert_eq!(d.reason, "broaden");
        assert_eq!(d.source, DecisionSource::Llm);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_agent_falls_back_to_rules() {
        let state = searching_state(20);
        for reply in [
            r#"{"nextAgent": "writer"}"#,
            r#"{"reason": "no agent"}"#,
            r#"{"nextAgent": ""}"#,
            "I am not sure what to do",
        ] {
            let sup = llm_supervisor(Arc::new(MockClient::replying(reply)));
            let d = sup.decide(&state).await;
            same_as_rules(&d, &state);
        }
    }

    #[tokio::test]
    async fn test_unreachable_agent_falls_back() {
        let state = searching_state(3);
        let sup = llm_supervisor(Arc::new(MockClient::replying(r#"{"nextAgent": "reporter"}"#)));
        same_as_rules(&sup.decide(&state).await, &state);

        let sup = llm_supervisor(Arc::new(MockClient::replying(r#"{"nextAgent": "done"}"#)));
        same_as_rules(&sup.decide(&state).await, &state);
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let client = Arc::new(MockClient::new(vec![
            Err(LlmError::RateLimited("slow down".to_string())),
            Ok(r#"{"nextAgent": "extractor"}"#.to_string()),
        ]));
        let sup = llm_supervisor(client.clone());
        let d = sup.decide(&searching_state(20)).await;
        assert_eq!(d.next_agent, AgentKind::Extractor);
        assert_eq!(d.source, DecisionSource::Llm);
        assert_eq!(client.calls(), 2);
    }

    #[tokio::test]
    async fn test_api_error_falls_back() {
        let client = Arc::new(MockClient::new(vec![Err(LlmError::ApiError {
            code: 400,
            message: "bad request".to_string(),
        })]));
        let sup = llm_supervisor(client.clone());
        let state = searching_state(2);
        same_as_rules(&sup.decide(&state).await, &state);
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let mut config = ResearchConfig::default()
            .with_supervisor_mode(SupervisorMode::LlmAssisted)
            .with_retry_policy(RetryPolicy::none());
        config.timeouts.decision = Duration::from_millis(20);
        let sup = Supervisor::from_config(&config, Some(Arc::new(SlowClient)));
        let state = searching_state(2);
        same_as_rules(&sup.decide(&state).await, &state);
    }

    #[tokio::test]
    async fn test_llm_mode_without_client_uses_rules() {
        let config = ResearchConfig::default().with_supervisor_mode(SupervisorMode::LlmAssisted);
        let sup = Supervisor::from_config(&config, None);
        assert_eq!(sup.mode(), SupervisorMode::RuleBased);
        let d = sup.decide(&searching_state(0)).await;
        assert_eq!(d.source, DecisionSource::Rules);
    }

    #[tokio::test]
    async fn test_decide_notifies_sink() {
        let (sink, mut rx) = ChannelProgressSink::channel(8);
        let sup = Supervisor::rule_based(QualityThresholds::default()).with_progress_sink(Arc::new(sink));
        sup.decide(&searching_state(0)).await;
        let first = rx.recv().await.expect("deciding event");
        assert_eq!(first.detail.stage, "supervisor");
        assert_eq!(first.detail.step, "deciding");
        let second = rx.recv().await.expect("decided event");
        assert_eq!(second.detail.step, "decided");
    }
}
