//! Pipeline driver
//!
//! Sequences the three stages, carries stage outputs forward, decides
//! skip/degrade, aggregates results, and emits stream events. The only
//! top-level refusal is the structured service-unavailable payload.

use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use quorum_cache::{CachedRun, ResultCache, compute_cache_key};
use quorum_config::{Config, OrchestratorConfig, SynthesisConfig};
use quorum_core::{CorrelationId, ProviderId, canonical_model, sanitize_models, with_correlation};
use quorum_limits::{FallbackManager, RateLimiter};
use quorum_llm::{LlmError, LlmGateway, MeteredGeneration};
use quorum_selection::{ModelSelector, QueryType, detect_query_type};
use serde::Serialize;

use crate::error::OrchestratorError;
use crate::events::{EventBus, EventName};
use crate::executor::{StageContext, run_group};
use crate::prompts;
use crate::retry::RetryHandler;
use crate::types::{
    FallbackSuggestion, InitialStage, ModelFailure, PeerReviewStage, PerformanceMetrics,
    PipelineOutcome, PipelineResult, ServiceUnavailable, StageName, StageOutput, StageRecord,
    SynthesisStage, SynthesisStrategy, UnavailableDetails,
};

/// Reason recorded when peer review is skipped for lack of models
const PEER_REVIEW_SKIP_REASON: &str = "Insufficient models for peer review";

/// Caller-supplied run options
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Explicit correlation id; inherited or generated when absent
    pub correlation_id: Option<String>,
    /// Query type override; detected from the query when absent
    pub query_type: Option<QueryType>,
    /// Emit `synthesis_chunk` events during stage 3
    pub stream_synthesis: bool,
    /// Dump run artifacts to the configured output directory
    pub save_outputs: bool,
}

/// Fields of the run that determine the cached result
#[derive(Serialize)]
struct CacheKeyParts<'a> {
    input: &'a str,
    models: Vec<&'a str>,
    query_type: Option<QueryType>,
}

/// The Ultra Synthesis pipeline driver
pub struct Orchestrator {
    gateway: Arc<LlmGateway>,
    limiter: RateLimiter,
    fallback: Arc<FallbackManager>,
    retry: Arc<RetryHandler>,
    selector: Option<Arc<ModelSelector>>,
    cache: Option<ResultCache>,
    events: Arc<EventBus>,
    orchestrator: OrchestratorConfig,
    synthesis: SynthesisConfig,
}

impl Orchestrator {
    /// Wire the full stack from configuration
    pub fn from_config(config: &Config) -> Result<Self, OrchestratorError> {
        let gateway = Arc::new(LlmGateway::from_config(config)?);
        let limiter = RateLimiter::from_config(&config.rate_limits);
        let fallback = Arc::new(FallbackManager::new());
        let retry = Arc::new(RetryHandler::new(config.retry.clone(), &config.detection)?);
        let selector = config
            .synthesis
            .enhanced
            .then(|| Arc::new(ModelSelector::new(Some(config.synthesis.metrics_path.clone()))));
        let cache = config
            .cache
            .enabled
            .then(|| ResultCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_seconds)));

        Ok(Self {
            gateway,
            limiter,
            fallback,
            retry,
            selector,
            cache,
            events: Arc::new(EventBus::new()),
            orchestrator: config.orchestrator.clone(),
            synthesis: config.synthesis.clone(),
        })
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn gateway(&self) -> &Arc<LlmGateway> {
        &self.gateway
    }

    pub fn selector(&self) -> Option<&Arc<ModelSelector>> {
        self.selector.as_ref()
    }

    /// Per-provider resilience counters for the health endpoint
    pub fn provider_reports(&self) -> Vec<quorum_llm::ProviderMetricsSnapshot> {
        self.gateway.metrics()
    }

    /// Cached model health observations for the health endpoint
    pub fn model_health(&self) -> Vec<quorum_llm::health::HealthStatus> {
        self.gateway.health().snapshot()
    }

    /// Selector statistics for every tracked model
    pub fn selector_stats(&self) -> Vec<quorum_selection::ModelStats> {
        self.selector
            .as_ref()
            .map(|selector| selector.all_stats())
            .unwrap_or_default()
    }

    /// Run the three-stage pipeline for one query
    pub async fn run_pipeline(
        &self,
        query: &str,
        options: &RunOptions,
        selected_models: Option<Vec<String>>,
    ) -> PipelineOutcome {
        let correlation_id = CorrelationId::resolve(options.correlation_id.as_deref());
        with_correlation(
            correlation_id.clone(),
            self.run_inner(query, options, selected_models, correlation_id.clone()),
        )
        .await
    }

    async fn run_inner(
        &self,
        query: &str,
        options: &RunOptions,
        selected_models: Option<Vec<String>>,
        correlation_id: CorrelationId,
    ) -> PipelineOutcome {
        let started = Instant::now();
        let cid = correlation_id.as_str();

        // Resolve, canonicalize, and sanitize the model list
        let requested = selected_models.unwrap_or_else(|| self.gateway.default_models());
        let canonical: Vec<String> = requested
            .iter()
            .map(|m| canonical_model(m).to_owned())
            .collect();
        let mut models = sanitize_models(&canonical);

        // Steer away from providers currently marked rate-limited
        models = self.substitute_rate_limited(models);

        // Gating: enough models, and every required provider present
        if let Err(refusal) = self.gate(&models) {
            tracing::error!(
                correlation_id = cid,
                models = models.len(),
                "pipeline refused: service unavailable"
            );
            self.events.publish(
                cid,
                EventName::PipelineError,
                serde_json::to_value(&*refusal).unwrap_or_default(),
            );
            return PipelineOutcome::Unavailable(refusal);
        }

        let query_type = self
            .synthesis
            .enhanced
            .then(|| options.query_type.unwrap_or_else(|| detect_query_type(query)));

        // Cache short-circuit
        let cache_key = self.cache.as_ref().map(|_| {
            let mut sorted: Vec<&str> = models.iter().map(String::as_str).collect();
            sorted.sort_unstable();
            compute_cache_key(&CacheKeyParts {
                input: query,
                models: sorted,
                query_type,
            })
        });

        if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref()) {
            if let Some(entry) = cache.get(key) {
                if let Ok(mut result) = serde_json::from_str::<PipelineResult>(&entry.body) {
                    tracing::info!(correlation_id = cid, "serving pipeline result from cache");
                    result.cached = true;
                    result.correlation_id = cid.to_owned();
                    self.events.publish(
                        cid,
                        EventName::PipelineStarted,
                        serde_json::json!({ "query": truncate(query, 200), "selected_models": &models, "cached": true }),
                    );
                    self.events.publish(
                        cid,
                        EventName::PipelineCompleted,
                        serde_json::json!({ "total_stages": 3, "success": result.success(), "cached": true }),
                    );
                    return PipelineOutcome::Completed(Box::new(result));
                }
            }
        }

        self.events.publish(
            cid,
            EventName::PipelineStarted,
            serde_json::json!({
                "query": truncate(query, 200),
                "selected_models": &models,
                "total_stages": 3,
            }),
        );

        let mut stages: IndexMap<String, StageRecord> = IndexMap::new();
        let mut performance = PerformanceMetrics::default();

        // -- Stage 1: initial response fan-out --

        let stage_started = Instant::now();
        let initial = self
            .stage_initial(query, &models, &correlation_id, &mut performance)
            .await;
        let initial_duration = stage_started.elapsed().as_secs_f64();

        // Two working models make peer review possible; a single one may
        // proceed in degraded mode when allowed by policy or threshold
        let successes = initial.successful_models.len();
        let can_continue = successes >= 2
            || (successes >= 1
                && (self.orchestrator.enable_single_model_fallback
                    || successes >= self.orchestrator.minimum_models_required));
        if !can_continue {
            let refusal = self.runtime_unavailable(&initial);
            self.events.publish(
                cid,
                EventName::StageError,
                serde_json::json!({ "stage": StageName::InitialResponse, "error": "insufficient_models" }),
            );
            self.events.publish(
                cid,
                EventName::PipelineError,
                serde_json::to_value(&*refusal).unwrap_or_default(),
            );
            return PipelineOutcome::Unavailable(refusal);
        }

        if successes < self.orchestrator.minimum_models_required {
            tracing::warn!(
                correlation_id = cid,
                successful = successes,
                required = self.orchestrator.minimum_models_required,
                "operating in degraded mode"
            );
        }

        // -- Stage 2: peer review and revision --

        let stage_started = Instant::now();
        let peer_review = self
            .stage_peer_review(query, &initial, &correlation_id, &mut performance)
            .await;
        let peer_review_duration = stage_started.elapsed().as_secs_f64();

        // -- Stage 3: ultra synthesis --

        let stage_started = Instant::now();
        let synthesis = self
            .stage_synthesis(query, query_type, &models, &initial, &peer_review, options, &correlation_id, &mut performance)
            .await;
        let synthesis_duration = stage_started.elapsed().as_secs_f64();

        stages.insert(
            StageName::InitialResponse.to_string(),
            StageRecord {
                output: Some(StageOutput::Initial(initial)),
                error: None,
                duration_seconds: initial_duration,
            },
        );
        stages.insert(
            StageName::PeerReviewAndRevision.to_string(),
            StageRecord {
                output: Some(StageOutput::PeerReview(peer_review)),
                error: None,
                duration_seconds: peer_review_duration,
            },
        );

        let success = match synthesis {
            Ok(stage) => {
                stages.insert(
                    StageName::UltraSynthesis.to_string(),
                    StageRecord {
                        output: Some(StageOutput::Synthesis(stage)),
                        error: None,
                        duration_seconds: synthesis_duration,
                    },
                );
                true
            }
            Err(message) => {
                stages.insert(
                    StageName::UltraSynthesis.to_string(),
                    StageRecord {
                        output: None,
                        error: Some(message),
                        duration_seconds: synthesis_duration,
                    },
                );
                false
            }
        };

        performance.total_seconds = started.elapsed().as_secs_f64();

        let result = PipelineResult {
            correlation_id: cid.to_owned(),
            stages,
            performance,
            cached: false,
        };

        if success {
            if let (Some(cache), Some(key)) = (self.cache.as_ref(), cache_key.as_deref()) {
                if let Ok(body) = serde_json::to_string(&result) {
                    cache.put(
                        key,
                        CachedRun {
                            body,
                            synthesis_model: result
                                .synthesis()
                                .map(|s| s.model_used.clone())
                                .unwrap_or_default(),
                        },
                    );
                }
            }
        }

        if options.save_outputs {
            self.save_outputs(&result);
        }

        self.events.publish(
            cid,
            EventName::PipelineCompleted,
            serde_json::json!({ "total_stages": 3, "success": success }),
        );

        PipelineOutcome::Completed(Box::new(result))
    }

    /// Replace models whose provider is marked rate-limited
    fn substitute_rate_limited(&self, models: Vec<String>) -> Vec<String> {
        let mut out = Vec::with_capacity(models.len());
        for model in models {
            let provider = ProviderId::infer(&model);
            if self.fallback.is_rate_limited(provider) {
                if let Some(substitute) = self
                    .fallback
                    .fallback_models(provider, 1)
                    .into_iter()
                    .find(|m| !out.contains(m))
                {
                    tracing::info!(model = %model, substitute = %substitute, "substituting model from rate-limited provider");
                    out.push(substitute);
                    continue;
                }
            }
            if !out.contains(&model) {
                out.push(model);
            }
        }
        out
    }

    /// Gating preconditions: minimum model count and provider coverage
    fn gate(&self, models: &[String]) -> Result<(), Box<ServiceUnavailable>> {
        let providers_present: Vec<String> = {
            let mut seen = Vec::new();
            for model in models {
                let provider = ProviderId::infer(model);
                if provider != ProviderId::Unknown {
                    let name = provider.to_string();
                    if !seen.contains(&name) {
                        seen.push(name);
                    }
                }
            }
            seen
        };

        let missing: Vec<String> = self
            .orchestrator
            .required_providers
            .iter()
            .filter(|required| !providers_present.contains(required))
            .cloned()
            .collect();

        if models.is_empty()
            || models.len() < self.orchestrator.minimum_models_required
            || !missing.is_empty()
        {
            let message = format!(
                "Insufficient healthy models. Require {}.",
                self.orchestrator.minimum_models_required
            );
            return Err(Box::new(ServiceUnavailable::new(
                message,
                UnavailableDetails {
                    models_required: self.orchestrator.minimum_models_required,
                    providers_available: providers_present.len(),
                    providers_operational: providers_present,
                    required_providers: self.orchestrator.required_providers.clone(),
                    missing_providers: missing,
                    service_status: "unavailable".to_owned(),
                },
            )));
        }

        Ok(())
    }

    /// Refusal for a runtime shortage after stage 1
    fn runtime_unavailable(&self, initial: &InitialStage) -> Box<ServiceUnavailable> {
        let operational: Vec<String> = {
            let mut seen = Vec::new();
            for model in &initial.successful_models {
                let name = ProviderId::infer(model).to_string();
                if !seen.contains(&name) {
                    seen.push(name);
                }
            }
            seen
        };
        let missing: Vec<String> = self
            .orchestrator
            .required_providers
            .iter()
            .filter(|required| !operational.contains(required))
            .cloned()
            .collect();

        let message = format!(
            "Service temporarily unavailable. Multi-model synthesis requires at least {} models; \
only {} model(s) are currently operational.",
            self.orchestrator.minimum_models_required,
            initial.successful_models.len()
        );

        Box::new(ServiceUnavailable::new(
            message,
            UnavailableDetails {
                models_required: self.orchestrator.minimum_models_required,
                providers_available: operational.len(),
                providers_operational: operational,
                required_providers: self.orchestrator.required_providers.clone(),
                missing_providers: missing,
                service_status: "degraded".to_owned(),
            },
        ))
    }

    fn stage_context(&self, correlation_id: &CorrelationId, stage: StageName, attempt_timeout: u64) -> StageContext {
        StageContext {
            gateway: Arc::clone(&self.gateway),
            limiter: self.limiter.clone(),
            retry: Arc::clone(&self.retry),
            fallback: Arc::clone(&self.fallback),
            events: Arc::clone(&self.events),
            correlation_id: correlation_id.clone(),
            stage,
            attempt_timeout: Duration::from_secs(attempt_timeout),
            group_timeout: Duration::from_secs(self.orchestrator.concurrent_execution_timeout_seconds),
            max_concurrent: self.orchestrator.max_concurrent_requests,
            emit_model_events: stage == StageName::InitialResponse,
        }
    }

    async fn stage_initial(
        &self,
        query: &str,
        models: &[String],
        correlation_id: &CorrelationId,
        performance: &mut PerformanceMetrics,
    ) -> InitialStage {
        let cid = correlation_id.as_str();
        self.events.publish(
            cid,
            EventName::StageStarted,
            serde_json::json!({ "stage": StageName::InitialResponse, "models": models }),
        );

        let ctx = self.stage_context(
            correlation_id,
            StageName::InitialResponse,
            self.orchestrator.initial_response_timeout_seconds,
        );
        let calls = models.iter().map(|m| (m.clone(), query.to_owned())).collect();
        let outcomes = run_group(&ctx, calls).await;

        let mut responses = IndexMap::new();
        let mut errors = IndexMap::new();

        for outcome in &outcomes {
            self.record_latency(performance, &outcome.model, StageName::InitialResponse, outcome.latency_ms);
            match &outcome.result {
                Ok(generation) => {
                    performance.total_cost_usd += generation.cost;
                    responses.insert(outcome.model.clone(), generation.text.clone());
                    if let Some(selector) = &self.selector {
                        selector.record_availability(&outcome.model, true);
                    }
                }
                Err(error) => {
                    errors.insert(outcome.model.clone(), self.failure_for(error));
                    if let Some(selector) = &self.selector {
                        selector.record_availability(&outcome.model, false);
                    }
                }
            }
        }

        let successful_models: Vec<String> = responses.keys().cloned().collect();
        performance.token_estimates.insert(
            "initial_combined".to_owned(),
            prompts::estimate_prompt_tokens(&responses.values().cloned().collect::<Vec<_>>().join(" ")),
        );

        tracing::info!(
            correlation_id = cid,
            successful = successful_models.len(),
            attempted = models.len(),
            "initial response stage completed"
        );

        self.events.publish(
            cid,
            EventName::StageCompleted,
            serde_json::json!({
                "stage": StageName::InitialResponse,
                "success": true,
                "successful_models": &successful_models,
            }),
        );

        InitialStage {
            prompt: query.to_owned(),
            responses,
            successful_models,
            attempted_models: models.to_vec(),
            errors,
        }
    }

    async fn stage_peer_review(
        &self,
        query: &str,
        initial: &InitialStage,
        correlation_id: &CorrelationId,
        performance: &mut PerformanceMetrics,
    ) -> PeerReviewStage {
        let cid = correlation_id.as_str();
        self.events.publish(
            cid,
            EventName::StageStarted,
            serde_json::json!({
                "stage": StageName::PeerReviewAndRevision,
                "models": &initial.successful_models,
            }),
        );

        // Peer review needs at least two working models to be meaningful
        if initial.successful_models.len() < 2 {
            tracing::warn!(
                correlation_id = cid,
                available = initial.successful_models.len(),
                "skipping peer review"
            );
            self.events.publish(
                cid,
                EventName::StageCompleted,
                serde_json::json!({
                    "stage": StageName::PeerReviewAndRevision,
                    "skipped": true,
                    "reason": PEER_REVIEW_SKIP_REASON,
                }),
            );
            return PeerReviewStage {
                original_responses: initial.responses.clone(),
                revised_responses: initial.responses.clone(),
                successful_models: initial.successful_models.clone(),
                skipped: Some(PEER_REVIEW_SKIP_REASON.to_owned()),
                revision_count: 0,
            };
        }

        let truncated = prompts::truncate_responses(&initial.responses, self.orchestrator.max_context_tokens);

        let calls: Vec<(String, String)> = initial
            .successful_models
            .iter()
            .map(|model| {
                let own = truncated.get(model).cloned().unwrap_or_default();
                let peers: IndexMap<String, String> = truncated
                    .iter()
                    .filter(|(peer, _)| *peer != model)
                    .map(|(peer, text)| (peer.clone(), text.clone()))
                    .collect();
                (model.clone(), prompts::peer_review_prompt(query, &own, &peers))
            })
            .collect();

        performance.token_estimates.insert(
            "peer_review_prompt".to_owned(),
            calls.first().map_or(0, |(_, prompt)| prompts::estimate_prompt_tokens(prompt)),
        );

        let ctx = self.stage_context(
            correlation_id,
            StageName::PeerReviewAndRevision,
            self.orchestrator.peer_review_timeout_seconds,
        );
        let outcomes = run_group(&ctx, calls).await;

        let mut revised_responses = IndexMap::new();
        let mut revision_count = 0;

        // Preserve the initial-response ordering
        for model in &initial.successful_models {
            let outcome = outcomes.iter().find(|o| &o.model == model);
            match outcome.map(|o| (&o.result, o.latency_ms)) {
                Some((Ok(generation), latency_ms)) => {
                    self.record_latency(performance, model, StageName::PeerReviewAndRevision, latency_ms);
                    performance.total_cost_usd += generation.cost;
                    revised_responses.insert(model.clone(), generation.text.clone());
                    revision_count += 1;
                }
                Some((Err(error), latency_ms)) => {
                    self.record_latency(performance, model, StageName::PeerReviewAndRevision, latency_ms);
                    tracing::warn!(
                        correlation_id = cid,
                        model = %model,
                        error = %error,
                        "revision failed, carrying original response forward"
                    );
                    if let Some(original) = initial.responses.get(model) {
                        revised_responses.insert(model.clone(), original.clone());
                    }
                }
                None => {
                    if let Some(original) = initial.responses.get(model) {
                        revised_responses.insert(model.clone(), original.clone());
                    }
                }
            }
        }

        tracing::info!(
            correlation_id = cid,
            revisions = revision_count,
            models = initial.successful_models.len(),
            "peer review stage completed"
        );

        self.events.publish(
            cid,
            EventName::StageCompleted,
            serde_json::json!({
                "stage": StageName::PeerReviewAndRevision,
                "success": true,
                "revision_count": revision_count,
            }),
        );

        PeerReviewStage {
            original_responses: initial.responses.clone(),
            successful_models: revised_responses.keys().cloned().collect(),
            revised_responses,
            skipped: None,
            revision_count,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn stage_synthesis(
        &self,
        query: &str,
        query_type: Option<QueryType>,
        models: &[String],
        initial: &InitialStage,
        peer_review: &PeerReviewStage,
        options: &RunOptions,
        correlation_id: &CorrelationId,
        performance: &mut PerformanceMetrics,
    ) -> Result<SynthesisStage, String> {
        let cid = correlation_id.as_str();
        self.events.publish(
            cid,
            EventName::StageStarted,
            serde_json::json!({ "stage": StageName::UltraSynthesis }),
        );

        let source_models: Vec<String> = peer_review.successful_models.clone();
        let peer_reviewed = peer_review.skipped.is_none();

        // Candidate pool: requested models plus configured extras, minus
        // anything unusable
        let mut available: Vec<String> = models.to_vec();
        for candidate in &self.orchestrator.synthesis_candidates {
            if !available.contains(candidate) {
                available.push(candidate.clone());
            }
        }
        available.retain(|model| {
            self.gateway.supports(model) && !self.fallback.is_rate_limited(ProviderId::infer(model))
        });

        let participants: Vec<String> = source_models
            .iter()
            .chain(initial.successful_models.iter())
            .fold(Vec::new(), |mut acc, model| {
                if !acc.contains(model) {
                    acc.push(model.clone());
                }
                acc
            });

        let non_participants: Vec<String> = available
            .iter()
            .filter(|model| !participants.contains(model))
            .cloned()
            .collect();

        let (pool, strategy) = if non_participants.is_empty() {
            tracing::warn!(
                correlation_id = cid,
                "no non-participant models available, synthesis may carry self-consistency bias"
            );
            (available.clone(), SynthesisStrategy::ParticipantFallback)
        } else {
            (non_participants.clone(), SynthesisStrategy::NonParticipant)
        };

        let candidates = self.selector.as_ref().map_or_else(
            || pool.clone(),
            |selector| {
                let recent: Vec<String> = source_models.iter().take(3).cloned().collect();
                selector.rank(&pool, query_type, &recent)
            },
        );

        let truncated = prompts::truncate_responses(&peer_review.revised_responses, self.orchestrator.max_context_tokens);
        let block = prompts::responses_block(&truncated, peer_reviewed);
        let prompt = prompts::synthesis_prompt(query_type, query, &block);
        performance
            .token_estimates
            .insert("synthesis_prompt".to_owned(), prompts::estimate_prompt_tokens(&prompt));

        let mut last_error = "No synthesis candidates available".to_owned();

        for model in &candidates {
            tracing::info!(correlation_id = cid, model = %model, "attempting synthesis");
            let started = Instant::now();

            match self.synthesis_call(model, &prompt).await {
                Ok(generation) if !generation.text.trim().is_empty() => {
                    let elapsed = started.elapsed().as_secs_f64();
                    self.record_latency(performance, model, StageName::UltraSynthesis, elapsed * 1000.0);
                    performance.total_cost_usd += generation.cost;

                    if let Some(selector) = &self.selector {
                        selector.record_outcome(model, true, Some(8.5), Some(elapsed));
                    }

                    self.emit_synthesis_events(cid, model, &generation.text, options.stream_synthesis);

                    tracing::info!(correlation_id = cid, model = %model, "synthesis completed");
                    self.events.publish(
                        cid,
                        EventName::StageCompleted,
                        serde_json::json!({ "stage": StageName::UltraSynthesis, "success": true, "model_used": model }),
                    );

                    return Ok(SynthesisStage {
                        synthesis: generation.text,
                        model_used: model.clone(),
                        strategy,
                        participants,
                        non_participants,
                        source_models,
                    });
                }
                Ok(_) => {
                    last_error = "Rate limited or empty response".to_owned();
                    tracing::warn!(correlation_id = cid, model = %model, "empty synthesis, trying next candidate");
                    if let Some(selector) = &self.selector {
                        selector.record_outcome(model, false, Some(0.0), None);
                    }
                }
                Err(error) => {
                    last_error = error.to_string();
                    tracing::warn!(
                        correlation_id = cid,
                        model = %model,
                        error = %error,
                        "synthesis attempt failed, trying next candidate"
                    );
                    if let Some(selector) = &self.selector {
                        selector.record_outcome(model, false, Some(0.0), None);
                    }
                }
            }
        }

        let message = format!("Failed to generate synthesis: {last_error}");
        self.events.publish(
            cid,
            EventName::StageError,
            serde_json::json!({ "stage": StageName::UltraSynthesis, "error": &message }),
        );
        Err(message)
    }

    /// One synthesis attempt through the uniform stack
    async fn synthesis_call(&self, model: &str, prompt: &str) -> Result<MeteredGeneration, LlmError> {
        let provider = ProviderId::infer(model);
        let timeout = Duration::from_secs(self.orchestrator.ultra_synthesis_timeout_seconds);

        let permit = self.limiter.acquire(&provider.to_string()).await;
        let result = self
            .retry
            .execute_with_timeout(timeout, provider, model, || self.gateway.generate(model, prompt))
            .await;
        permit.complete(result.is_ok());

        if let Err(LlmError::RateLimited { provider, retry_after }) = &result {
            self.fallback
                .mark_rate_limited(*provider, retry_after.map(Duration::from_secs));
        }

        result
    }

    fn emit_synthesis_events(&self, cid: &str, model: &str, text: &str, stream_chunks: bool) {
        if stream_chunks {
            let words: Vec<&str> = text.split_whitespace().collect();
            let chunk_words = self.orchestrator.synthesis_chunk_words.max(1);
            let total_chunks = words.len().div_ceil(chunk_words);

            for (index, chunk) in words.chunks(chunk_words).enumerate() {
                self.events.publish(
                    cid,
                    EventName::SynthesisChunk,
                    serde_json::json!({
                        "chunk_text": chunk.join(" "),
                        "chunk_index": index,
                        "model_used": model,
                        "total_chunks": total_chunks,
                    }),
                );
            }
        }

        self.events.publish(
            cid,
            EventName::SynthesisCompleted,
            serde_json::json!({ "model_used": model, "total_length": text.len() }),
        );
    }

    fn failure_for(&self, error: &LlmError) -> ModelFailure {
        let fallback_suggestion = if let LlmError::RateLimited { provider, .. } = error {
            self.fallback.suggest_alternative(*provider).map(|alternative| {
                FallbackSuggestion {
                    provider: alternative.to_string(),
                    models: self.fallback.fallback_models(*provider, 2),
                    message: format!(
                        "Consider using {alternative} provider as {provider} is rate limited"
                    ),
                }
            })
        } else {
            None
        };

        ModelFailure {
            kind: error.kind().to_owned(),
            message: error.to_string(),
            fallback_suggestion,
        }
    }

    fn record_latency(
        &self,
        performance: &mut PerformanceMetrics,
        model: &str,
        stage: StageName,
        latency_ms: f64,
    ) {
        performance
            .model_latencies_ms
            .insert(format!("{model}/{stage}"), latency_ms);
    }

    /// Dump run artifacts as JSON and TXT, tolerating write failures
    fn save_outputs(&self, result: &PipelineResult) {
        let Some(dir) = &self.orchestrator.save_outputs_dir else {
            return;
        };

        if let Err(e) = std::fs::create_dir_all(dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "could not create output directory");
            return;
        }

        let json_path = dir.join(format!("pipeline_{}.json", result.correlation_id));
        match serde_json::to_string_pretty(result) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&json_path, json) {
                    tracing::warn!(path = %json_path.display(), error = %e, "could not write pipeline output");
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not serialize pipeline output"),
        }

        if let Some(synthesis) = result.synthesis() {
            let txt_path = dir.join(format!("pipeline_{}.txt", result.correlation_id));
            if let Err(e) = std::fs::write(&txt_path, &synthesis.synthesis) {
                tracing::warn!(path = %txt_path.display(), error = %e, "could not write synthesis text");
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        text.to_owned()
    } else {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text[..end].to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(extra: &str) -> Config {
        let toml = format!(
            r#"
            [orchestrator]
            stub_responses = true
            {extra}

            [synthesis]
            metrics_path = "{}"

            [providers.openai]
            type = "openai"
            api_key = "sk-test"
            default_models = ["gpt-4"]

            [providers.anthropic]
            type = "anthropic"
            api_key = "sk-ant"
            default_models = ["claude-3-opus"]

            [providers.google]
            type = "google"
            api_key = "g-key"
            default_models = ["gemini-1.5-flash"]
        "#,
            std::env::temp_dir().join("quorum-test-metrics.json").display()
        );
        Config::from_toml(&toml).unwrap()
    }

    fn models(names: &[&str]) -> Vec<String> {
        names.iter().map(|&n| n.to_owned()).collect()
    }

    #[tokio::test]
    async fn missing_provider_refuses_without_calls() {
        let orchestrator = Orchestrator::from_config(&stub_config("")).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "What are the benefits of renewable energy?",
                &RunOptions::default(),
                Some(models(&["gpt-4", "claude-3-5-sonnet-20241022"])),
            )
            .await;

        let refusal = outcome.unavailable().expect("expected refusal");
        assert_eq!(refusal.error, "SERVICE_UNAVAILABLE");
        assert_eq!(refusal.details.missing_providers, vec!["google"]);
        assert_eq!(refusal.details.service_status, "unavailable");
    }

    #[tokio::test]
    async fn happy_path_runs_all_three_stages() {
        let orchestrator = Orchestrator::from_config(&stub_config("")).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "What are the benefits of renewable energy?",
                &RunOptions::default(),
                Some(models(&["gpt-4", "claude-3-opus", "gemini-1.5-flash"])),
            )
            .await;

        let result = outcome.result().expect("expected completion");
        let initial = result.initial().unwrap();
        assert_eq!(initial.successful_models.len(), 3);

        let peer = result.peer_review().unwrap();
        assert!(peer.skipped.is_none());
        assert_eq!(peer.revised_responses.len(), 3);

        let synthesis = result.synthesis().unwrap();
        assert!(!synthesis.synthesis.is_empty());
        assert!(result.success());
    }

    #[tokio::test]
    async fn synthesis_prefers_non_participant() {
        let orchestrator = Orchestrator::from_config(&stub_config("")).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "Explain how solar panels work.",
                &RunOptions::default(),
                Some(models(&["gpt-4", "claude-3-opus", "gemini-1.5-flash"])),
            )
            .await;

        let result = outcome.result().unwrap();
        let synthesis = result.synthesis().unwrap();

        // The configured extra candidate never participated
        assert_eq!(synthesis.strategy, SynthesisStrategy::NonParticipant);
        assert!(!synthesis.participants.contains(&synthesis.model_used));
        assert!(synthesis.non_participants.contains(&synthesis.model_used));
    }

    #[tokio::test]
    async fn single_model_degraded_skips_peer_review() {
        let extra = r#"
            minimum_models_required = 1
            required_providers = ["openai"]
            enable_single_model_fallback = true
            synthesis_candidates = []
        "#;
        let orchestrator = Orchestrator::from_config(&stub_config(extra)).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "What is the capital of France?",
                &RunOptions::default(),
                Some(models(&["gpt-4"])),
            )
            .await;

        let result = outcome.result().unwrap();
        let peer = result.peer_review().unwrap();
        assert_eq!(peer.skipped.as_deref(), Some(PEER_REVIEW_SKIP_REASON));
        assert_eq!(peer.revision_count, 0);

        // Only the participant remains for synthesis
        let synthesis = result.synthesis().unwrap();
        assert_eq!(synthesis.strategy, SynthesisStrategy::ParticipantFallback);
        assert_eq!(synthesis.model_used, "gpt-4");
    }

    #[tokio::test]
    async fn cache_round_trip_marks_second_run_cached() {
        let extra = "";
        let mut config = stub_config(extra);
        config.cache.enabled = true;
        let orchestrator = Orchestrator::from_config(&config).unwrap();

        let selected = models(&["gpt-4", "claude-3-opus", "gemini-1.5-flash"]);

        let first = orchestrator
            .run_pipeline("Cache me if you can.", &RunOptions::default(), Some(selected.clone()))
            .await;
        let first = first.result().unwrap();
        assert!(!first.cached);

        let second = orchestrator
            .run_pipeline("Cache me if you can.", &RunOptions::default(), Some(selected))
            .await;
        let second = second.result().unwrap();
        assert!(second.cached);
        assert_eq!(
            first.synthesis().unwrap().synthesis,
            second.synthesis().unwrap().synthesis
        );
    }

    #[tokio::test]
    async fn invalid_model_names_are_dropped_before_gating() {
        let orchestrator = Orchestrator::from_config(&stub_config("")).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "hello",
                &RunOptions::default(),
                Some(models(&["gpt-4", "claude-3-opus", "gemini-1.5-flash", "rm -rf /"])),
            )
            .await;

        let result = outcome.result().unwrap();
        assert_eq!(result.initial().unwrap().attempted_models.len(), 3);
    }

    #[tokio::test]
    async fn frontend_aliases_are_canonicalized() {
        let orchestrator = Orchestrator::from_config(&stub_config("")).unwrap();

        let outcome = orchestrator
            .run_pipeline(
                "hello",
                &RunOptions::default(),
                Some(models(&["gpt4o", "claude3opus", "gemini15"])),
            )
            .await;

        let result = outcome.result().unwrap();
        let attempted = &result.initial().unwrap().attempted_models;
        assert!(attempted.contains(&"gpt-4o".to_owned()));
        assert!(attempted.contains(&"claude-3-opus".to_owned()));
        assert!(attempted.contains(&"gemini-1.5-pro".to_owned()));
    }
}
