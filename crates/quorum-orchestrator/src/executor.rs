//! Bounded concurrent model execution
//!
//! Runs a stage's model calls under a semaphore cap and a group deadline.
//! On deadline expiry every pending task is aborted and then awaited, so
//! no task outlives its stage; cancelled calls release their rate-limiter
//! permits and count as provider failures.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quorum_core::{CorrelationId, ProviderId, with_correlation};
use quorum_limits::{FallbackManager, RateLimiter};
use quorum_llm::{LlmError, LlmGateway, MeteredGeneration};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::events::{EventBus, EventName};
use crate::retry::RetryHandler;
use crate::types::StageName;

/// Hard ceiling on in-flight calls within one stage
const MAX_FANOUT: usize = 4;

/// Shared context for one stage's fan-out
pub struct StageContext {
    pub gateway: Arc<LlmGateway>,
    pub limiter: RateLimiter,
    pub retry: Arc<RetryHandler>,
    pub fallback: Arc<FallbackManager>,
    pub events: Arc<EventBus>,
    pub correlation_id: CorrelationId,
    pub stage: StageName,
    /// Per model attempt, including retries
    pub attempt_timeout: Duration,
    /// Across the whole concurrent group
    pub group_timeout: Duration,
    /// Configured concurrency bound, clamped to [`MAX_FANOUT`]
    pub max_concurrent: usize,
    /// Emit per-model events (stage 1 only)
    pub emit_model_events: bool,
}

/// Outcome of one model's call within a stage
pub struct ModelOutcome {
    pub model: String,
    pub result: Result<MeteredGeneration, LlmError>,
    pub latency_ms: f64,
}

/// Run `calls` concurrently under the stage's bounds
///
/// Always returns one outcome per requested model; models cancelled by
/// the group deadline surface `LlmError::Cancelled`.
pub async fn run_group(ctx: &StageContext, calls: Vec<(String, String)>) -> Vec<ModelOutcome> {
    let models: Vec<String> = calls.iter().map(|(model, _)| model.clone()).collect();
    let cap = calls
        .len()
        .min(ctx.max_concurrent.clamp(1, MAX_FANOUT))
        .max(1);
    let semaphore = Arc::new(Semaphore::new(cap));

    tracing::info!(
        correlation_id = %ctx.correlation_id,
        stage = %ctx.stage,
        models = calls.len(),
        max_concurrent = cap,
        "starting concurrent execution"
    );

    let mut join_set: JoinSet<ModelOutcome> = JoinSet::new();
    for (model, prompt) in calls {
        join_set.spawn(call_one(
            Arc::clone(&semaphore),
            ctx.gateway.clone(),
            ctx.limiter.clone(),
            Arc::clone(&ctx.retry),
            Arc::clone(&ctx.fallback),
            Arc::clone(&ctx.events),
            ctx.correlation_id.clone(),
            ctx.stage,
            ctx.attempt_timeout,
            ctx.emit_model_events,
            model,
            prompt,
        ));
    }

    let mut outcomes = Vec::with_capacity(models.len());
    let deadline = tokio::time::sleep(ctx.group_timeout);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = join_set.join_next() => match joined {
                Some(Ok(outcome)) => outcomes.push(outcome),
                Some(Err(join_error)) => {
                    tracing::error!(error = %join_error, "model task failed to join");
                }
                None => break,
            },
            () = &mut deadline => {
                tracing::error!(
                    correlation_id = %ctx.correlation_id,
                    stage = %ctx.stage,
                    timeout_secs = ctx.group_timeout.as_secs(),
                    "concurrent execution timed out, cancelling pending tasks"
                );

                join_set.abort_all();
                // Await the aborted tasks so nothing outlives the stage;
                // dropped rate permits release on the way out
                while let Some(joined) = join_set.join_next().await {
                    if let Ok(outcome) = joined {
                        outcomes.push(outcome);
                    }
                }
                break;
            }
        }
    }

    // Fill in cancelled entries for models that never produced an outcome
    for model in models {
        if !outcomes.iter().any(|o| o.model == model) {
            ctx.gateway.record_cancellation(&model);
            if ctx.emit_model_events {
                ctx.events.publish(
                    ctx.correlation_id.as_str(),
                    EventName::ModelError,
                    serde_json::json!({
                        "model": &model,
                        "stage": ctx.stage,
                        "error": "cancelled",
                    }),
                );
            }
            outcomes.push(ModelOutcome {
                model,
                result: Err(LlmError::Cancelled),
                latency_ms: ctx.group_timeout.as_secs_f64() * 1000.0,
            });
        }
    }

    outcomes
}

#[allow(clippy::too_many_arguments)]
fn call_one(
    semaphore: Arc<Semaphore>,
    gateway: Arc<LlmGateway>,
    limiter: RateLimiter,
    retry: Arc<RetryHandler>,
    fallback: Arc<FallbackManager>,
    events: Arc<EventBus>,
    correlation_id: CorrelationId,
    stage: StageName,
    attempt_timeout: Duration,
    emit_model_events: bool,
    model: String,
    prompt: String,
) -> impl Future<Output = ModelOutcome> + Send {
    with_correlation(correlation_id.clone(), async move {
        let Ok(_slot) = semaphore.acquire().await else {
            return ModelOutcome {
                model,
                result: Err(LlmError::Cancelled),
                latency_ms: 0.0,
            };
        };

        if emit_model_events {
            events.publish(
                correlation_id.as_str(),
                EventName::ModelStarted,
                serde_json::json!({ "model": &model, "stage": stage }),
            );
        }

        let provider = ProviderId::infer(&model);
        let started = Instant::now();

        let permit = limiter.acquire(&provider.to_string()).await;
        let result = retry
            .execute_with_timeout(attempt_timeout, provider, &model, || gateway.generate(&model, &prompt))
            .await;
        permit.complete(result.is_ok());

        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(generation) => {
                tracing::info!(
                    correlation_id = %correlation_id,
                    %stage,
                    model = %model,
                    latency_ms,
                    "model succeeded"
                );
                if emit_model_events {
                    events.publish(
                        correlation_id.as_str(),
                        EventName::ModelResponse,
                        serde_json::json!({
                            "model": &model,
                            "stage": stage,
                            "response_text": &generation.text,
                            "response_time_ms": latency_ms,
                        }),
                    );
                }
            }
            Err(error) => {
                tracing::error!(
                    correlation_id = %correlation_id,
                    %stage,
                    model = %model,
                    error = %error,
                    "model failed"
                );
                if let LlmError::RateLimited { provider, retry_after } = error {
                    fallback.mark_rate_limited(*provider, retry_after.map(Duration::from_secs));
                }
                if emit_model_events {
                    events.publish(
                        correlation_id.as_str(),
                        EventName::ModelError,
                        serde_json::json!({
                            "model": &model,
                            "stage": stage,
                            "error": error.to_string(),
                            "kind": error.kind(),
                        }),
                    );
                }
            }
        }

        ModelOutcome { model, result, latency_ms }
    })
}
