//! Call telemetry: token estimation, cost attribution, spans
//!
//! Wraps the resilient client and emits one span per call with provider,
//! model, token, cost, and duration attributes.

use std::time::Instant;

use tiktoken_rs::cl100k_base;

use crate::error::LlmError;
use crate::resilient::ResilientClient;

/// Pricing per 1K tokens (USD)
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Applied when a model has no table entry
const DEFAULT_PRICING: Pricing = Pricing { input_per_1k: 0.001, output_per_1k: 0.002 };

/// Static per-model pricing table
const TOKEN_PRICING: &[(&str, Pricing)] = &[
    // OpenAI
    ("gpt-4", Pricing { input_per_1k: 0.03, output_per_1k: 0.06 }),
    ("gpt-4o", Pricing { input_per_1k: 0.005, output_per_1k: 0.015 }),
    ("gpt-3.5-turbo", Pricing { input_per_1k: 0.0005, output_per_1k: 0.0015 }),
    ("o1", Pricing { input_per_1k: 0.015, output_per_1k: 0.06 }),
    ("o1-preview", Pricing { input_per_1k: 0.015, output_per_1k: 0.06 }),
    ("o1-mini", Pricing { input_per_1k: 0.003, output_per_1k: 0.012 }),
    // Anthropic
    ("claude-3-opus", Pricing { input_per_1k: 0.015, output_per_1k: 0.075 }),
    ("claude-3-sonnet", Pricing { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-haiku", Pricing { input_per_1k: 0.000_25, output_per_1k: 0.001_25 }),
    ("claude-3-5-sonnet", Pricing { input_per_1k: 0.003, output_per_1k: 0.015 }),
    ("claude-3-5-haiku", Pricing { input_per_1k: 0.001, output_per_1k: 0.005 }),
    // Google
    ("gemini-1.5-pro", Pricing { input_per_1k: 0.0005, output_per_1k: 0.0015 }),
    ("gemini-1.5-flash", Pricing { input_per_1k: 0.000_075, output_per_1k: 0.0003 }),
    ("gemini-2.0-flash-exp", Pricing { input_per_1k: 0.0001, output_per_1k: 0.0004 }),
];

/// Estimate token count via tiktoken, falling back to chars/4
pub fn estimate_tokens(text: &str) -> usize {
    cl100k_base().map_or_else(|_| text.len() / 4, |bpe| bpe.encode_with_special_tokens(text).len())
}

/// Pricing for a model: exact match first, then prefix match, then default
pub fn pricing_for(model: &str) -> Pricing {
    if let Some((_, pricing)) = TOKEN_PRICING.iter().find(|(name, _)| *name == model) {
        return *pricing;
    }
    TOKEN_PRICING
        .iter()
        .find(|(name, _)| model.starts_with(name))
        .map_or(DEFAULT_PRICING, |(_, pricing)| *pricing)
}

/// A generation plus its per-call accounting
#[derive(Debug, Clone)]
pub struct MeteredGeneration {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub cost: f64,
    pub duration_ms: f64,
}

/// Resilient client with telemetry attached to every call
pub struct MeteredClient {
    inner: ResilientClient,
}

impl MeteredClient {
    pub const fn new(inner: ResilientClient) -> Self {
        Self { inner }
    }

    pub const fn inner(&self) -> &ResilientClient {
        &self.inner
    }

    /// Generate, recording tokens, cost, and duration
    pub async fn generate(&self, model: &str, prompt: &str) -> Result<MeteredGeneration, LlmError> {
        let provider = self.inner.provider();
        let input_tokens = estimate_tokens(prompt);
        let started = Instant::now();

        let span = tracing::info_span!(
            "llm.generate",
            %provider,
            model,
            input_tokens,
            output_tokens = tracing::field::Empty,
            cost_usd = tracing::field::Empty,
            success = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );
        let _guard = span.enter();

        let result = self.inner.generate(model, prompt).await;
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(generation) => {
                let output_tokens = estimate_tokens(&generation.text);
                let pricing = pricing_for(model);
                let cost = (input_tokens as f64 / 1000.0).mul_add(
                    pricing.input_per_1k,
                    (output_tokens as f64 / 1000.0) * pricing.output_per_1k,
                );

                span.record("output_tokens", output_tokens);
                span.record("cost_usd", cost);
                span.record("success", true);
                span.record("duration_ms", duration_ms);

                tracing::info!(
                    %provider,
                    model,
                    input_tokens,
                    output_tokens,
                    cost_usd = cost,
                    duration_ms,
                    "llm request completed"
                );

                Ok(MeteredGeneration {
                    text: generation.text,
                    input_tokens,
                    output_tokens,
                    cost,
                    duration_ms,
                })
            }
            Err(error) => {
                span.record("success", false);
                span.record("duration_ms", duration_ms);

                tracing::warn!(
                    %provider,
                    model,
                    error = %error,
                    duration_ms,
                    "llm request failed"
                );

                Err(error)
            }
        }
    }
}
