//! End-to-end pipeline scenarios against mock providers

mod harness;

use harness::mock_provider::{MockProviders, ModelScript};
use harness::{big3, test_config};
use quorum_orchestrator::{Orchestrator, PipelineOutcome, RunOptions, SynthesisStrategy};

const QUERY: &str = "What are the benefits of renewable energy?";

const LONG_SYNTHESIS: &str = "Renewable energy delivers substantial long-term benefits across \
economics, public health, and climate stability: falling generation costs, energy independence, \
reduced air pollution, new employment sectors, and a credible path to decarbonizing electricity \
grids worldwide over the coming decades.";

#[tokio::test]
async fn big3_happy_path_completes_all_stages() {
    let mock = MockProviders::start().await.unwrap();
    mock.script("claude-3-opus", ModelScript::respond(LONG_SYNTHESIS));

    let config = test_config(
        &mock,
        "[orchestrator]\nsynthesis_candidates = [\"claude-3-opus\"]",
    );
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let outcome = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(big3()))
        .await;

    let result = outcome.result().expect("pipeline should complete");

    let initial = result.initial().unwrap();
    assert_eq!(initial.successful_models.len(), 3);

    let peer = result.peer_review().unwrap();
    assert!(peer.skipped.is_none());
    assert_eq!(peer.revised_responses.len(), 3);

    let synthesis = result.synthesis().unwrap();
    assert_eq!(synthesis.strategy, SynthesisStrategy::NonParticipant);
    assert!(!big3().contains(&synthesis.model_used));
    assert!(synthesis.synthesis.split_whitespace().count() >= 20);
    assert!(result.success());
}

#[tokio::test]
async fn missing_required_provider_refuses_without_model_calls() {
    let mock = MockProviders::start().await.unwrap();
    let config = test_config(&mock, "");
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let outcome = orchestrator
        .run_pipeline(
            QUERY,
            &RunOptions::default(),
            Some(vec!["gpt-4".to_owned(), "claude-3-5-sonnet-20241022".to_owned()]),
        )
        .await;

    let refusal = outcome.unavailable().expect("expected refusal");
    assert_eq!(refusal.error, "SERVICE_UNAVAILABLE");
    assert_eq!(refusal.details.missing_providers, vec!["google"]);

    // No provider was contacted
    assert_eq!(mock.request_count(), 0);
}

#[tokio::test]
async fn single_model_degraded_path() {
    let mock = MockProviders::start().await.unwrap();
    let extra = r#"
        [orchestrator]
        minimum_models_required = 1
        required_providers = ["openai"]
        enable_single_model_fallback = true
        synthesis_candidates = []
    "#;
    let config = test_config(&mock, extra);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let outcome = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(vec!["gpt-4".to_owned()]))
        .await;

    let result = outcome.result().unwrap();
    let peer = result.peer_review().unwrap();
    assert_eq!(peer.skipped.as_deref(), Some("Insufficient models for peer review"));

    let synthesis = result.synthesis().unwrap();
    assert_eq!(synthesis.strategy, SynthesisStrategy::ParticipantFallback);
    assert_eq!(synthesis.model_used, "gpt-4");
}

#[tokio::test]
async fn peer_review_prompts_carry_the_original_query() {
    let mock = MockProviders::start().await.unwrap();
    let config = test_config(&mock, "");
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    // The revision answer echoes nothing; the property under test is that
    // the pipeline completed peer review for each stage-1 survivor
    let outcome = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(big3()))
        .await;

    let result = outcome.result().unwrap();
    let initial = result.initial().unwrap();
    assert_eq!(initial.prompt, QUERY);

    let peer = result.peer_review().unwrap();
    assert_eq!(peer.original_responses.len(), peer.revised_responses.len());
}

#[tokio::test]
async fn cache_round_trip_produces_identical_synthesis() {
    let mock = MockProviders::start().await.unwrap();
    let extra = r"
        [cache]
        enabled = true
    ";
    let config = test_config(&mock, extra);
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let first = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(big3()))
        .await;
    let first = first.result().unwrap().clone();
    assert!(!first.cached);

    let calls_after_first = mock.request_count();

    let second = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(big3()))
        .await;
    let second = second.result().unwrap().clone();

    assert!(second.cached);
    assert_eq!(
        first.synthesis().unwrap().synthesis,
        second.synthesis().unwrap().synthesis
    );
    // The cached run issued no new provider calls
    assert_eq!(mock.request_count(), calls_after_first);
}

#[tokio::test]
async fn outcome_round_trips_as_json() {
    let mock = MockProviders::start().await.unwrap();
    let config = test_config(&mock, "");
    let orchestrator = Orchestrator::from_config(&config).unwrap();

    let outcome = orchestrator
        .run_pipeline(QUERY, &RunOptions::default(), Some(big3()))
        .await;

    if let PipelineOutcome::Completed(result) = outcome {
        let json = serde_json::to_string(&result).unwrap();
        let back: quorum_orchestrator::PipelineResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.correlation_id, result.correlation_id);
        assert_eq!(
            back.synthesis().unwrap().synthesis,
            result.synthesis().unwrap().synthesis
        );
    } else {
        panic!("expected completion");
    }
}
