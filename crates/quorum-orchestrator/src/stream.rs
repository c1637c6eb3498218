//! Streaming pipeline entry point
//!
//! Subscribes to the run's event channel before spawning the pipeline, so
//! no early event can be missed, then closes the channel when the run
//! finishes so subscriber streams terminate.

use std::sync::Arc;

use futures_util::Stream;
use quorum_core::CorrelationId;

use crate::events::StreamEvent;
use crate::pipeline::{Orchestrator, RunOptions};

impl Orchestrator {
    /// Run the pipeline and stream its events
    ///
    /// Returns the run's correlation id and an ordered event stream that
    /// ends once the pipeline completes or fails.
    pub fn stream_pipeline(
        self: &Arc<Self>,
        query: String,
        mut options: RunOptions,
        selected_models: Option<Vec<String>>,
    ) -> (CorrelationId, impl Stream<Item = StreamEvent> + Send + Unpin + use<>) {
        let correlation_id = CorrelationId::resolve(options.correlation_id.as_deref());
        options.correlation_id = Some(correlation_id.to_string());
        options.stream_synthesis = true;

        let stream = self.events().subscribe(correlation_id.as_str());

        let orchestrator = Arc::clone(self);
        let run_id = correlation_id.clone();
        tokio::spawn(async move {
            let _outcome = orchestrator
                .run_pipeline(&query, &options, selected_models)
                .await;
            orchestrator.events().close(run_id.as_str());
        });

        (correlation_id, stream)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use quorum_config::Config;

    use super::*;

    fn stub_config() -> Config {
        Config::from_toml(
            r#"
            [orchestrator]
            stub_responses = true

            [synthesis]
            enhanced = false

            [providers.openai]
            type = "openai"
            api_key = "sk-test"

            [providers.anthropic]
            type = "anthropic"
            api_key = "sk-ant"

            [providers.google]
            type = "google"
            api_key = "g-key"
        "#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn stream_is_ordered_with_terminal_completion() {
        let orchestrator = Arc::new(Orchestrator::from_config(&stub_config()).unwrap());

        let (_, stream) = orchestrator.stream_pipeline(
            "What are the benefits of renewable energy?".to_owned(),
            RunOptions::default(),
            Some(vec![
                "gpt-4".to_owned(),
                "claude-3-opus".to_owned(),
                "gemini-1.5-flash".to_owned(),
            ]),
        );

        let events: Vec<StreamEvent> = stream.collect().await;
        assert!(!events.is_empty());

        // Strictly monotonic sequence with no gaps
        for (i, event) in events.iter().enumerate() {
            assert_eq!(event.sequence, i as u64 + 1);
        }

        let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
        assert_eq!(names.first().copied(), Some("pipeline_started"));
        assert_eq!(names.last().copied(), Some("pipeline_completed"));
        assert_eq!(names.iter().filter(|&&n| n == "pipeline_started").count(), 1);
        assert_eq!(names.iter().filter(|&&n| n == "pipeline_completed").count(), 1);

        // One model_started and one model_response per successful model
        assert_eq!(names.iter().filter(|&&n| n == "model_started").count(), 3);
        assert_eq!(names.iter().filter(|&&n| n == "model_response").count(), 3);

        // Synthesis chunks precede exactly one synthesis_completed
        let chunk_count = names.iter().filter(|&&n| n == "synthesis_chunk").count();
        assert!(chunk_count >= 1);
        assert_eq!(names.iter().filter(|&&n| n == "synthesis_completed").count(), 1);
        let last_chunk = names.iter().rposition(|n| *n == "synthesis_chunk").unwrap();
        let completed = names.iter().position(|n| *n == "synthesis_completed").unwrap();
        assert!(last_chunk < completed);
    }

    #[tokio::test]
    async fn gating_failure_streams_pipeline_error() {
        let orchestrator = Arc::new(Orchestrator::from_config(&stub_config()).unwrap());

        let (_, stream) = orchestrator.stream_pipeline(
            "hello".to_owned(),
            RunOptions::default(),
            Some(vec!["gpt-4".to_owned()]),
        );

        let events: Vec<StreamEvent> = stream.collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "pipeline_error");
        assert_eq!(events[0].data["error"], "SERVICE_UNAVAILABLE");
    }
}
