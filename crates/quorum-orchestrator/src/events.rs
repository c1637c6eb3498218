//! Per-run stream event bus
//!
//! Events are keyed by correlation id, sequence-numbered monotonically
//! per run, delivered in order at most once, and never persisted. A slow
//! subscriber loses the oldest buffered events first.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures_util::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

/// Buffered events per channel before the oldest are dropped
const CHANNEL_CAPACITY: usize = 256;

/// Event names emitted by the pipeline driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum EventName {
    PipelineStarted,
    PipelineCompleted,
    PipelineError,
    StageStarted,
    StageCompleted,
    StageError,
    ModelStarted,
    ModelResponse,
    ModelError,
    SynthesisChunk,
    SynthesisCompleted,
}

/// One emitted event
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    pub event: String,
    /// Strictly increasing per correlation id, starting at 1
    pub sequence: u64,
    /// ISO-8601 emission time
    pub timestamp: String,
    pub data: Value,
}

struct Channel {
    tx: broadcast::Sender<StreamEvent>,
    sequence: Arc<AtomicU64>,
}

/// Correlation-keyed event fan-out
pub struct EventBus {
    channels: DashMap<String, Channel>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Publish an event to a run's channel
    ///
    /// Events without a subscribed channel are dropped; the bus carries
    /// live runs only.
    pub fn publish(&self, correlation_id: &str, event: EventName, data: Value) {
        let Some(channel) = self.channels.get(correlation_id) else {
            return;
        };

        let sequence = channel.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let stream_event = StreamEvent {
            event: event.to_string(),
            sequence,
            timestamp: jiff::Timestamp::now().to_string(),
            data,
        };

        // A send error only means the subscriber went away
        let _ = channel.tx.send(stream_event);
    }

    /// Subscribe to a run's events, creating the channel if needed
    ///
    /// The stream ends when the channel is closed. Lagged events are
    /// skipped, preserving order of whatever is delivered.
    pub fn subscribe(&self, correlation_id: &str) -> impl Stream<Item = StreamEvent> + Send + Unpin + use<> {
        let rx = {
            let channel = self.channels.entry(correlation_id.to_owned()).or_insert_with(|| {
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                Channel {
                    tx,
                    sequence: Arc::new(AtomicU64::new(0)),
                }
            });
            channel.tx.subscribe()
        };

        Box::pin(futures_util::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "subscriber lagged, dropping oldest events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        }))
    }

    /// Close a run's channel, ending its subscriber streams
    pub fn close(&self, correlation_id: &str) {
        self.channels.remove(correlation_id);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
