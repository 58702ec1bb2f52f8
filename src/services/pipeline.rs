//! Pipeline Runner
//!
//! Runs one generation in a spawned task and hands the caller an ordered
//! [`EventStream`]. A keepalive ping is interleaved on its own timer for as
//! long as the run lasts. The run ends with exactly one terminal event,
//! `{final, done}` or `{error, rawError, done}`, unless the caller went away.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::models::artifact::GenerationRequest;
use crate::models::events::StreamEvent;
use crate::services::phase::PhasedGenerator;

/// Pipeline runner settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineConfig {
    #[serde(default = "default_ping_interval")]
    pub ping_interval_seconds: u64,
    /// Events buffered before the producer waits on the consumer
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_ping_interval() -> u64 {
    15
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ping_interval_seconds: default_ping_interval(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval_seconds == 0 {
            return Err("ping_interval_seconds must be at least 1".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Producer half of an event stream.
///
/// Sending into a stream whose consumer is gone cancels the run.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { tx, cancel }
    }

    /// Send an event. Returns false once the run is cancelled or the
    /// consumer is gone.
    pub async fn emit(&self, event: StreamEvent) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(event) => match sent {
                Ok(()) => true,
                Err(_) => {
                    debug!("Event consumer dropped, cancelling run");
                    self.cancel.cancel();
                    false
                }
            },
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Consumer half of a pipeline run
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
}

impl EventStream {
    pub fn new(rx: mpsc::Receiver<StreamEvent>, cancel: CancellationToken) -> Self {
        Self { rx, cancel }
    }

    /// Create a connected sink and stream
    pub fn channel(capacity: usize, cancel: CancellationToken) -> (EventSink, EventStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            EventSink::new(tx, cancel.clone()),
            EventStream::new(rx, cancel),
        )
    }

    /// Next event, or `None` once the run has ended
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Abort the run
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain every remaining event
    pub async fn collect(mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            events.push(event);
        }
        events
    }

    /// Adapt into a `futures` stream, e.g. for an HTTP response body
    pub fn into_stream(self) -> impl futures_util::Stream<Item = StreamEvent> + Send {
        futures_util::stream::unfold(self, |mut events| async move {
            events.next().await.map(|event| (event, events))
        })
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns pipeline runs
#[derive(Clone)]
pub struct PipelineRunner {
    generator: Arc<PhasedGenerator>,
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(generator: Arc<PhasedGenerator>) -> Self {
        Self {
            generator,
            config: PipelineConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn generator(&self) -> &Arc<PhasedGenerator> {
        &self.generator
    }

    /// Start one run. Cancelling `cancel` or dropping the returned stream
    /// aborts in-flight network work and stops emission.
    pub fn spawn(&self, request: GenerationRequest, cancel: CancellationToken) -> EventStream {
        let run_cancel = cancel.child_token();
        let (sink, stream) = EventStream::channel(self.config.channel_capacity, run_cancel.clone());

        let ping_stop = run_cancel.child_token();
        tokio::spawn(ping_loop(
            sink.clone(),
            Duration::from_secs(self.config.ping_interval_seconds),
            ping_stop.clone(),
        ));

        let generator = self.generator.clone();
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("pipeline", %request_id);
        tokio::spawn(
            async move {
                info!(messages = request.messages.len(), "Pipeline started");
                let outcome = generator.run(&request, &sink, &run_cancel).await;
                let terminal = match outcome {
                    Ok(artifact) => {
                        info!(files = artifact.files.len(), "Pipeline finished");
                        Some(StreamEvent::final_result(artifact))
                    }
                    Err(err) if err.is_cancelled() || run_cancel.is_cancelled() => {
                        debug!("Pipeline cancelled");
                        None
                    }
                    Err(err) => {
                        error!("Pipeline failed: {}", err);
                        Some(StreamEvent::error(err.user_message(), Some(err.to_string())))
                    }
                };
                ping_stop.cancel();
                if let Some(event) = terminal {
                    sink.emit(event).await;
                }
            }
            .instrument(span),
        );

        stream
    }
}

async fn ping_loop(sink: EventSink, period: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                if !sink.emit(StreamEvent::ping()).await {
                    break;
                }
            }
        }
    }
}
