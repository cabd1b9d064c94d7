//! ==============================================================================
//! telemetry.rs - outbound telemetry channels
//! ==============================================================================
//!
//! purpose:
//!     publishes readings, reset events and master durations to an external
//!     collector. publishing is best effort: producers enqueue with
//!     `try_send` and a dedicated worker delivers, so a slow or unreachable
//!     collector never stalls ingestion.
//!
//! channels (topic names come from config):
//!     - reading:  latest accepted reading, json number, at most 1/s
//!     - reset:    json `1` once the reset broadcast went out
//!     - duration: `{"swarmID": "...", "duration": n}` per node, at most 1/s
//!
//! ==============================================================================

use serde_json::json;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TelemetryConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    Reading(u16),
    Reset,
    Duration { node_id: String, seconds: u64 },
}

impl TelemetryEvent {
    pub fn topic<'a>(&self, config: &'a TelemetryConfig) -> &'a str {
        match self {
            TelemetryEvent::Reading(_) => &config.reading_topic,
            TelemetryEvent::Reset => &config.reset_topic,
            TelemetryEvent::Duration { .. } => &config.duration_topic,
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            TelemetryEvent::Reading(value) => json!(value),
            TelemetryEvent::Reset => json!(1),
            TelemetryEvent::Duration { node_id, seconds } => {
                json!({ "swarmID": node_id, "duration": seconds })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("telemetry queue full")]
    QueueFull,
    #[error("telemetry worker stopped")]
    Closed,
    #[error("publish to {topic} failed: {source}")]
    Http {
        topic: String,
        #[source]
        source: reqwest::Error,
    },
}

/// producer side, cheap to clone into every worker
#[derive(Clone)]
pub struct TelemetryHandle {
    tx: Option<mpsc::Sender<TelemetryEvent>>,
}

impl TelemetryHandle {
    /// a handle that drops everything; used when telemetry is disabled
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// enqueue without waiting. failures are logged and returned, never fatal.
    pub fn publish(&self, event: TelemetryEvent) -> Result<(), SinkError> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        let result = tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        });
        if let Err(e) = &result {
            warn!("[TELEMETRY] Sink unavailable: {}", e);
        }
        result
    }
}

/// create the queue; the receiver goes to `TelemetryPublisher::run`
pub fn channel(depth: usize) -> (TelemetryHandle, mpsc::Receiver<TelemetryEvent>) {
    let (tx, rx) = mpsc::channel(depth.max(1));
    (TelemetryHandle { tx: Some(tx) }, rx)
}

/// allows one event per interval
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    last: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self { interval, last: None }
    }

    /// true (and arms the limiter) when enough time has passed
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// consumer side: delivers queued events to the collector
pub struct TelemetryPublisher {
    config: TelemetryConfig,
    client: reqwest::Client,
}

impl TelemetryPublisher {
    pub fn new(config: TelemetryConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<TelemetryEvent>, cancel: CancellationToken) {
        match &self.config.endpoint {
            Some(url) => info!("[TELEMETRY] Publishing to {}", url),
            None => info!("[TELEMETRY] No endpoint configured - logging events only"),
        }

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = rx.recv() => match event {
                    Some(event) => {
                        if let Err(e) = self.deliver(&event).await {
                            warn!("[TELEMETRY] Sink unavailable: {}", e);
                        }
                    }
                    None => break,
                },
            }
        }
        debug!("[TELEMETRY] Publisher stopped");
    }

    async fn deliver(&self, event: &TelemetryEvent) -> Result<(), SinkError> {
        let topic = event.topic(&self.config);
        let payload = event.payload();

        let Some(endpoint) = &self.config.endpoint else {
            info!("[TELEMETRY] {} <- {}", topic, payload);
            return Ok(());
        };

        let url = format!("{}/{}", endpoint.trim_end_matches('/'), topic);
        self.client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|source| SinkError::Http { topic: topic.to_string(), source })?;
        debug!("[TELEMETRY] {} <- {}", topic, payload);
        Ok(())
    }
}
