//! ==============================================================================
//! runtime.rs - worker loops around the aggregation engine
//! ==============================================================================
//!
//! purpose:
//!     `SwarmRuntime` is a clone-able handle bundling the engine with its
//!     collaborators (reset coordinator, telemetry, display). each long-lived
//!     worker is a method consuming a clone:
//!
//!     - run_ingest:     receive datagram -> decode -> engine -> telemetry
//!     - run_flush:      every slice, close the downsample slot and redraw
//!     - run_durations:  every telemetry interval, publish master durations
//!
//!     workers only talk to each other through the engine's lock.
//!
//! shutdown:
//!     every loop selects on the shared CancellationToken, so the blocking
//!     receive returns as soon as shutdown is requested. a receive error is
//!     treated as the transport closing and also ends ingestion.
//!
//! relationships:
//!     - used by: main.rs (spawns workers, serves dashboard)
//!     - uses: engine.rs, reset.rs, telemetry.rs, display.rs
//!
//! ==============================================================================

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::display::{produce_display_frame, DisplayGeometry, DisplaySink, PixelGrid};
use crate::engine::{Ingest, SwarmEngine};
use crate::reset::{ResetCoordinator, ResetOutcome};
use crate::telemetry::{RateLimiter, TelemetryEvent, TelemetryHandle};

#[derive(Clone)]
pub struct SwarmRuntime {
    engine: SwarmEngine,
    coordinator: Arc<ResetCoordinator>,
    telemetry: TelemetryHandle,
    display: Arc<dyn DisplaySink>,
    geometry: DisplayGeometry,
    cancel: CancellationToken,
    show_frames: bool,
}

impl SwarmRuntime {
    pub fn new(
        engine: SwarmEngine,
        coordinator: Arc<ResetCoordinator>,
        telemetry: TelemetryHandle,
        display: Arc<dyn DisplaySink>,
        geometry: DisplayGeometry,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            coordinator,
            telemetry,
            display,
            geometry,
            cancel,
            show_frames: false,
        }
    }

    /// log every accepted frame at info instead of debug
    pub fn with_frame_logging(mut self, show_frames: bool) -> Self {
        self.show_frames = show_frames;
        self
    }

    pub fn engine(&self) -> &SwarmEngine {
        &self.engine
    }

    pub async fn request_reset(&self) -> ResetOutcome {
        self.coordinator.request_reset().await
    }

    /// run a reset in the background; used by the button worker
    pub fn spawn_reset(&self) {
        let _ = self.coordinator.start_reset();
    }

    /// block shutdown until in-flight resets have rotated their logs
    pub async fn wait_for_resets(&self) {
        self.coordinator.wait_idle().await;
    }

    pub async fn display_frame(&self) -> PixelGrid {
        produce_display_frame(&self.engine.ring().await, self.geometry)
    }

    pub fn render(&self, frame: &PixelGrid) {
        if let Err(e) = self.display.render(frame) {
            tracing::warn!("[DISPLAY] ⚠ Render failed: {}", e);
        }
    }

    // ==========================================================================
    // ingestion
    // ==========================================================================

    pub async fn run_ingest(self, socket: Arc<UdpSocket>, max_datagram: usize, reading_interval: Duration) {
        let mut buf = vec![0u8; max_datagram.max(1)];
        let mut limiter = RateLimiter::new(reading_interval);
        if let Ok(addr) = socket.local_addr() {
            info!("[INGEST] Listening for swarm datagrams on {}", addr);
        }

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                r = socket.recv_from(&mut buf) => r,
            };

            match received {
                Ok((len, source)) => {
                    self.handle_datagram(&buf[..len], source.ip(), &mut limiter).await;
                }
                Err(e) => {
                    info!("[INGEST] Transport closed ({}) - stopping", e);
                    break;
                }
            }
        }
        debug!("[INGEST] Worker stopped");
    }

    pub async fn handle_datagram(&self, payload: &[u8], source: IpAddr, limiter: &mut RateLimiter) -> Ingest {
        let outcome = self.engine.ingest(payload, source).await;
        match &outcome {
            Ingest::Accepted(accepted) => {
                if accepted.observation.first_seen {
                    info!(
                        "[INGEST] New swarm node {} assigned {:?}",
                        accepted.node_id, accepted.observation.color
                    );
                }
                if accepted.observation.took_over {
                    info!(
                        "[INGEST] New master detected: {} ({}, {:?})",
                        accepted.node_id, source, accepted.observation.color
                    );
                }
                if self.show_frames {
                    info!(
                        "[INGEST] {} from {}: {} (master {}s)",
                        accepted.node_id, source, accepted.value, accepted.observation.master_seconds
                    );
                } else {
                    debug!("[INGEST] {} from {}: {}", accepted.node_id, source, accepted.value);
                }
                if limiter.ready(Instant::now()) {
                    let _ = self.telemetry.publish(TelemetryEvent::Reading(accepted.value));
                }
            }
            Ingest::Heartbeat => debug!("[INGEST] Reset acknowledgement from {}", source),
            Ingest::Malformed(e) => debug!("[INGEST] Dropped malformed frame from {}: {}", source, e),
            Ingest::Suppressed => debug!("[INGEST] Dropped frame from {} during reset", source),
        }
        outcome
    }

    // ==========================================================================
    // timers
    // ==========================================================================

    pub async fn run_flush(self, slice: Duration) {
        // first flush one full slice after start
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + slice, slice);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Some(value) = self.engine.flush().await {
                debug!("[DISPLAY] Slice average {}", value);
                let frame = self.display_frame().await;
                self.render(&frame);
            }
        }
        debug!("[DISPLAY] Flush worker stopped");
    }

    pub async fn run_durations(self, interval: Duration) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            self.publish_durations().await;
        }
        debug!("[TELEMETRY] Duration worker stopped");
    }

    /// one duration event per known node; nothing while resetting
    pub async fn publish_durations(&self) -> usize {
        if self.engine.is_resetting().await {
            return 0;
        }
        let durations = self.engine.durations().await;
        for (node_id, seconds) in &durations {
            let _ = self.telemetry.publish(TelemetryEvent::Duration {
                node_id: node_id.clone(),
                seconds: *seconds,
            });
        }
        durations.len()
    }
}
