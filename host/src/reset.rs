//! ==============================================================================
//! reset.rs - coordinated reset protocol
//! ==============================================================================
//!
//! state machine: Idle -> Resetting -> Idle
//!
//! one call to `request_reset` runs, in order:
//!     1. enter Resetting                      \
//!     2. broadcast +++RESET_REQUESTED***       |  one critical section on
//!     3. clear nodes, master, durations,       |  the engine lock
//!        window, slice; ring back to zeros    /
//!     4. publish the reset telemetry event, redraw the display, rotate logs
//!     5. hold the indicator for the dwell period (lock released)
//!     6. back to Idle
//!
//! a request that arrives while another reset is running is a no-op.
//!
//! the sequence always runs on its own task, tracked so shutdown can wait
//! for it. dropping the future returned by `request_reset` (an http client
//! hanging up mid-dwell) does not stop the reset from reaching Idle.
//!
//! ==============================================================================

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::display::{produce_display_frame, DisplayGeometry, DisplaySink};
use crate::engine::SwarmEngine;
use crate::gpio::ResetIndicator;
use crate::persistence::LogRotator;
use crate::protocol::RESET_FRAME;
use crate::telemetry::{TelemetryEvent, TelemetryHandle};

/// outbound side of the swarm transport
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn broadcast(&self, frame: &[u8]) -> io::Result<()>;
}

/// broadcasts on the same socket the host listens on
pub struct UdpBroadcaster {
    socket: Arc<tokio::net::UdpSocket>,
    target: SocketAddr,
}

impl UdpBroadcaster {
    pub fn new(socket: Arc<tokio::net::UdpSocket>, target: SocketAddr) -> Self {
        Self { socket, target }
    }
}

#[async_trait]
impl Broadcaster for UdpBroadcaster {
    async fn broadcast(&self, frame: &[u8]) -> io::Result<()> {
        self.socket.send_to(frame, self.target).await.map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetOutcome {
    Completed { cleared_nodes: usize },
    AlreadyInProgress,
    /// the reset task panicked or was aborted
    Failed,
}

pub struct ResetCoordinator {
    engine: SwarmEngine,
    transport: Arc<dyn Broadcaster>,
    telemetry: TelemetryHandle,
    indicator: ResetIndicator,
    display: Arc<dyn DisplaySink>,
    geometry: DisplayGeometry,
    rotator: Option<Arc<Mutex<LogRotator>>>,
    dwell: Duration,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ResetCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: SwarmEngine,
        transport: Arc<dyn Broadcaster>,
        telemetry: TelemetryHandle,
        indicator: ResetIndicator,
        display: Arc<dyn DisplaySink>,
        geometry: DisplayGeometry,
        rotator: Option<Arc<Mutex<LogRotator>>>,
        dwell: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            engine,
            transport,
            telemetry,
            indicator,
            display,
            geometry,
            rotator,
            dwell,
            cancel,
            tasks: TaskTracker::new(),
        }
    }

    /// start a reset on a tracked task and return immediately
    pub fn start_reset(self: &Arc<Self>) -> JoinHandle<ResetOutcome> {
        let this = self.clone();
        self.tasks.spawn(async move { this.run_reset().await })
    }

    /// start a reset and wait for it, dwell included
    pub async fn request_reset(self: &Arc<Self>) -> ResetOutcome {
        match self.start_reset().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("[RESET] Reset task failed: {}", e);
                ResetOutcome::Failed
            }
        }
    }

    /// wait for every reset started so far; used on shutdown
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    async fn run_reset(&self) -> ResetOutcome {
        let (archive, ring) = {
            let mut state = self.engine.lock().await;
            if !state.begin_reset() {
                info!("[RESET] Reset already in progress - ignoring request");
                return ResetOutcome::AlreadyInProgress;
            }

            info!("[RESET] Broadcast: {}", String::from_utf8_lossy(RESET_FRAME));
            if let Err(e) = self.transport.broadcast(RESET_FRAME).await {
                warn!("[RESET] ⚠ Reset broadcast failed: {}", e);
            }

            let archive = state.clear(chrono::Utc::now());
            (archive, state.ring())
        };
        let cleared_nodes = archive.durations.len();

        let _ = self.telemetry.publish(TelemetryEvent::Reset);

        if let Err(e) = self.display.render(&produce_display_frame(&ring, self.geometry)) {
            warn!("[DISPLAY] ⚠ Render failed: {}", e);
        }

        if let Some(rotator) = &self.rotator {
            let rotator = rotator.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut rotator = rotator.lock().unwrap_or_else(|e| e.into_inner());
                rotator.rotate(&archive)
            })
            .await;
            match result {
                Ok(Ok(path)) => info!("[RESET] Archived previous session to {}", path.display()),
                Ok(Err(e)) => warn!("[RESET] ⚠ Log rotation failed: {:#}", e),
                Err(e) => warn!("[RESET] ⚠ Log rotation task failed: {}", e),
            }
        }

        self.indicator.set(true);
        tokio::select! {
            _ = tokio::time::sleep(self.dwell) => {}
            _ = self.cancel.cancelled() => {}
        }
        self.indicator.set(false);

        self.engine.lock().await.finish_reset();
        info!("[RESET] Reset complete ({} nodes cleared)", cleared_nodes);
        ResetOutcome::Completed { cleared_nodes }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::display::LogDisplay;
    use crate::domain::{NodeColor, Phase};
    use crate::engine::{EngineSettings, Ingest};
    use crate::hal::MockHal;
    use crate::telemetry;
    use std::net::{IpAddr, Ipv4Addr};

    const SRC: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 4, 2));

    /// records every broadcast frame
    #[derive(Default)]
    pub(crate) struct RecordingBroadcaster {
        pub frames: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn broadcast(&self, frame: &[u8]) -> io::Result<()> {
            self.frames.lock().unwrap().push(frame.to_vec());
            Ok(())
        }
    }

    struct Fixture {
        engine: SwarmEngine,
        transport: Arc<RecordingBroadcaster>,
        hal: Arc<MockHal>,
        events: tokio::sync::mpsc::Receiver<TelemetryEvent>,
        coordinator: Arc<ResetCoordinator>,
        _logs: tempfile::TempDir,
        rotator: Arc<Mutex<LogRotator>>,
    }

    fn fixture(dwell: Duration) -> Fixture {
        let engine = SwarmEngine::new(&EngineSettings::default());
        let transport = Arc::new(RecordingBroadcaster::default());
        let hal = Arc::new(MockHal::new());
        let (handle, events) = telemetry::channel(16);
        let logs = tempfile::tempdir().unwrap();
        let rotator = Arc::new(Mutex::new(LogRotator::new(logs.path()).unwrap()));
        let coordinator = Arc::new(ResetCoordinator::new(
            engine.clone(),
            transport.clone(),
            handle,
            ResetIndicator::new(hal.clone(), 26),
            Arc::new(LogDisplay),
            DisplayGeometry { width: 8, height: 8, max_reading: 1023 },
            Some(rotator.clone()),
            dwell,
            CancellationToken::new(),
        ));
        Fixture { engine, transport, hal, events, coordinator, _logs: logs, rotator }
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let mut f = fixture(Duration::from_millis(10));
        f.engine.ingest(b"+++A,100***", SRC).await;
        f.engine.ingest(b"+++B,900***", SRC).await;
        f.engine.flush().await;
        f.engine.ingest(b"+++A,200***", SRC).await;

        let first_log = f.rotator.lock().unwrap().current().to_path_buf();
        let outcome = f.coordinator.request_reset().await;
        assert_eq!(outcome, ResetOutcome::Completed { cleared_nodes: 2 });

        let snap = f.engine.snapshot().await;
        assert_eq!(snap.phase, Phase::Idle);
        assert!(snap.nodes.is_empty());
        assert!(snap.current_master.is_none());
        assert_eq!(snap.master_color, NodeColor::Default);
        assert_eq!(snap.master_seconds, 0);
        assert!(snap.window.is_empty());
        assert_eq!(snap.ring, vec![0; 8]);
        assert_eq!(snap.pending_slot, 0);

        assert_eq!(*f.transport.frames.lock().unwrap(), vec![RESET_FRAME.to_vec()]);
        assert_eq!(f.events.try_recv().unwrap(), TelemetryEvent::Reset);
        assert_eq!(f.hal.output_history(), vec![(26, true), (26, false)]);

        let saved = std::fs::read_to_string(first_log).unwrap();
        assert!(saved.contains("Swarm ID: A, Total Master Duration: 2 seconds"));
        assert!(saved.contains("Swarm ID: B, Total Master Duration: 1 seconds"));
    }

    #[tokio::test]
    async fn test_frames_during_dwell_are_suppressed() {
        let f = fixture(Duration::from_millis(200));
        f.engine.ingest(b"+++A,100***", SRC).await;

        let coordinator = f.coordinator.clone();
        let reset = tokio::spawn(async move { coordinator.request_reset().await });

        // wait for the clear step, then send while the flag is still set
        while !f.engine.is_resetting().await {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.engine.ingest(b"+++B,500***", SRC).await, Ingest::Suppressed);
        assert!(f.engine.snapshot().await.nodes.is_empty());

        assert!(matches!(reset.await.unwrap(), ResetOutcome::Completed { .. }));
        assert!(matches!(f.engine.ingest(b"+++B,500***", SRC).await, Ingest::Accepted(_)));
        assert_eq!(f.engine.snapshot().await.current_master.as_deref(), Some("B"));
    }

    #[tokio::test]
    async fn test_second_request_is_ignored() {
        let mut f = fixture(Duration::from_millis(200));

        let coordinator = f.coordinator.clone();
        let first = tokio::spawn(async move { coordinator.request_reset().await });
        while !f.engine.is_resetting().await {
            tokio::task::yield_now().await;
        }

        assert_eq!(f.coordinator.request_reset().await, ResetOutcome::AlreadyInProgress);
        assert!(matches!(first.await.unwrap(), ResetOutcome::Completed { .. }));

        assert_eq!(f.transport.frames.lock().unwrap().len(), 1);
        assert_eq!(f.events.try_recv().unwrap(), TelemetryEvent::Reset);
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_cuts_dwell_short() {
        let engine = SwarmEngine::new(&EngineSettings::default());
        let cancel = CancellationToken::new();
        let coordinator = Arc::new(ResetCoordinator::new(
            engine.clone(),
            Arc::new(RecordingBroadcaster::default()),
            TelemetryHandle::disabled(),
            ResetIndicator::new(Arc::new(MockHal::new()), 26),
            Arc::new(LogDisplay),
            DisplayGeometry { width: 8, height: 8, max_reading: 1023 },
            None,
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        cancel.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), coordinator.request_reset())
            .await
            .unwrap();
        assert_eq!(outcome, ResetOutcome::Completed { cleared_nodes: 0 });
        assert!(!engine.is_resetting().await);
    }

    #[tokio::test]
    async fn test_dropped_request_still_returns_to_idle() {
        let f = fixture(Duration::from_millis(300));
        f.engine.ingest(b"+++A,100***", SRC).await;

        // caller gives up mid-dwell
        let waited = tokio::time::timeout(Duration::from_millis(50), f.coordinator.request_reset()).await;
        assert!(waited.is_err());
        assert!(f.engine.is_resetting().await);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!f.engine.is_resetting().await);
        assert!(matches!(f.engine.ingest(b"+++A,100***", SRC).await, Ingest::Accepted(_)));
        assert_eq!(f.hal.output(26), Some(false));
    }

    #[tokio::test]
    async fn test_wait_idle_covers_started_resets() {
        let f = fixture(Duration::from_secs(3600));
        f.engine.ingest(b"+++A,100***", SRC).await;
        let first_log = f.rotator.lock().unwrap().current().to_path_buf();

        let _detached = f.coordinator.start_reset();
        while !f.engine.is_resetting().await {
            tokio::task::yield_now().await;
        }

        f.coordinator.cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), f.coordinator.wait_idle())
            .await
            .unwrap();

        assert!(!f.engine.is_resetting().await);
        assert!(first_log.exists(), "rotation finished before shutdown");
    }

    #[tokio::test]
    async fn test_udp_broadcaster_delivers_reset_frame() {
        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let broadcaster = UdpBroadcaster::new(socket, receiver.local_addr().unwrap());

        broadcaster.broadcast(RESET_FRAME).await.unwrap();

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(1), receiver.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..len], RESET_FRAME);
    }
}
