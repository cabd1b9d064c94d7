//! ==============================================================================
//! engine.rs - the aggregation engine
//! ==============================================================================
//!
//! purpose:
//!     owns every piece of derived state: election, durations, the sliding
//!     window, the downsample buffer and the per-sender raw logs.
//!
//! concurrency:
//!     all of it lives in one `EngineState` behind one `RwLock`. workers never
//!     hold references into it across awaits; they call a method, the method
//!     takes the lock, and the lock is released before any sleep. snapshots
//!     take the read lock once, so master, color and duration always come
//!     from the same instant.
//!
//! reset gating:
//!     the `Resetting` phase is checked inside the same critical section as
//!     every mutation, so an inbound frame either lands fully before the
//!     reset clears state or is suppressed.
//!
//! ==============================================================================

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

use crate::config::HostConfig;
use crate::domain::{EngineSnapshot, NodeColor, Phase, Reading};
use crate::downsample::DownsampleBuffer;
use crate::election::{ElectionTracker, Observation};
use crate::persistence::{LogEntry, RotationArchive};
use crate::protocol::{self, Frame, FrameError};
use crate::window::SlidingWindow;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub horizon: TimeDelta,
    pub max_window_entries: usize,
    pub ring_capacity: usize,
    pub max_log_entries_per_sender: usize,
}

impl EngineSettings {
    pub fn from_config(config: &HostConfig) -> Self {
        Self {
            horizon: TimeDelta::seconds(config.window.horizon_seconds as i64),
            max_window_entries: config.window.max_entries,
            ring_capacity: config.display.ring_capacity,
            max_log_entries_per_sender: config.persistence.max_entries_per_sender,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&HostConfig::default())
    }
}

/// an accepted reading and its effect on the election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub node_id: String,
    pub value: u16,
    pub observation: Observation,
}

/// result of offering one datagram to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingest {
    Accepted(Accepted),
    /// reset acknowledgement from a node; nothing changes
    Heartbeat,
    Malformed(FrameError),
    /// dropped because a reset is in progress
    Suppressed,
}

#[derive(Debug)]
pub struct EngineState {
    phase: Phase,
    election: ElectionTracker,
    window: SlidingWindow,
    downsample: DownsampleBuffer,
    sender_logs: BTreeMap<IpAddr, VecDeque<LogEntry>>,
    max_log_entries: usize,
}

impl EngineState {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            phase: Phase::Idle,
            election: ElectionTracker::new(),
            window: SlidingWindow::new(settings.horizon, settings.max_window_entries),
            downsample: DownsampleBuffer::new(settings.ring_capacity),
            sender_logs: BTreeMap::new(),
            max_log_entries: settings.max_log_entries_per_sender.max(1),
        }
    }

    pub fn is_resetting(&self) -> bool {
        self.phase == Phase::Resetting
    }

    /// decode and apply one raw datagram
    #[cfg(test)]
    pub fn ingest(&mut self, payload: &[u8], source: IpAddr, now: DateTime<Utc>) -> Ingest {
        match protocol::decode(payload) {
            Ok(frame) => self.apply(frame, source, now),
            Err(e) => Ingest::Malformed(e),
        }
    }

    /// apply an already decoded frame
    pub fn apply(&mut self, frame: Frame, source: IpAddr, now: DateTime<Utc>) -> Ingest {
        if self.is_resetting() {
            return Ingest::Suppressed;
        }

        let (node_id, value) = match frame {
            Frame::ResetAck => return Ingest::Heartbeat,
            Frame::Reading { node_id, value } => (node_id, value),
        };

        self.downsample.accumulate(value);
        self.window.insert(Reading { timestamp: now, node_id: node_id.clone(), value });

        let log = self.sender_logs.entry(source).or_default();
        if log.len() == self.max_log_entries {
            log.pop_front();
        }
        log.push_back(LogEntry { timestamp: now, node_id: node_id.clone(), value });

        let observation = self.election.observe(&node_id);
        Ingest::Accepted(Accepted { node_id, value, observation })
    }

    /// close the current downsample slice; suppressed while resetting
    pub fn flush(&mut self) -> Option<u16> {
        if self.is_resetting() {
            return None;
        }
        self.downsample.flush()
    }

    /// enter `Resetting`. false when a reset is already running.
    pub fn begin_reset(&mut self) -> bool {
        if self.is_resetting() {
            return false;
        }
        self.phase = Phase::Resetting;
        true
    }

    /// capture the archive, then clear every derived entity.
    /// the phase is left untouched.
    pub fn clear(&mut self, now: DateTime<Utc>) -> RotationArchive {
        let archive = self.archive(now);
        self.election.clear();
        self.window.clear();
        self.downsample.reset();
        self.sender_logs.clear();
        archive
    }

    pub fn finish_reset(&mut self) {
        self.phase = Phase::Idle;
    }

    /// duration totals and raw logs as they stand, without clearing
    pub fn archive(&self, now: DateTime<Utc>) -> RotationArchive {
        RotationArchive {
            taken_at: now,
            durations: self.durations(),
            sender_logs: self
                .sender_logs
                .iter()
                .map(|(ip, log)| (*ip, log.iter().cloned().collect()))
                .collect(),
        }
    }

    pub fn durations(&self) -> Vec<(String, u64)> {
        self.election
            .nodes()
            .iter()
            .map(|n| (n.id.clone(), n.master_seconds))
            .collect()
    }

    pub fn ring(&self) -> Vec<u16> {
        self.downsample.ring()
    }

    pub fn snapshot(&self, now: DateTime<Utc>) -> EngineSnapshot {
        let master = self.election.current_master();
        EngineSnapshot {
            phase: self.phase,
            current_master: master.map(|m| m.id.clone()),
            master_color: master.map(|m| m.color).unwrap_or(NodeColor::Default),
            master_seconds: master.map(|m| m.master_seconds).unwrap_or(0),
            nodes: self.election.nodes().to_vec(),
            window: self.window.snapshot(now),
            ring: self.downsample.ring(),
            pending_slot: self.downsample.pending(),
            taken_at: now,
        }
    }
}

/// clone-able handle to the shared engine state
#[derive(Clone)]
pub struct SwarmEngine {
    state: Arc<RwLock<EngineState>>,
}

impl SwarmEngine {
    pub fn new(settings: &EngineSettings) -> Self {
        Self { state: Arc::new(RwLock::new(EngineState::new(settings))) }
    }

    pub async fn ingest(&self, payload: &[u8], source: IpAddr) -> Ingest {
        // decode outside the lock; only valid frames contend for it
        let frame = match protocol::decode(payload) {
            Ok(frame) => frame,
            Err(e) => return Ingest::Malformed(e),
        };
        self.state.write().await.apply(frame, source, Utc::now())
    }

    pub async fn flush(&self) -> Option<u16> {
        self.state.write().await.flush()
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        self.state.read().await.snapshot(Utc::now())
    }

    pub async fn durations(&self) -> Vec<(String, u64)> {
        self.state.read().await.durations()
    }

    pub async fn ring(&self) -> Vec<u16> {
        self.state.read().await.ring()
    }

    pub async fn is_resetting(&self) -> bool {
        self.state.read().await.is_resetting()
    }

    pub async fn archive(&self) -> RotationArchive {
        self.state.read().await.archive(Utc::now())
    }

    /// exclusive access for the reset critical section
    pub(crate) async fn lock(&self) -> RwLockWriteGuard<'_, EngineState> {
        self.state.write().await
    }
}
