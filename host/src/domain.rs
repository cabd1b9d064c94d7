use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// a single accepted sensor reading
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// wall-clock time the datagram was accepted
    pub timestamp: DateTime<Utc>,
    /// swarm id of the sender (e.g., "A" or "esp-3")
    pub node_id: String,
    /// analog reading, 0..=1023
    pub value: u16,
}

/// display color given to a swarm node.
/// only three states exist on the indicator, so the third and every later
/// node share yellow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeColor {
    Red,
    Green,
    Yellow,
    /// no master / unknown node
    Default,
}

impl NodeColor {
    /// first-come assignment: 0 -> red, 1 -> green, anything later -> yellow
    pub fn for_arrival(index: usize) -> Self {
        match index {
            0 => NodeColor::Red,
            1 => NodeColor::Green,
            _ => NodeColor::Yellow,
        }
    }

    /// css color used by the dashboard
    pub fn css(self) -> &'static str {
        match self {
            NodeColor::Red => "red",
            NodeColor::Green => "green",
            NodeColor::Yellow => "gold",
            NodeColor::Default => "steelblue",
        }
    }
}

/// a swarm member seen since the last reset
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmNode {
    pub id: String,
    pub color: NodeColor,
    /// grows by one per accepted datagram attributed to this node,
    /// not per elapsed second
    pub master_seconds: u64,
}

/// whether the engine is accepting datagrams
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Resetting,
}

/// consistent view of the whole engine, taken under one lock
#[derive(Clone, Debug, Serialize)]
pub struct EngineSnapshot {
    pub phase: Phase,
    pub current_master: Option<String>,
    pub master_color: NodeColor,
    pub master_seconds: u64,
    pub nodes: Vec<SwarmNode>,
    /// readings inside the trailing horizon, oldest first
    pub window: Vec<Reading>,
    /// downsampled display ring, oldest first
    pub ring: Vec<u16>,
    /// values waiting in the current downsample slice
    pub pending_slot: usize,
    pub taken_at: DateTime<Utc>,
}
