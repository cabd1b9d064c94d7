//! master election and duration accounting.
//!
//! the most recently heard-from node is master, immediately, with no
//! hysteresis. durations count accepted datagrams, not wall-clock seconds.

use crate::domain::{NodeColor, SwarmNode};

/// what one accepted reading did to the election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub color: NodeColor,
    pub master_seconds: u64,
    /// first datagram from this id since the last reset
    pub first_seen: bool,
    /// master changed hands on this datagram
    pub took_over: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ElectionTracker {
    /// first-seen order; colors depend on it
    nodes: Vec<SwarmNode>,
    current_master: Option<String>,
}

impl ElectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// attribute one accepted reading to `node_id`
    pub fn observe(&mut self, node_id: &str) -> Observation {
        let (index, first_seen) = match self.nodes.iter().position(|n| n.id == node_id) {
            Some(index) => (index, false),
            None => {
                self.nodes.push(SwarmNode {
                    id: node_id.to_string(),
                    color: NodeColor::for_arrival(self.nodes.len()),
                    master_seconds: 0,
                });
                (self.nodes.len() - 1, true)
            }
        };

        let took_over = self.current_master.as_deref() != Some(node_id);
        if took_over {
            self.current_master = Some(node_id.to_string());
        }

        let node = &mut self.nodes[index];
        node.master_seconds += 1;

        Observation {
            color: node.color,
            master_seconds: node.master_seconds,
            first_seen,
            took_over,
        }
    }

    pub fn current_master(&self) -> Option<&SwarmNode> {
        let id = self.current_master.as_deref()?;
        self.node(id)
    }

    pub fn node(&self, id: &str) -> Option<&SwarmNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn nodes(&self) -> &[SwarmNode] {
        &self.nodes
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.current_master = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_counts_every_frame() {
        let mut tracker = ElectionTracker::new();
        for n in 1..=5 {
            let obs = tracker.observe("A");
            assert_eq!(obs.master_seconds, n);
            assert_eq!(tracker.current_master().map(|m| m.id.as_str()), Some("A"));
        }
    }

    #[test]
    fn test_immediate_takeover() {
        let mut tracker = ElectionTracker::new();
        assert!(tracker.observe("A").took_over);
        assert!(!tracker.observe("A").took_over);
        assert!(tracker.observe("B").took_over);
        assert!(tracker.observe("A").took_over);

        assert_eq!(tracker.node("A").unwrap().master_seconds, 3);
        assert_eq!(tracker.node("B").unwrap().master_seconds, 1);
    }

    #[test]
    fn test_first_come_colors_are_stable() {
        let mut tracker = ElectionTracker::new();
        tracker.observe("B");
        tracker.observe("A");
        tracker.observe("C");
        tracker.observe("D");
        tracker.observe("B");

        assert_eq!(tracker.node("B").unwrap().color, NodeColor::Red);
        assert_eq!(tracker.node("A").unwrap().color, NodeColor::Green);
        assert_eq!(tracker.node("C").unwrap().color, NodeColor::Yellow);
        assert_eq!(tracker.node("D").unwrap().color, NodeColor::Yellow);
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut tracker = ElectionTracker::new();
        tracker.observe("A");
        tracker.observe("B");
        tracker.clear();
        assert!(tracker.nodes().is_empty());
        assert!(tracker.current_master().is_none());

        let obs = tracker.observe("B");
        assert!(obs.first_seen);
        assert_eq!(obs.color, NodeColor::Red);
    }
}
