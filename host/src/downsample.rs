//! downsampled trend for the led matrix.
//!
//! readings accumulate into the current slice; the flush timer averages the
//! slice into one value and pushes it onto a fixed-capacity ring. an empty
//! slice pushes nothing, so quiet periods keep the previous trend instead of
//! drawing zeros.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct DownsampleBuffer {
    slot: Vec<u16>,
    ring: VecDeque<u16>,
    capacity: usize,
}

impl DownsampleBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let mut buffer = Self {
            slot: Vec::new(),
            ring: VecDeque::with_capacity(capacity),
            capacity,
        };
        buffer.reset();
        buffer
    }

    pub fn accumulate(&mut self, value: u16) {
        self.slot.push(value);
    }

    /// average the current slice into the ring.
    /// returns the pushed value, or `None` when the slice was empty.
    pub fn flush(&mut self) -> Option<u16> {
        if self.slot.is_empty() {
            return None;
        }

        let sum: u64 = self.slot.iter().map(|&v| u64::from(v)).sum();
        let mean = (sum / self.slot.len() as u64) as u16;
        self.slot.clear();

        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(mean);
        Some(mean)
    }

    /// empty the slice and refill the ring with zeros
    pub fn reset(&mut self) {
        self.slot.clear();
        self.ring.clear();
        self.ring.extend(std::iter::repeat(0).take(self.capacity));
    }

    /// ring contents, oldest first; always `capacity` long
    pub fn ring(&self) -> Vec<u16> {
        self.ring.iter().copied().collect()
    }

    pub fn pending(&self) -> usize {
        self.slot.len()
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_with_zeros() {
        let buf = DownsampleBuffer::new(8);
        assert_eq!(buf.ring(), vec![0; 8]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_flush_averages_slice() {
        let mut buf = DownsampleBuffer::new(8);
        buf.accumulate(300);
        buf.accumulate(500);
        assert_eq!(buf.flush(), Some(400));
        assert_eq!(buf.ring(), vec![0, 0, 0, 0, 0, 0, 0, 400]);
        assert_eq!(buf.pending(), 0);
    }

    #[test]
    fn test_flush_truncates_mean() {
        let mut buf = DownsampleBuffer::new(4);
        buf.accumulate(1);
        buf.accumulate(2);
        assert_eq!(buf.flush(), Some(1));
    }

    #[test]
    fn test_empty_flush_is_noop() {
        let mut buf = DownsampleBuffer::new(4);
        buf.accumulate(10);
        buf.flush();
        let before = buf.ring();
        assert_eq!(buf.flush(), None);
        assert_eq!(buf.ring(), before);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let mut buf = DownsampleBuffer::new(3);
        for v in [10, 20, 30, 40] {
            buf.accumulate(v);
            buf.flush();
        }
        assert_eq!(buf.ring(), vec![20, 30, 40]);
        assert_eq!(buf.ring().len(), buf.capacity());
    }

    #[test]
    fn test_reset_refills_zeros() {
        let mut buf = DownsampleBuffer::new(3);
        buf.accumulate(10);
        buf.flush();
        buf.accumulate(99);
        buf.reset();
        assert_eq!(buf.ring(), vec![0, 0, 0]);
        assert_eq!(buf.flush(), None);
    }
}
