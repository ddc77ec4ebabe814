// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pending points of the batched writer.
//!
//! A batch leaves the buffer when it reaches `batch_size` points, or when
//! its oldest point has waited `max_age`.

use std::time::{Duration, Instant};

pub struct BatchBuffer {
    lines: Vec<String>,
    batch_size: usize,
    max_age: Duration,
    /// Arrival of the oldest pending point.
    oldest: Option<Instant>,
}

impl BatchBuffer {
    pub fn new(batch_size: usize, max_age: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            lines: Vec::with_capacity(batch_size),
            batch_size,
            max_age,
            oldest: None,
        }
    }

    /// Append a point; hands back the batch it completes.
    pub fn push(&mut self, line: String) -> Option<Vec<String>> {
        self.oldest.get_or_insert_with(Instant::now);
        self.lines.push(line);
        (self.lines.len() >= self.batch_size).then(|| self.drain())
    }

    /// The pending batch, if its oldest point is at least `max_age` old at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<Vec<String>> {
        let oldest = self.oldest?;
        (now.saturating_duration_since(oldest) >= self.max_age).then(|| self.drain())
    }

    /// Everything pending, regardless of age.
    pub fn drain(&mut self) -> Vec<String> {
        self.oldest = None;
        std::mem::replace(&mut self.lines, Vec::with_capacity(self.batch_size))
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_holds_points_until_full() {
        let mut buf = BatchBuffer::new(3, Duration::from_secs(60));

        assert!(buf.push("a".to_string()).is_none());
        assert!(buf.push("b".to_string()).is_none());
        assert_eq!(buf.len(), 2);

        let batch = buf.push("c".to_string()).expect("batch released");
        assert_eq!(batch, vec!["a", "b", "c"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_age_counts_from_oldest_point() {
        let mut buf = BatchBuffer::new(1000, Duration::from_secs(10));
        let start = Instant::now();
        buf.push("first".to_string());
        buf.push("second".to_string());

        assert!(buf.take_due(start).is_none());
        let later = start + Duration::from_secs(11);
        assert_eq!(buf.take_due(later), Some(vec!["first".to_string(), "second".to_string()]));
        assert!(buf.take_due(later + Duration::from_secs(60)).is_none());
    }

    #[test]
    fn test_empty_buffer_is_never_due() {
        let mut buf = BatchBuffer::new(10, Duration::ZERO);
        assert!(buf.take_due(Instant::now()).is_none());
    }

    #[test]
    fn test_drain_resets_age() {
        let mut buf = BatchBuffer::new(10, Duration::from_secs(10));
        buf.push("x".to_string());
        assert_eq!(buf.drain().len(), 1);

        buf.push("y".to_string());
        assert!(buf.take_due(Instant::now()).is_none());
    }

    #[test]
    fn test_zero_batch_size_is_clamped() {
        let mut buf = BatchBuffer::new(0, Duration::from_secs(60));
        assert!(buf.push("x".to_string()).is_some());
    }
}
