//! Batch accumulator: decides when buffered events become a committable batch.
//!
//! ```text
//!   accept        flush()         write ok
//! Idle ──▶ Open ──────────▶ Flushing ──────────▶ Idle
//!            ▲                 │
//!            └─────────────────┘ write failed (same batch kept)
//! ```
//!
//! `accept` never flushes on its own; the caller checks `should_flush` after
//! every accept. While the batch returned by `flush` is borrowed the
//! accumulator cannot be mutated, so a batch handed to the sink is never
//! modified before the write outcome is reported.

use crate::config::BatchConfig;
use crate::error::AccumulatorError;
use crate::event::PositionEvent;
use crate::kafka::PartitionOffsets;
use std::time::{Duration, Instant};
use tracing::debug;

/// Accumulator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorState {
    /// No events buffered
    Idle,
    /// Events buffered, `batch_open_time` set
    Open,
    /// Batch handed to the sink, outcome pending
    Flushing,
}

/// An ordered group of events flushed to the sink as one atomic write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    events: Vec<PositionEvent>,
    opened_at: Option<Instant>,
    offsets: PartitionOffsets,
}

impl Batch {
    /// Events in acceptance order.
    pub fn events(&self) -> &[PositionEvent] {
        &self.events
    }

    /// Number of events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if the batch holds no events.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// When the first event of this batch was accepted.
    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Time since the batch opened, zero for an empty batch.
    pub fn age(&self, now: Instant) -> Duration {
        self.opened_at
            .map(|opened| now.saturating_duration_since(opened))
            .unwrap_or_default()
    }

    /// Highest consumed offset per partition covered by this batch.
    pub fn offsets(&self) -> &PartitionOffsets {
        &self.offsets
    }
}

/// Owns the in-flight batch and its flush state machine.
pub struct BatchAccumulator {
    batch_size: usize,
    max_batch_time: Duration,
    batch: Batch,
    state: AccumulatorState,
    consecutive_failures: u32,
}

impl BatchAccumulator {
    /// Create an accumulator with the given flush thresholds.
    pub fn new(batch_size: usize, max_batch_time: Duration) -> Self {
        Self {
            batch_size,
            max_batch_time,
            batch: Batch::default(),
            state: AccumulatorState::Idle,
            consecutive_failures: 0,
        }
    }

    /// Create an accumulator from the batch configuration.
    pub fn from_config(config: &BatchConfig) -> Self {
        Self::new(
            config.batch_size,
            Duration::from_millis(config.max_batch_time_ms),
        )
    }

    /// Append an event, stamping `batch_open_time` with the current time if idle.
    pub fn accept(&mut self, event: PositionEvent) -> Result<usize, AccumulatorError> {
        self.accept_at(event, Instant::now())
    }

    /// Append an event as of `now`.
    pub fn accept_at(
        &mut self,
        event: PositionEvent,
        now: Instant,
    ) -> Result<usize, AccumulatorError> {
        match self.state {
            AccumulatorState::Flushing => return Err(AccumulatorError::FlushInProgress),
            AccumulatorState::Idle => {
                self.batch.opened_at = Some(now);
                self.state = AccumulatorState::Open;
            }
            AccumulatorState::Open => {}
        }

        self.batch.events.push(event);
        Ok(self.batch.events.len())
    }

    /// Record a consumed message position.
    ///
    /// Called for every message, including ones that failed to decode, so that
    /// skipped positions are committed together with the next durable batch.
    pub fn track_offset(
        &mut self,
        topic: &str,
        partition: i32,
        offset: i64,
    ) -> Result<(), AccumulatorError> {
        if self.state == AccumulatorState::Flushing {
            return Err(AccumulatorError::FlushInProgress);
        }
        self.batch.offsets.observe(topic, partition, offset);
        Ok(())
    }

    /// Flush decision as of the current time.
    pub fn should_flush(&self) -> bool {
        self.should_flush_at(Instant::now())
    }

    /// True iff the batch is full, or non-empty and at least `max_batch_time` old.
    pub fn should_flush_at(&self, now: Instant) -> bool {
        let count = self.batch.len();
        if count >= self.batch_size {
            return true;
        }
        count > 0 && self.batch.age(now) >= self.max_batch_time
    }

    /// Hand the batch to the caller for writing.
    ///
    /// Open moves to Flushing. Idle is a no-op that returns the empty batch.
    /// Calling again while Flushing returns the same batch.
    pub fn flush(&mut self) -> &Batch {
        if self.state == AccumulatorState::Open {
            self.state = AccumulatorState::Flushing;
            debug!(
                events = self.batch.len(),
                attempt = self.consecutive_failures + 1,
                "Batch handed to sink"
            );
        }
        &self.batch
    }

    /// The sink durably wrote the batch: clear it and return it for offset commit.
    pub fn flush_succeeded(&mut self) -> Result<Batch, AccumulatorError> {
        if self.state != AccumulatorState::Flushing {
            return Err(AccumulatorError::NoFlushInProgress);
        }
        self.state = AccumulatorState::Idle;
        self.consecutive_failures = 0;
        Ok(std::mem::take(&mut self.batch))
    }

    /// The sink write failed: keep the identical batch for the next attempt.
    pub fn flush_failed(&mut self) -> Result<u32, AccumulatorError> {
        if self.state != AccumulatorState::Flushing {
            return Err(AccumulatorError::NoFlushInProgress);
        }
        self.state = AccumulatorState::Open;
        self.consecutive_failures += 1;
        Ok(self.consecutive_failures)
    }

    /// Positions of skipped messages while no events are buffered.
    ///
    /// Returns `None` unless the accumulator is idle with tracked offsets.
    pub fn take_idle_offsets(&mut self) -> Option<PartitionOffsets> {
        if self.state != AccumulatorState::Idle || self.batch.offsets.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.batch.offsets))
    }

    /// Drop the buffered batch, returning how many events were discarded.
    pub fn discard(&mut self) -> usize {
        let dropped = self.batch.len();
        self.batch = Batch::default();
        self.state = AccumulatorState::Idle;
        self.consecutive_failures = 0;
        dropped
    }

    /// True after a failed write while the same batch waits to be re-attempted.
    pub fn retry_pending(&self) -> bool {
        self.state == AccumulatorState::Open && self.consecutive_failures > 0
    }

    /// Failed write attempts on the current batch.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Current state.
    pub fn state(&self) -> AccumulatorState {
        self.state
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.batch.len()
    }

    /// True if no events are buffered.
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    /// The buffered batch, read-only.
    pub fn batch(&self) -> &Batch {
        &self.batch
    }

    /// Configured count threshold.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Configured age threshold.
    pub fn max_batch_time(&self) -> Duration {
        self.max_batch_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BATCH_SIZE: usize = 10;
    const MAX_BATCH_TIME: Duration = Duration::from_millis(5000);

    fn accumulator() -> BatchAccumulator {
        BatchAccumulator::new(BATCH_SIZE, MAX_BATCH_TIME)
    }

    fn event(n: usize) -> PositionEvent {
        let mut e = PositionEvent::new(format!("VEH-{:04}", n % 5 + 1), 1_700_000_000 + n as i64);
        e.speed = n as f64;
        e
    }

    #[test]
    fn test_starts_idle() {
        let acc = accumulator();
        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert!(acc.is_empty());
        assert!(!acc.should_flush());
    }

    #[test]
    fn test_first_accept_opens_batch() {
        let mut acc = accumulator();
        let t0 = Instant::now();
        assert_eq!(acc.accept_at(event(0), t0), Ok(1));
        assert_eq!(acc.state(), AccumulatorState::Open);
        assert_eq!(acc.batch().opened_at(), Some(t0));

        // Later accepts keep the original open time
        acc.accept_at(event(1), t0 + Duration::from_millis(300))
            .unwrap();
        assert_eq!(acc.batch().opened_at(), Some(t0));
    }

    #[test]
    fn test_nine_events_do_not_flush_tenth_does() {
        let mut acc = accumulator();
        let t0 = Instant::now();

        for i in 0..9 {
            acc.accept_at(event(i), t0 + Duration::from_millis(i as u64 * 10))
                .unwrap();
            assert!(!acc.should_flush_at(t0 + Duration::from_millis(100)));
        }

        acc.accept_at(event(9), t0 + Duration::from_millis(95))
            .unwrap();
        assert!(acc.should_flush_at(t0 + Duration::from_millis(100)));
        assert_eq!(acc.flush().len(), 10);
    }

    #[test]
    fn test_single_event_flushes_on_age() {
        let mut acc = accumulator();
        let t0 = Instant::now();
        acc.accept_at(event(0), t0).unwrap();

        assert!(!acc.should_flush_at(t0 + Duration::from_millis(4999)));
        assert!(acc.should_flush_at(t0 + Duration::from_millis(5000)));
        assert!(acc.should_flush_at(t0 + Duration::from_millis(5001)));
        assert_eq!(acc.flush().len(), 1);
    }

    #[test]
    fn test_empty_batch_never_flushes_on_age() {
        let acc = accumulator();
        assert!(!acc.should_flush_at(Instant::now() + Duration::from_secs(3600)));
    }

    #[test]
    fn test_accept_does_not_auto_flush() {
        let mut acc = accumulator();
        let t0 = Instant::now();
        for i in 0..12 {
            acc.accept_at(event(i), t0).unwrap();
        }
        assert_eq!(acc.state(), AccumulatorState::Open);
        assert_eq!(acc.len(), 12);
    }

    #[test]
    fn test_flush_on_idle_is_noop() {
        let mut acc = accumulator();
        assert!(acc.flush().is_empty());
        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert_eq!(
            acc.flush_succeeded(),
            Err(AccumulatorError::NoFlushInProgress)
        );
    }

    #[test]
    fn test_accept_rejected_while_flushing() {
        let mut acc = accumulator();
        acc.accept(event(0)).unwrap();
        acc.flush();
        assert_eq!(acc.state(), AccumulatorState::Flushing);
        assert_eq!(
            acc.accept(event(1)),
            Err(AccumulatorError::FlushInProgress)
        );
        assert_eq!(
            acc.track_offset("t", 0, 1),
            Err(AccumulatorError::FlushInProgress)
        );
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_success_clears_batch_and_returns_it() {
        let mut acc = accumulator();
        let t0 = Instant::now();
        acc.track_offset("vehicle_positions", 0, 41).unwrap();
        acc.accept_at(event(0), t0).unwrap();
        acc.track_offset("vehicle_positions", 0, 42).unwrap();
        acc.accept_at(event(1), t0).unwrap();
        acc.flush();

        let flushed = acc.flush_succeeded().unwrap();
        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed.offsets().get("vehicle_positions", 0), Some(42));

        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert!(acc.is_empty());
        assert!(acc.batch().opened_at().is_none());
        assert!(acc.batch().offsets().is_empty());
        assert!(!acc.retry_pending());
    }

    #[test]
    fn test_failure_retains_identical_batch() {
        let mut acc = accumulator();
        let t0 = Instant::now();
        for i in 0..10 {
            acc.accept_at(event(i), t0).unwrap();
        }
        let before = acc.flush().clone();

        assert_eq!(acc.flush_failed(), Ok(1));
        assert_eq!(acc.state(), AccumulatorState::Open);
        assert!(acc.retry_pending());
        assert_eq!(acc.batch(), &before);
        assert_eq!(acc.batch().opened_at(), Some(t0));
        assert!(acc.should_flush_at(t0));

        // Second failure, then success: the same batch each time
        assert_eq!(acc.flush(), &before);
        assert_eq!(acc.flush_failed(), Ok(2));
        assert_eq!(acc.flush(), &before);
        let flushed = acc.flush_succeeded().unwrap();
        assert_eq!(flushed, before);
        assert_eq!(acc.consecutive_failures(), 0);
    }

    #[test]
    fn test_flush_failed_without_flush() {
        let mut acc = accumulator();
        acc.accept(event(0)).unwrap();
        assert_eq!(acc.flush_failed(), Err(AccumulatorError::NoFlushInProgress));
    }

    #[test]
    fn test_idle_offsets_for_skipped_messages() {
        let mut acc = accumulator();
        acc.track_offset("t", 3, 7).unwrap();
        let offsets = acc.take_idle_offsets().unwrap();
        assert_eq!(offsets.get("t", 3), Some(7));
        assert!(acc.take_idle_offsets().is_none());

        // Not handed out while events are buffered
        acc.track_offset("t", 3, 8).unwrap();
        acc.accept(event(0)).unwrap();
        assert!(acc.take_idle_offsets().is_none());
    }

    #[test]
    fn test_discard() {
        let mut acc = accumulator();
        acc.accept(event(0)).unwrap();
        acc.accept(event(1)).unwrap();
        acc.flush();
        acc.flush_failed().unwrap();
        assert_eq!(acc.discard(), 2);
        assert_eq!(acc.state(), AccumulatorState::Idle);
        assert!(!acc.retry_pending());
    }
}
