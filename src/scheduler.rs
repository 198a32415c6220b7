//! Wall-clock timers that re-invoke the look-ahead loops.
//!
//! Nothing here blocks.  The front end calls [`Timers::advance`] with the
//! current wall time and then drains [`Timers::pop_due`]; the engine answers
//! each due timer by scheduling the next one with [`Timers::schedule_after`].

use std::time::Duration;

/// How often the look-ahead loops wake.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(25);

/// How far past the audio clock each wake schedules.
pub const SCHEDULE_AHEAD: Duration = Duration::from_millis(100);

// A horizon shorter than the wake interval leaves gaps between wakes.
const _: () = assert!(SCHEDULE_AHEAD.as_millis() > WAKE_INTERVAL.as_millis());

pub fn schedule_ahead_secs() -> f64 {
    SCHEDULE_AHEAD.as_secs_f64()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerKind {
    Scheduler,
    CountIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug)]
struct Pending {
    handle: TimerHandle,
    due: Duration,
    kind: TimerKind,
}

#[derive(Debug, Default)]
pub struct Timers {
    now: Duration,
    next_id: u64,
    pending: Vec<Pending>,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wall time of the last [`advance`](Self::advance).
    #[cfg(test)]
    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn schedule_after(&mut self, after: Duration, kind: TimerKind) -> TimerHandle {
        let handle = TimerHandle(self.next_id);
        self.next_id += 1;
        self.pending.push(Pending { handle, due: self.now + after, kind });
        handle
    }

    /// Cancelling a timer that already fired or was cancelled is a no-op.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|p| p.handle != handle);
    }

    pub fn cancel_all(&mut self) {
        self.pending.clear();
    }

    /// Move wall time forward.  Time never runs backwards.
    pub fn advance(&mut self, now: Duration) {
        self.now = self.now.max(now);
    }

    /// Remove and return the earliest timer that is due, if any.
    pub fn pop_due(&mut self) -> Option<(TimerHandle, TimerKind)> {
        let idx = self
            .pending
            .iter()
            .enumerate()
            .filter(|(_, p)| p.due <= self.now)
            .min_by_key(|(_, p)| (p.due, p.handle.0))
            .map(|(i, _)| i)?;
        let p = self.pending.swap_remove(idx);
        Some((p.handle, p.kind))
    }

    /// Time until the earliest pending timer; zero if one is already due.
    pub fn next_due(&self) -> Option<Duration> {
        self.pending
            .iter()
            .map(|p| p.due.saturating_sub(self.now))
            .min()
    }

    #[cfg(test)]
    pub fn is_pending(&self, kind: TimerKind) -> bool {
        self.pending.iter().any(|p| p.kind == kind)
    }
}
