//! Temporal reasoning: session clocks, event timestamps and expiry scheduling
//!
//! Two clock modes are supported. The realtime clock reads the wall clock on every
//! call; the pseudo clock starts at a configured offset and moves only when the
//! caller advances it, which makes temporal rules fully deterministic under test.
//!
//! ```text
//! insert(event) ──► timestamp (field or clock) ──► window memories
//!                                              └─► expiry queue (expires_after)
//! advance_time / next operation ──► prune windows ──► retract expired events
//! ```

use crate::config::ClockMode;
use crate::error::{TallyError, TallyResult};
use crate::types::{Fact, FactHandle, FactType};
use ahash::AHashMap;
use std::collections::BTreeSet;
use std::time::Duration;

/// Milliseconds in a duration, saturating at `i64::MAX`
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Source of "now" for one session, in epoch milliseconds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionClock {
    Realtime,
    Pseudo { now: i64 },
}

impl SessionClock {
    pub fn new(mode: ClockMode, pseudo_start: i64) -> Self {
        match mode {
            ClockMode::Realtime => SessionClock::Realtime,
            ClockMode::Pseudo => SessionClock::Pseudo { now: pseudo_start },
        }
    }

    pub fn now(&self) -> i64 {
        match self {
            SessionClock::Realtime => chrono::Utc::now().timestamp_millis(),
            SessionClock::Pseudo { now } => *now,
        }
    }

    /// Move a pseudo clock forward; realtime clocks cannot be advanced
    pub fn advance(&mut self, by: Duration) -> TallyResult<i64> {
        match self {
            SessionClock::Realtime => Err(TallyError::Clock {
                message: "cannot advance a realtime clock".to_string(),
            }),
            SessionClock::Pseudo { now } => {
                *now = now.saturating_add(duration_millis(by));
                Ok(*now)
            }
        }
    }
}

/// Timestamp of a fact: its declared timestamp field, or the clock at insertion
pub fn event_timestamp(fact_type: &FactType, fact: &Fact, now: i64) -> i64 {
    fact_type
        .timestamp_field
        .as_deref()
        .and_then(|field| fact.get(field))
        .and_then(|value| value.as_epoch_millis())
        .unwrap_or(now)
}

/// Whether a timestamp is still inside a time window ending at `now`
pub(crate) fn in_time_window(timestamp: i64, now: i64, span: Duration) -> bool {
    timestamp >= now.saturating_sub(duration_millis(span))
}

/// Deadlines of events declared with `expires_after`
#[derive(Debug, Default)]
pub(crate) struct ExpiryQueue {
    deadlines: BTreeSet<(i64, FactHandle)>,
    by_handle: AHashMap<FactHandle, i64>,
}

impl ExpiryQueue {
    pub fn schedule(&mut self, handle: FactHandle, deadline: i64) {
        self.cancel(handle);
        self.deadlines.insert((deadline, handle));
        self.by_handle.insert(handle, deadline);
    }

    pub fn cancel(&mut self, handle: FactHandle) {
        if let Some(deadline) = self.by_handle.remove(&handle) {
            self.deadlines.remove(&(deadline, handle));
        }
    }

    /// Whether the handle's deadline has passed at `now`
    pub fn is_expired(&self, handle: FactHandle, now: i64) -> bool {
        self.by_handle.get(&handle).is_some_and(|deadline| *deadline <= now)
    }

    /// Remove and return every handle whose deadline is at or before `now`
    pub fn take_due(&mut self, now: i64) -> Vec<FactHandle> {
        let mut due = Vec::new();
        while let Some(&(deadline, handle)) = self.deadlines.first() {
            if deadline > now {
                break;
            }
            self.deadlines.pop_first();
            self.by_handle.remove(&handle);
            due.push(handle);
        }
        due
    }

    pub fn len(&self) -> usize {
        self.by_handle.len()
    }
}
