//! Timer management
//!
//! The engine keeps one idle/settle timeout, always bound to the latest
//! pending event, plus the retry deadline for a closed emit gate. Timers are
//! deadlines on the host clock; the host fires them by advancing the engine.

use settle_core::model::{EventIndex, Millis};

/// The single idle/settle timeout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdleTimer {
    pub event: EventIndex,
    pub deadline: Millis,
}

/// A timer that has come due
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Due {
    Idle { event: EventIndex, at: Millis },
    EmitRetry { at: Millis },
}

impl Due {
    pub fn at(&self) -> Millis {
        match self {
            Due::Idle { at, .. } | Due::EmitRetry { at } => *at,
        }
    }
}

#[derive(Debug, Default)]
pub struct TimerManager {
    idle: Option<IdleTimer>,
    emit_retry: Option<Millis>,
}

impl TimerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the idle timeout for `event`, replacing any existing one.
    ///
    /// Does nothing unless `event` is the latest index: older events are never
    /// put back on a timer. Returns the new deadline when armed.
    pub fn arm(
        &mut self,
        now: Millis,
        duration_ms: u64,
        event: EventIndex,
        is_latest: bool,
    ) -> Option<Millis> {
        if !is_latest {
            return None;
        }
        let deadline = now + duration_ms as Millis;
        self.idle = Some(IdleTimer { event, deadline });
        Some(deadline)
    }

    pub fn clear(&mut self) -> Option<IdleTimer> {
        self.idle.take()
    }

    /// Clear the timeout only if it belongs to `event`
    pub fn clear_for(&mut self, event: EventIndex) -> bool {
        if self.idle.is_some_and(|t| t.event == event) {
            self.idle = None;
            true
        } else {
            false
        }
    }

    pub fn idle(&self) -> Option<IdleTimer> {
        self.idle
    }

    /// Schedule a hand-off retry unless one is already pending
    pub fn arm_emit_retry(&mut self, now: Millis, backoff_ms: u64) -> Millis {
        *self
            .emit_retry
            .get_or_insert(now + backoff_ms as Millis)
    }

    pub fn emit_retry(&self) -> Option<Millis> {
        self.emit_retry
    }

    pub fn next_deadline(&self) -> Option<Millis> {
        match (self.idle.map(|t| t.deadline), self.emit_retry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Take the earliest timer due at `now`. On a tie the idle timer goes
    /// first so a settling event is finalized before queued records flush.
    pub fn pop_due(&mut self, now: Millis) -> Option<Due> {
        let idle = self.idle.filter(|t| t.deadline <= now);
        let retry = self.emit_retry.filter(|at| *at <= now);
        match (idle, retry) {
            (Some(t), Some(r)) if r < t.deadline => {
                self.emit_retry = None;
                Some(Due::EmitRetry { at: r })
            }
            (Some(t), _) => {
                self.idle = None;
                Some(Due::Idle {
                    event: t.event,
                    at: t.deadline,
                })
            }
            (None, Some(r)) => {
                self.emit_retry = None;
                Some(Due::EmitRetry { at: r })
            }
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_only_for_latest_event() {
        let mut timers = TimerManager::new();
        assert_eq!(timers.arm(100.0, 50, 3, true), Some(150.0));
        assert_eq!(timers.arm(120.0, 50, 2, false), None);
        assert_eq!(timers.idle(), Some(IdleTimer { event: 3, deadline: 150.0 }));
    }

    #[test]
    fn test_rearm_replaces_timeout() {
        let mut timers = TimerManager::new();
        timers.arm(0.0, 50, 0, true);
        timers.arm(30.0, 1000, 0, true);
        assert_eq!(timers.next_deadline(), Some(1030.0));
        assert_eq!(timers.pop_due(50.0), None);
        assert_eq!(timers.pop_due(1030.0), Some(Due::Idle { event: 0, at: 1030.0 }));
        assert_eq!(timers.pop_due(2000.0), None);
    }

    #[test]
    fn test_clear_for_other_event_keeps_timeout() {
        let mut timers = TimerManager::new();
        timers.arm(0.0, 50, 4, true);
        assert!(!timers.clear_for(3));
        assert!(timers.idle().is_some());
        assert!(timers.clear_for(4));
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_emit_retry_is_not_pushed_back() {
        let mut timers = TimerManager::new();
        assert_eq!(timers.arm_emit_retry(0.0, 500), 500.0);
        assert_eq!(timers.arm_emit_retry(200.0, 500), 500.0);
        assert_eq!(timers.emit_retry(), Some(500.0));
    }

    #[test]
    fn test_pop_due_in_deadline_order() {
        let mut timers = TimerManager::new();
        timers.arm(0.0, 50, 1, true);
        timers.arm_emit_retry(0.0, 20);

        assert_eq!(timers.pop_due(100.0), Some(Due::EmitRetry { at: 20.0 }));
        assert_eq!(timers.pop_due(100.0), Some(Due::Idle { event: 1, at: 50.0 }));
        assert_eq!(timers.pop_due(100.0), None);
        assert_eq!(timers.next_deadline(), None);
    }

    #[test]
    fn test_tie_prefers_idle() {
        let mut timers = TimerManager::new();
        timers.arm(0.0, 50, 0, true);
        timers.arm_emit_retry(0.0, 50);
        assert!(matches!(timers.pop_due(50.0), Some(Due::Idle { .. })));
        assert!(matches!(timers.pop_due(50.0), Some(Due::EmitRetry { .. })));
    }
}
