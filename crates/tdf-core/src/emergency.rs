//! Emergency safe-mode
//!
//! While active, every call is answered by the EMERGENCY tier. The record is
//! owned by one chain instance; enter/exit are serialised by a mutex and the
//! hot-path check reads a single atomic flag.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Emergency mode record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmergencyRecord {
    pub active: bool,
    pub started_at: Option<Instant>,
    pub trigger_reason: String,
    /// Last exit, automatic or administrative
    pub last_exit_at: Option<Instant>,
}

/// Controls entry into and exit from emergency mode
#[derive(Debug)]
pub struct EmergencyModeController {
    trigger_after: Duration,
    max_duration: Duration,
    flag: AtomicBool,
    record: Mutex<EmergencyRecord>,
}

impl EmergencyModeController {
    /// Create inactive controller
    #[must_use]
    pub fn new(trigger_after: Duration, max_duration: Duration) -> Self {
        Self {
            trigger_after,
            max_duration,
            flag: AtomicBool::new(false),
            record: Mutex::new(EmergencyRecord::default()),
        }
    }

    /// Whether emergency mode is active at `now`
    ///
    /// Expires the record once `max_duration` has elapsed.
    pub fn is_active(&self, now: Instant) -> bool {
        if !self.flag.load(Ordering::Acquire) {
            return false;
        }

        let mut record = self.record.lock();
        if !record.active {
            return false;
        }
        let expired = record
            .started_at
            .is_some_and(|start| now.saturating_duration_since(start) >= self.max_duration);
        if expired {
            tracing::warn!(
                "Emergency mode expired after {}s, resuming normal tier selection",
                self.max_duration.as_secs()
            );
            self.exit_locked(&mut record, now);
            return false;
        }
        true
    }

    /// Flag as last written; may be stale by one call
    #[inline]
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Enter emergency mode; returns `false` if it was already active
    pub fn enter(&self, reason: impl Into<String>, now: Instant) -> bool {
        let mut record = self.record.lock();
        if record.active {
            return false;
        }
        record.active = true;
        record.started_at = Some(now);
        record.trigger_reason = reason.into();
        self.flag.store(true, Ordering::Release);

        metrics::counter!("tdf.emergency_entered").increment(1);
        tracing::error!("Entering emergency mode: {}", record.trigger_reason);
        true
    }

    /// Leave emergency mode; returns `false` if it was not active
    pub fn exit(&self, now: Instant) -> bool {
        let mut record = self.record.lock();
        if !record.active {
            return false;
        }
        tracing::info!("Exiting emergency mode");
        self.exit_locked(&mut record, now);
        true
    }

    fn exit_locked(&self, record: &mut EmergencyRecord, now: Instant) {
        record.active = false;
        record.started_at = None;
        record.trigger_reason.clear();
        record.last_exit_at = Some(now);
        self.flag.store(false, Ordering::Release);
    }

    /// Enter emergency mode if the circuit has stayed open long enough
    ///
    /// The open streak is measured from the later of `open_since` and the
    /// last exit, so leaving emergency mode grants a full trigger period
    /// before re-entry. Returns whether emergency mode is active afterwards.
    pub fn observe_circuit(&self, open_since: Option<Instant>, now: Instant) -> bool {
        if self.is_active(now) {
            return true;
        }
        let Some(open_since) = open_since else {
            return false;
        };

        let last_exit = self.record.lock().last_exit_at;
        let streak_start = last_exit.map_or(open_since, |exit| exit.max(open_since));
        let open_for = now.saturating_duration_since(streak_start);
        if open_for < self.trigger_after {
            return false;
        }

        self.enter(
            format!(
                "circuit open for {:.1}s (trigger: {}s)",
                open_for.as_secs_f64(),
                self.trigger_after.as_secs()
            ),
            now,
        );
        true
    }

    /// Copy of the record
    #[must_use]
    pub fn record(&self) -> EmergencyRecord {
        self.record.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(trigger_secs: u64, max_secs: u64) -> EmergencyModeController {
        EmergencyModeController::new(
            Duration::from_secs(trigger_secs),
            Duration::from_secs(max_secs),
        )
    }

    #[test]
    fn starts_inactive() {
        let em = controller(120, 600);
        assert!(!em.is_active(Instant::now()));
        assert!(!em.is_flagged());
        assert_eq!(em.record(), EmergencyRecord::default());
    }

    #[test]
    fn enter_and_exit() {
        let em = controller(120, 600);
        let now = Instant::now();

        assert!(em.enter("drill", now));
        assert!(!em.enter("again", now));
        assert!(em.is_active(now));
        assert_eq!(em.record().trigger_reason, "drill");

        assert!(em.exit(now));
        assert!(!em.exit(now));
        assert!(!em.is_active(now));
        assert_eq!(em.record().last_exit_at, Some(now));
    }

    #[test]
    fn auto_exits_after_max_duration() {
        let em = controller(120, 600);
        let now = Instant::now();
        em.enter("drill", now);

        assert!(em.is_active(now + Duration::from_secs(599)));
        assert!(!em.is_active(now + Duration::from_secs(600)));
        assert!(!em.is_flagged());
    }

    #[test]
    fn circuit_open_long_enough_triggers() {
        let em = controller(120, 600);
        let opened = Instant::now();

        assert!(!em.observe_circuit(Some(opened), opened + Duration::from_secs(119)));
        assert!(em.observe_circuit(Some(opened), opened + Duration::from_secs(120)));
        assert!(em.record().trigger_reason.starts_with("circuit open"));
    }

    #[test]
    fn closed_circuit_never_triggers() {
        let em = controller(0, 600);
        assert!(!em.observe_circuit(None, Instant::now()));
    }

    #[test]
    fn zero_trigger_enters_immediately() {
        let em = controller(0, 600);
        let now = Instant::now();
        assert!(em.observe_circuit(Some(now), now));
    }

    #[test]
    fn exit_restarts_trigger_period() {
        let em = controller(120, 600);
        let opened = Instant::now();
        let entered = opened + Duration::from_secs(120);
        assert!(em.observe_circuit(Some(opened), entered));

        let exited = entered + Duration::from_secs(10);
        em.exit(exited);

        assert!(!em.observe_circuit(Some(opened), exited + Duration::from_secs(1)));
        assert!(em.observe_circuit(Some(opened), exited + Duration::from_secs(120)));
    }
}
