//! Circuit breaker guarding the primary detector
//!
//! States: `Closed` (initial) -> `Open` -> `HalfOpen` -> `Closed`, or back to
//! `Open` when the probe fails. Every mutation happens under one mutex, so
//! admission, failure counting and the single half-open probe slot cannot race.
//!
//! Admission hands out a [`CallPermit`]. A permit dropped without an outcome
//! (the caller went away mid-call) releases its probe slot and is not counted
//! as a failure.

use crate::error::CircuitError;
use crate::types::CircuitState;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Validates a state transition
///
/// # Errors
/// - `CircuitError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: CircuitState, to: CircuitState) -> Result<(), CircuitError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(CircuitError::IllegalTransition { from, to })
    }
}

/// States reachable from `from`
///
/// `Open -> Closed` is only taken by an administrative reset.
#[must_use]
pub fn allowed_transitions(from: CircuitState) -> Vec<CircuitState> {
    use CircuitState::{Closed, HalfOpen, Open};
    match from {
        Closed => vec![Open],
        Open => vec![HalfOpen, Closed],
        HalfOpen => vec![Closed, Open],
    }
}

/// Snapshot of the breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerState {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<Instant>,
    pub opened_at: Option<Instant>,
    pub half_open_probe_in_flight: bool,
    /// When the breaker last left `Closed`; cleared on return to `Closed`
    pub open_streak_started_at: Option<Instant>,
}

impl Default for CircuitBreakerState {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            opened_at: None,
            half_open_probe_in_flight: false,
            open_streak_started_at: None,
        }
    }
}

impl CircuitBreakerState {
    fn transition(&mut self, to: CircuitState) {
        let from = self.state;
        if from == to {
            return;
        }
        if let Err(e) = validate_transition(from, to) {
            debug_assert!(false, "{e}");
            tracing::error!("Rejected circuit transition: {}", e);
            return;
        }
        self.state = to;
        metrics::counter!(
            "tdf.circuit_transition",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
        tracing::info!(from = %from, to = %to, "Circuit breaker transition");
    }

    fn open(&mut self, now: Instant) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(now);
        self.half_open_probe_in_flight = false;
        self.open_streak_started_at.get_or_insert(now);
    }

    fn close(&mut self) {
        self.transition(CircuitState::Closed);
        self.consecutive_failures = 0;
        self.last_failure_at = None;
        self.opened_at = None;
        self.half_open_probe_in_flight = false;
        self.open_streak_started_at = None;
    }
}

/// Kind of admission granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitKind {
    /// Circuit closed
    Normal,
    /// The single half-open probe
    Probe,
}

/// Breaker thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSettings {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker for the primary detector
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    settings: CircuitSettings,
    inner: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    /// Create breaker in the `Closed` state
    #[inline]
    #[must_use]
    pub fn new(settings: CircuitSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(CircuitBreakerState::default()),
        }
    }

    /// Ask to call the detector
    ///
    /// Returns `None` while `Open` inside the cooldown, or while another
    /// caller holds the half-open probe. The first caller after the cooldown
    /// moves the breaker to `HalfOpen` and receives the probe.
    pub fn try_acquire(&self, now: Instant) -> Option<CallPermit<'_>> {
        let mut st = self.inner.lock();
        let kind = match st.state {
            CircuitState::Closed => PermitKind::Normal,
            CircuitState::Open => {
                let cooled = st
                    .opened_at
                    .map_or(true, |t| now.saturating_duration_since(t) >= self.settings.cooldown);
                if !cooled {
                    return None;
                }
                st.transition(CircuitState::HalfOpen);
                st.half_open_probe_in_flight = true;
                PermitKind::Probe
            }
            CircuitState::HalfOpen => {
                if st.half_open_probe_in_flight {
                    return None;
                }
                st.half_open_probe_in_flight = true;
                PermitKind::Probe
            }
        };
        drop(st);

        Some(CallPermit {
            breaker: self,
            kind,
            resolved: false,
        })
    }

    fn on_success(&self, kind: PermitKind) {
        let mut st = self.inner.lock();
        match (st.state, kind) {
            (CircuitState::HalfOpen, PermitKind::Probe) => st.close(),
            (CircuitState::Closed, PermitKind::Normal) => st.consecutive_failures = 0,
            // Stale permit from before a state change
            _ => {}
        }
    }

    fn on_failure(&self, kind: PermitKind, now: Instant) -> CircuitState {
        let mut st = self.inner.lock();

        let window_expired = st
            .last_failure_at
            .is_some_and(|last| now.saturating_duration_since(last) > self.settings.failure_window);
        if window_expired {
            st.consecutive_failures = 0;
        }
        st.consecutive_failures = st.consecutive_failures.saturating_add(1);
        st.last_failure_at = Some(now);

        match (st.state, kind) {
            (CircuitState::HalfOpen, PermitKind::Probe) => {
                tracing::warn!("Half-open probe failed, reopening circuit");
                st.open(now);
            }
            (CircuitState::Closed, _) if st.consecutive_failures >= self.settings.failure_threshold => {
                tracing::warn!(
                    "Opening circuit after {} consecutive failures",
                    st.consecutive_failures
                );
                st.open(now);
            }
            _ => {}
        }
        st.state
    }

    fn on_cancelled(&self, kind: PermitKind) {
        if kind != PermitKind::Probe {
            return;
        }
        let mut st = self.inner.lock();
        if st.state == CircuitState::HalfOpen {
            tracing::debug!("Half-open probe cancelled, releasing slot");
            st.half_open_probe_in_flight = false;
        }
    }

    /// Force `Closed` and clear counters
    pub fn reset(&self) {
        self.inner.lock().close();
    }

    /// Force `Open` (restarts the cooldown)
    pub fn force_open(&self, now: Instant) {
        self.inner.lock().open(now);
    }

    /// Current state
    #[inline]
    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Copy of the full state
    #[must_use]
    pub fn snapshot(&self) -> CircuitBreakerState {
        self.inner.lock().clone()
    }

    /// When the breaker last left `Closed`
    #[must_use]
    pub fn open_streak_started_at(&self) -> Option<Instant> {
        self.inner.lock().open_streak_started_at
    }
}

/// Admission to call the detector once
///
/// Resolve with [`CallPermit::success`] or [`CallPermit::failure`]. Dropping
/// an unresolved permit counts as a cancellation.
#[derive(Debug)]
#[must_use = "an unresolved permit is treated as a cancelled call"]
pub struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    kind: PermitKind,
    resolved: bool,
}

impl CallPermit<'_> {
    /// Kind of admission
    #[inline]
    pub fn kind(&self) -> PermitKind {
        self.kind
    }

    /// Detector call succeeded
    pub fn success(mut self) {
        self.resolved = true;
        self.breaker.on_success(self.kind);
    }

    /// Detector call failed; returns the resulting state
    pub fn failure(mut self, now: Instant) -> CircuitState {
        self.resolved = true;
        self.breaker.on_failure(self.kind, now)
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.on_cancelled(self.kind);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn breaker(threshold: u32, cooldown_secs: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitSettings {
            failure_threshold: threshold,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(cooldown_secs),
        })
    }

    fn fail_n(cb: &CircuitBreaker, n: u32, now: Instant) {
        for _ in 0..n {
            cb.try_acquire(now).expect("admitted").failure(now);
        }
    }

    #[test]
    fn opens_at_threshold() {
        let cb = breaker(3, 30);
        let now = Instant::now();

        fail_n(&cb, 2, now);
        assert_eq!(cb.state(), CircuitState::Closed);

        fail_n(&cb, 1, now);
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.consecutive_failures, 3);
        assert_eq!(snap.opened_at, Some(now));
        assert_eq!(snap.open_streak_started_at, Some(now));
    }

    #[test]
    fn success_resets_consecutive_count() {
        let cb = breaker(3, 30);
        let now = Instant::now();

        fail_n(&cb, 2, now);
        cb.try_acquire(now).unwrap().success();
        fail_n(&cb, 2, now);

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn failures_outside_window_restart_count() {
        let cb = breaker(3, 30);
        let now = Instant::now();

        fail_n(&cb, 2, now);
        fail_n(&cb, 1, now + Duration::from_secs(61));

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn open_rejects_until_cooldown() {
        let cb = breaker(1, 30);
        let now = Instant::now();
        fail_n(&cb, 1, now);

        assert!(cb.try_acquire(now + Duration::from_secs(29)).is_none());

        let probe = cb.try_acquire(now + Duration::from_secs(30)).unwrap();
        assert_eq!(probe.kind(), PermitKind::Probe);
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(cb.snapshot().half_open_probe_in_flight);
        probe.success();
    }

    #[test]
    fn only_one_probe_in_flight() {
        let cb = breaker(1, 0);
        let now = Instant::now();
        fail_n(&cb, 1, now);

        let probe = cb.try_acquire(now).unwrap();
        assert!(cb.try_acquire(now).is_none());
        assert!(cb.try_acquire(now).is_none());
        probe.success();
    }

    #[test]
    fn probe_success_closes() {
        let cb = breaker(1, 0);
        let now = Instant::now();
        fail_n(&cb, 1, now);

        cb.try_acquire(now).unwrap().success();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.open_streak_started_at, None);
        assert!(!snap.half_open_probe_in_flight);
    }

    #[test]
    fn probe_failure_reopens_and_restarts_cooldown() {
        let cb = breaker(1, 10);
        let start = Instant::now();
        fail_n(&cb, 1, start);

        let later = start + Duration::from_secs(10);
        let state = cb.try_acquire(later).unwrap().failure(later);
        assert_eq!(state, CircuitState::Open);

        let snap = cb.snapshot();
        assert_eq!(snap.opened_at, Some(later));
        assert_eq!(snap.open_streak_started_at, Some(start));
        assert!(cb.try_acquire(later + Duration::from_secs(9)).is_none());
    }

    #[test]
    fn cancelled_probe_releases_slot_without_failure() {
        let cb = breaker(1, 0);
        let now = Instant::now();
        fail_n(&cb, 1, now);
        let failures_before = cb.snapshot().consecutive_failures;

        drop(cb.try_acquire(now).unwrap());

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert!(!snap.half_open_probe_in_flight);
        assert_eq!(snap.consecutive_failures, failures_before);
        assert!(cb.try_acquire(now).is_some());
    }

    #[test]
    fn cancelled_normal_call_not_counted() {
        let cb = breaker(2, 30);
        let now = Instant::now();
        for _ in 0..5 {
            drop(cb.try_acquire(now).unwrap());
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[test]
    fn stale_success_does_not_close_open_circuit() {
        let cb = breaker(1, 30);
        let now = Instant::now();
        let stale = cb.try_acquire(now).unwrap();
        fail_n(&cb, 1, now);

        stale.success();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn reset_is_idempotent() {
        let cb = breaker(1, 30);
        fail_n(&cb, 1, Instant::now());

        cb.reset();
        let first = cb.snapshot();
        cb.reset();
        let second = cb.snapshot();

        assert_eq!(first, second);
        assert_eq!(second.state, CircuitState::Closed);
        assert_eq!(second.consecutive_failures, 0);
    }

    #[test]
    fn force_open_from_closed() {
        let cb = breaker(5, 30);
        let now = Instant::now();
        cb.force_open(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire(now).is_none());
    }

    #[test]
    fn transition_table() {
        assert!(validate_transition(CircuitState::Closed, CircuitState::Open).is_ok());
        assert!(validate_transition(CircuitState::Open, CircuitState::HalfOpen).is_ok());
        assert!(validate_transition(CircuitState::HalfOpen, CircuitState::Closed).is_ok());
        assert!(validate_transition(CircuitState::HalfOpen, CircuitState::Open).is_ok());

        assert!(validate_transition(CircuitState::Closed, CircuitState::HalfOpen).is_err());
    }

    proptest! {
        #[test]
        fn prop_validate_matches_table(
            from in prop_oneof![
                Just(CircuitState::Closed),
                Just(CircuitState::Open),
                Just(CircuitState::HalfOpen),
            ],
            to in prop_oneof![
                Just(CircuitState::Closed),
                Just(CircuitState::Open),
                Just(CircuitState::HalfOpen),
            ]
        ) {
            let allowed = allowed_transitions(from);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed.contains(&to));
        }

        #[test]
        fn prop_never_opens_below_threshold(threshold in 2u32..20, failures in 0u32..20) {
            let cb = breaker(threshold, 30);
            let now = Instant::now();
            for _ in 0..failures.min(threshold - 1) {
                cb.try_acquire(now).unwrap().failure(now);
            }
            prop_assert_eq!(cb.state(), CircuitState::Closed);
        }
    }
}
