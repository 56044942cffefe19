//! In-memory monitoring state, one entry per account.
//!
//! The consumer loop records sightings and dispatch decisions; remediation
//! workers only touch an entry when their attempt completes. Nothing here is
//! persisted.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MonitoringState {
    pub last_seen: Option<DateTime<Utc>>,
    pub last_remediation: Option<DateTime<Utc>>,
    pub first_remediation_done: bool,
    pub in_flight: bool,
    pub remediation_count: u64,
    pub teleport_started: Option<DateTime<Utc>>,
}

impl MonitoringState {
    pub fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Option<Duration> {
        let last = self.last_remediation?;
        let elapsed = elapsed_between(last, now);
        cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    /// True while a remediation is running or the cooldown has not elapsed.
    pub fn is_gated(&self, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.in_flight || self.cooldown_remaining(now, cooldown).is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchGate {
    Allowed { first: bool },
    UnknownAccount,
    InFlight,
    CoolingDown { remaining: Duration },
}

pub struct MonitorStore {
    accounts: Mutex<HashMap<String, MonitoringState>>,
}

impl MonitorStore {
    pub fn new<I, S>(account_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let accounts = account_ids
            .into_iter()
            .map(|id| (id.into(), MonitoringState::default()))
            .collect();
        Self {
            accounts: Mutex::new(accounts),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MonitoringState>> {
        self.accounts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, account_id: &str) -> Option<MonitoringState> {
        self.lock().get(account_id).cloned()
    }

    pub fn record_seen(&self, account_id: &str, at: DateTime<Utc>) -> bool {
        match self.lock().get_mut(account_id) {
            Some(state) => {
                state.last_seen = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn record_teleport_begin(&self, account_id: &str, at: DateTime<Utc>) {
        if let Some(state) = self.lock().get_mut(account_id) {
            state.teleport_started = Some(at);
        }
    }

    pub fn record_teleport_end(&self, account_id: &str) {
        if let Some(state) = self.lock().get_mut(account_id) {
            state.teleport_started = None;
        }
    }

    /// Checks the gate and, when open, stamps the dispatch under the same lock
    /// so no second dispatch can slip in before the first is recorded.
    pub fn try_begin_dispatch(
        &self,
        account_id: &str,
        now: DateTime<Utc>,
        cooldown: Duration,
    ) -> DispatchGate {
        let mut accounts = self.lock();
        let Some(state) = accounts.get_mut(account_id) else {
            return DispatchGate::UnknownAccount;
        };
        if state.in_flight {
            return DispatchGate::InFlight;
        }
        if let Some(remaining) = state.cooldown_remaining(now, cooldown) {
            return DispatchGate::CoolingDown { remaining };
        }

        state.last_remediation = Some(match state.last_remediation {
            Some(previous) if previous > now => previous,
            _ => now,
        });
        state.in_flight = true;
        // A pending teleport is moot once the session is being relaunched.
        state.teleport_started = None;
        DispatchGate::Allowed {
            first: !state.first_remediation_done,
        }
    }

    /// Releases the in-flight mark when a dispatched job never ran. The
    /// dispatch stamp stays, so the cooldown still applies.
    pub fn cancel_dispatch(&self, account_id: &str) {
        if let Some(state) = self.lock().get_mut(account_id) {
            state.in_flight = false;
        }
    }

    pub fn complete_remediation(&self, account_id: &str, at: DateTime<Utc>) {
        if let Some(state) = self.lock().get_mut(account_id) {
            if state.last_remediation.map_or(true, |previous| at > previous) {
                state.last_remediation = Some(at);
            }
            state.first_remediation_done = true;
            state.in_flight = false;
            state.remediation_count = state.remediation_count.saturating_add(1);
        }
    }

    /// Accounts seen at least once, silent for longer than `threshold`, and
    /// not currently gated.
    pub fn stale_accounts(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
        cooldown: Duration,
    ) -> Vec<String> {
        let mut stale: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, state)| {
                state
                    .last_seen
                    .map_or(false, |seen| elapsed_between(seen, now) > threshold)
                    && !state.is_gated(now, cooldown)
            })
            .map(|(id, _)| id.clone())
            .collect();
        stale.sort();
        stale
    }

    pub fn teleport_timeouts(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
        cooldown: Duration,
    ) -> Vec<String> {
        let mut expired: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, state)| {
                state
                    .teleport_started
                    .map_or(false, |started| elapsed_between(started, now) > timeout)
                    && !state.is_gated(now, cooldown)
            })
            .map(|(id, _)| id.clone())
            .collect();
        expired.sort();
        expired
    }
}

/// Elapsed wall time from `then` to `now`; clock skew backwards reads as zero.
pub fn elapsed_between(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Converts a log timestamp (unix seconds, possibly fractional).
pub fn timestamp_from_secs(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    const COOLDOWN: Duration = Duration::from_secs(20);

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("valid timestamp")
    }

    #[test]
    fn first_dispatch_is_allowed_and_marked_first() {
        let store = MonitorStore::new(["u1"]);
        assert_eq!(
            store.try_begin_dispatch("u1", at(1000), COOLDOWN),
            DispatchGate::Allowed { first: true }
        );
        let state = store.get("u1").expect("state");
        assert_eq!(state.last_remediation, Some(at(1000)));
        assert!(state.in_flight);
        assert!(!state.first_remediation_done);
    }

    #[test]
    fn in_flight_blocks_even_after_cooldown() {
        let store = MonitorStore::new(["u1"]);
        store.try_begin_dispatch("u1", at(1000), COOLDOWN);
        assert_eq!(
            store.try_begin_dispatch("u1", at(1100), COOLDOWN),
            DispatchGate::InFlight
        );
    }

    #[test]
    fn cooldown_measured_from_completion() {
        let store = MonitorStore::new(["u1"]);
        store.try_begin_dispatch("u1", at(1000), COOLDOWN);
        store.complete_remediation("u1", at(1035));

        assert_eq!(
            store.try_begin_dispatch("u1", at(1050), COOLDOWN),
            DispatchGate::CoolingDown {
                remaining: Duration::from_secs(5)
            }
        );
        assert_eq!(
            store.try_begin_dispatch("u1", at(1055), COOLDOWN),
            DispatchGate::Allowed { first: false }
        );
        assert_eq!(store.get("u1").expect("state").remediation_count, 1);
    }

    #[test]
    fn unknown_account_is_rejected() {
        let store = MonitorStore::new(["u1"]);
        assert_eq!(
            store.try_begin_dispatch("nobody", at(1000), COOLDOWN),
            DispatchGate::UnknownAccount
        );
        assert!(!store.record_seen("nobody", at(1000)));
    }

    #[test]
    fn last_remediation_never_moves_backwards() {
        let store = MonitorStore::new(["u1"]);
        store.try_begin_dispatch("u1", at(1000), COOLDOWN);
        store.complete_remediation("u1", at(990));
        assert_eq!(store.get("u1").expect("state").last_remediation, Some(at(1000)));
    }

    #[test]
    fn never_seen_accounts_are_not_stale() {
        let store = MonitorStore::new(["u1", "u2"]);
        store.record_seen("u2", at(1000));
        let stale = store.stale_accounts(at(2000), Duration::from_secs(45), COOLDOWN);
        assert_eq!(stale, vec!["u2".to_string()]);
    }

    #[test]
    fn stale_requires_strictly_exceeding_threshold() {
        let store = MonitorStore::new(["u1"]);
        store.record_seen("u1", at(1000));
        assert!(store
            .stale_accounts(at(1045), Duration::from_secs(45), COOLDOWN)
            .is_empty());
        assert_eq!(
            store.stale_accounts(at(1046), Duration::from_secs(45), COOLDOWN),
            vec!["u1".to_string()]
        );
    }

    #[test]
    fn gated_accounts_are_not_stale() {
        let store = MonitorStore::new(["u1"]);
        store.record_seen("u1", at(1000));
        store.try_begin_dispatch("u1", at(1050), COOLDOWN);
        assert!(store
            .stale_accounts(at(1060), Duration::from_secs(45), COOLDOWN)
            .is_empty());
    }

    #[test]
    fn teleport_timeout_clears_on_end() {
        let store = MonitorStore::new(["u1"]);
        store.record_teleport_begin("u1", at(1000));
        let timeout = Duration::from_secs(60);
        assert_eq!(
            store.teleport_timeouts(at(1061), timeout, COOLDOWN),
            vec!["u1".to_string()]
        );
        store.record_teleport_end("u1");
        assert!(store.teleport_timeouts(at(1061), timeout, COOLDOWN).is_empty());
    }

    #[test]
    fn elapsed_between_clamps_negative() {
        let now = at(1000);
        assert_eq!(elapsed_between(now + ChronoDuration::seconds(5), now), Duration::ZERO);
        assert_eq!(
            elapsed_between(now - ChronoDuration::seconds(5), now),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn timestamp_from_secs_keeps_millis() {
        let ts = timestamp_from_secs(1010.25).expect("timestamp");
        assert_eq!(ts.timestamp_millis(), 1_010_250);
        assert!(timestamp_from_secs(f64::NAN).is_none());
        assert!(timestamp_from_secs(-1.0).is_none());
    }
}
