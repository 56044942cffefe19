//! Stale heartbeat detection.
//!
//! Runs on the consumer loop's idle tick. An account that reported at least
//! once and then went quiet past the threshold gets a synthetic
//! `HEARTBEAT_STALE` event fed through the normal scheduling path. Teleports
//! that never finish are handled the same way.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::config::MonitorConfig;
use crate::event::MonitorEvent;
use crate::scheduler::{ScheduleOutcome, Scheduler};

const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct StaleDetector {
    threshold: Duration,
    teleport_timeout: Duration,
    last_sweep: Option<Instant>,
}

impl StaleDetector {
    pub fn new(threshold: Duration, teleport_timeout: Duration) -> Self {
        Self {
            threshold,
            teleport_timeout,
            last_sweep: None,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.heartbeat_stale(), config.teleport_timeout())
    }

    /// True once a sweep interval has passed, so a busy queue that never hits
    /// its receive timeout still gets swept.
    pub fn is_due(&self) -> bool {
        self.last_sweep
            .map_or(true, |last| last.elapsed() >= SWEEP_INTERVAL)
    }

    pub fn sweep(
        &mut self,
        scheduler: &mut Scheduler,
        now: DateTime<Utc>,
    ) -> Vec<(String, ScheduleOutcome)> {
        self.last_sweep = Some(Instant::now());
        let cooldown = scheduler.policy().cooldown;
        let mut outcomes = Vec::new();

        let stale = scheduler
            .store()
            .stale_accounts(now, self.threshold, cooldown);
        for account_id in stale {
            warn!(
                account = %account_id,
                threshold_secs = self.threshold.as_secs_f64(),
                "Heartbeat stale"
            );
            let event = MonitorEvent::heartbeat_stale(&account_id, now);
            outcomes.push((account_id, scheduler.on_synthetic_event(&event, now)));
        }

        let stuck = scheduler
            .store()
            .teleport_timeouts(now, self.teleport_timeout, cooldown);
        for account_id in stuck {
            warn!(
                account = %account_id,
                timeout_secs = self.teleport_timeout.as_secs_f64(),
                "Teleport never completed"
            );
            let event = MonitorEvent::teleport_timeout(&account_id, now);
            outcomes.push((account_id, scheduler.on_synthetic_event(&event, now)));
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remediation::testing::Call;
    use crate::scheduler::testing::{fast_policy, harness, wait_until_idle};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).expect("timestamp")
    }

    fn heartbeat(scheduler: &mut Scheduler, account: &str, t: i64) {
        let line = format!(r#"{{"t":{},"event":"RUNNING","severity":"INFO"}}"#, t);
        let event = MonitorEvent::from_line(account, &line).expect("event");
        scheduler.on_event(&event, at(t));
    }

    #[test]
    fn silent_account_after_heartbeats_is_remediated() {
        let (mut scheduler, executor, _store) = harness(&["U2"], fast_policy());
        let mut detector = StaleDetector::new(Duration::from_secs(45), Duration::from_secs(60));

        for t in [1000, 1020, 1040] {
            heartbeat(&mut scheduler, "U2", t);
        }

        assert!(detector.sweep(&mut scheduler, at(1080)).is_empty());

        let outcomes = detector.sweep(&mut scheduler, at(1086));
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, "U2");
        assert!(matches!(
            outcomes[0].1,
            ScheduleOutcome::Dispatched { first: true, .. }
        ));

        let calls = executor.wait_for_calls(2, Duration::from_secs(5));
        assert_eq!(
            calls,
            vec![Call::Stop("U2".to_string()), Call::Start("U2".to_string())]
        );
    }

    #[test]
    fn stale_account_is_reported_once_per_cooldown_window() {
        let (mut scheduler, _executor, store) = harness(&["U2"], fast_policy());
        let mut detector = StaleDetector::new(Duration::from_secs(45), Duration::from_secs(60));
        heartbeat(&mut scheduler, "U2", 1000);

        let mut dispatches = 0;
        for tick in 1046..1060 {
            dispatches += detector
                .sweep(&mut scheduler, at(tick))
                .iter()
                .filter(|(_, outcome)| matches!(outcome, ScheduleOutcome::Dispatched { .. }))
                .count();
        }
        assert_eq!(dispatches, 1);

        // Once the attempt finishes and the cooldown passes, a still-silent
        // account is picked up again.
        wait_until_idle(&store, "U2");
        let later = Utc::now() + chrono::Duration::seconds(21);
        let outcomes = detector.sweep(&mut scheduler, later);
        assert!(matches!(
            outcomes.as_slice(),
            [(_, ScheduleOutcome::Dispatched { first: false, .. })]
        ));
    }

    #[test]
    fn never_seen_account_is_exempt() {
        let (mut scheduler, executor, _store) = harness(&["U3"], fast_policy());
        let mut detector = StaleDetector::new(Duration::from_secs(45), Duration::from_secs(60));
        assert!(detector.sweep(&mut scheduler, at(100_000)).is_empty());
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn unfinished_teleport_triggers_remediation() {
        let (mut scheduler, _executor, _store) = harness(&["U4"], fast_policy());
        let mut detector = StaleDetector::new(Duration::from_secs(3600), Duration::from_secs(60));

        let begin = MonitorEvent::from_line("U4", r#"{"t":1000,"event":"TELEPORT_BEGIN"}"#)
            .expect("event");
        scheduler.on_event(&begin, at(1000));
        heartbeat(&mut scheduler, "U4", 1030);

        assert!(detector.sweep(&mut scheduler, at(1060)).is_empty());
        let outcomes = detector.sweep(&mut scheduler, at(1061));
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].1, ScheduleOutcome::Dispatched { .. }));
    }

    #[test]
    fn sweep_due_tracks_interval() {
        let (mut scheduler, _executor, _store) = harness(&["U5"], fast_policy());
        let mut detector = StaleDetector::new(Duration::from_secs(45), Duration::from_secs(60));
        assert!(detector.is_due());
        detector.sweep(&mut scheduler, at(1000));
        assert!(!detector.is_due());
    }
}
