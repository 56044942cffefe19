//! Remediation scheduling: the single place that decides whether an account
//! gets restarted, and after how long.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rejoin_protocol::EventKind;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::accounts::AccountSet;
use crate::classifier::{classify, Verdict};
use crate::config::MonitorConfig;
use crate::event::MonitorEvent;
use crate::remediation::{RemediationJob, RemediationPool};
use crate::state::{DispatchGate, MonitorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationPolicy {
    pub cooldown: Duration,
    pub first_delay: Duration,
    pub first_jitter: Duration,
    pub steady_jitter_min: Duration,
    pub steady_jitter_max: Duration,
}

impl From<&MonitorConfig> for RemediationPolicy {
    fn from(config: &MonitorConfig) -> Self {
        let (steady_jitter_min, steady_jitter_max) = config.steady_jitter();
        Self {
            cooldown: config.cooldown(),
            first_delay: config.first_remediation_delay(),
            first_jitter: config.first_jitter(),
            steady_jitter_min,
            steady_jitter_max,
        }
    }
}

impl Default for RemediationPolicy {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

/// First remediation: `first_delay + [0, first_jitter)`.
/// Later ones: `[steady_jitter_min, steady_jitter_max)`.
pub fn remediation_delay<R: Rng>(policy: &RemediationPolicy, first: bool, rng: &mut R) -> Duration {
    if first {
        policy.first_delay + uniform(rng, Duration::ZERO, policy.first_jitter)
    } else {
        uniform(rng, policy.steady_jitter_min, policy.steady_jitter_max)
    }
}

fn uniform<R: Rng>(rng: &mut R, low: Duration, high: Duration) -> Duration {
    if high <= low {
        return low;
    }
    Duration::from_secs_f64(rng.gen_range(low.as_secs_f64()..high.as_secs_f64()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Dispatched { delay: Duration, first: bool },
    Skipped(DispatchGate),
    /// The pool refused the job (shutting down).
    Dropped,
}

pub struct Scheduler {
    policy: RemediationPolicy,
    accounts: Arc<AccountSet>,
    store: Arc<MonitorStore>,
    pool: RemediationPool,
    rng: StdRng,
}

impl Scheduler {
    pub fn new(
        policy: RemediationPolicy,
        accounts: Arc<AccountSet>,
        store: Arc<MonitorStore>,
        pool: RemediationPool,
    ) -> Self {
        Self::with_rng(policy, accounts, store, pool, StdRng::from_entropy())
    }

    pub fn with_rng(
        policy: RemediationPolicy,
        accounts: Arc<AccountSet>,
        store: Arc<MonitorStore>,
        pool: RemediationPool,
        rng: StdRng,
    ) -> Self {
        Self {
            policy,
            accounts,
            store,
            pool,
            rng,
        }
    }

    pub fn policy(&self) -> &RemediationPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<MonitorStore> {
        &self.store
    }

    /// Records a sighting and schedules a remediation for severe events.
    /// Returns `None` when the event did not call for one.
    pub fn on_event(&mut self, event: &MonitorEvent, now: DateTime<Utc>) -> Option<ScheduleOutcome> {
        let verdict = classify(Some(&event.record));
        if verdict == Verdict::Ignore {
            return None;
        }

        if !self.store.record_seen(&event.account_id, event.timestamp) {
            debug!(account = %event.account_id, "Event for unknown account ignored");
            return None;
        }
        match event.kind() {
            EventKind::TeleportBegin => self
                .store
                .record_teleport_begin(&event.account_id, event.timestamp),
            EventKind::TeleportEnd => self.store.record_teleport_end(&event.account_id),
            _ => {}
        }

        if verdict != Verdict::Severe {
            return None;
        }
        Some(self.try_schedule(&event.account_id, &event.describe(), now))
    }

    /// Synthetic events skip the sighting update: silence must not count as
    /// a sign of life.
    pub fn on_synthetic_event(&mut self, event: &MonitorEvent, now: DateTime<Utc>) -> ScheduleOutcome {
        self.try_schedule(&event.account_id, &event.describe(), now)
    }

    pub fn try_schedule(&mut self, account_id: &str, reason: &str, now: DateTime<Utc>) -> ScheduleOutcome {
        let Some(account) = self.accounts.get(account_id) else {
            return ScheduleOutcome::Skipped(DispatchGate::UnknownAccount);
        };

        let first = match self
            .store
            .try_begin_dispatch(account_id, now, self.policy.cooldown)
        {
            DispatchGate::Allowed { first } => first,
            gate => {
                info!(account = %account_id, reason, gate = ?gate, "Remediation skipped");
                return ScheduleOutcome::Skipped(gate);
            }
        };

        let delay = remediation_delay(&self.policy, first, &mut self.rng);
        let job = RemediationJob {
            account: account.clone(),
            due: Instant::now() + delay,
            first,
            reason: reason.to_string(),
        };

        if self.pool.submit(job).is_err() {
            error!(account = %account_id, "Remediation pool unavailable; dispatch dropped");
            self.store.cancel_dispatch(account_id);
            return ScheduleOutcome::Dropped;
        }

        info!(
            account = %account_id,
            reason,
            first,
            delay_ms = delay.as_millis() as u64,
            "Remediation dispatched"
        );
        ScheduleOutcome::Dispatched { delay, first }
    }
}
