//! Credential & Model Health Tracker
//!
//! Process-wide bookkeeping that steers the fallback orchestrator away from
//! exhausted credentials and failing models. State lives behind a mutex in an
//! explicitly constructed tracker that callers share through `Arc`.
//!
//! Credentials: each failure that looks like a quota or rate-limit rejection
//! extends a streak; at [`EXHAUST_THRESHOLD`] the credential is exhausted and
//! skipped until [`CREDENTIAL_COOLDOWN`] has passed. Expiry is checked lazily
//! on read. A success resets the streak.
//!
//! Models: unhealthy while they have failed at least
//! [`MODEL_FAILURE_THRESHOLD`] times in a row with the last failure inside
//! [`MODEL_FAILURE_WINDOW`]. Model health only affects ordering.
//!
//! Every time-dependent method has an `*_at(now)` twin for tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::types::credential_label;

pub const EXHAUST_THRESHOLD: u32 = 3;
pub const CREDENTIAL_COOLDOWN: Duration = Duration::from_secs(120);
pub const MODEL_FAILURE_THRESHOLD: u32 = 2;
pub const MODEL_FAILURE_WINDOW: Duration = Duration::from_secs(120);

/// Thresholds used by [`HealthTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub exhaust_threshold: u32,
    pub cooldown: Duration,
    pub model_failure_threshold: u32,
    pub model_failure_window: Duration,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            exhaust_threshold: EXHAUST_THRESHOLD,
            cooldown: CREDENTIAL_COOLDOWN,
            model_failure_threshold: MODEL_FAILURE_THRESHOLD,
            model_failure_window: MODEL_FAILURE_WINDOW,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CredentialState {
    fail_streak: u32,
    exhausted_at: Option<Instant>,
}

#[derive(Debug, Clone, Default)]
struct ModelState {
    consecutive_fails: u32,
    last_failure_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct HealthState {
    credentials: Vec<CredentialState>,
    models: HashMap<String, ModelState>,
}

/// Point-in-time view of one credential, for diagnostics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialHealth {
    pub label: String,
    pub fail_streak: u32,
    pub exhausted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining_secs: Option<u64>,
}

/// Point-in-time view of one model, for diagnostics
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelHealthEntry {
    pub model: String,
    pub consecutive_fails: u32,
    pub healthy: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub credentials: Vec<CredentialHealth>,
    pub models: Vec<ModelHealthEntry>,
}

/// Health tracker for the credential pool and model rosters
#[derive(Debug)]
pub struct HealthTracker {
    policy: HealthPolicy,
    state: Mutex<HealthState>,
}

impl HealthTracker {
    /// Create a tracker for `credential_count` credentials with default thresholds.
    pub fn new(credential_count: usize) -> Self {
        Self::with_policy(credential_count, HealthPolicy::default())
    }

    pub fn with_policy(credential_count: usize, policy: HealthPolicy) -> Self {
        Self {
            policy,
            state: Mutex::new(HealthState {
                credentials: vec![CredentialState::default(); credential_count],
                models: HashMap::new(),
            }),
        }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    pub fn credential_count(&self) -> usize {
        self.state().credentials.len()
    }

    fn state(&self) -> MutexGuard<'_, HealthState> {
        // A panic while holding the lock leaves plain counters behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ========================================================================
    // Credentials
    // ========================================================================

    /// First usable credential in pool order.
    ///
    /// When every credential is exhausted, the least recently exhausted one is
    /// reinstated (ties go to the lowest index). `None` only for an empty pool.
    pub fn next_usable_credential(&self) -> Option<usize> {
        self.next_usable_credential_at(Instant::now())
    }

    pub fn next_usable_credential_at(&self, now: Instant) -> Option<usize> {
        let mut state = self.state();
        let cooldown = self.policy.cooldown;

        for (index, cred) in state.credentials.iter_mut().enumerate() {
            if refresh(cred, now, cooldown) {
                return Some(index);
            }
        }

        let oldest = state
            .credentials
            .iter()
            .enumerate()
            .min_by_key(|(index, cred)| (cred.exhausted_at, *index))
            .map(|(index, _)| index)?;
        let cred = &mut state.credentials[oldest];
        cred.exhausted_at = None;
        cred.fail_streak = 0;
        info!(
            credential = %credential_label(oldest),
            "All credentials exhausted; reinstating least recently exhausted"
        );
        Some(oldest)
    }

    /// Whether the credential may be used right now.
    pub fn is_credential_usable(&self, index: usize) -> bool {
        self.is_credential_usable_at(index, Instant::now())
    }

    pub fn is_credential_usable_at(&self, index: usize, now: Instant) -> bool {
        let cooldown = self.policy.cooldown;
        self.state()
            .credentials
            .get_mut(index)
            .is_some_and(|cred| refresh(cred, now, cooldown))
    }

    /// Record a quota/rate-limit failure against the credential.
    pub fn record_failure(&self, index: usize) {
        self.record_failure_at(index, Instant::now());
    }

    pub fn record_failure_at(&self, index: usize, now: Instant) {
        let threshold = self.policy.exhaust_threshold;
        let mut state = self.state();
        let Some(cred) = state.credentials.get_mut(index) else {
            return;
        };
        cred.fail_streak += 1;
        if cred.fail_streak >= threshold {
            if cred.exhausted_at.is_none() {
                warn!(
                    credential = %credential_label(index),
                    failures = cred.fail_streak,
                    "Credential exhausted"
                );
            }
            cred.exhausted_at = Some(now);
        }
    }

    /// Record a successful call; clears the failure streak.
    pub fn record_success(&self, index: usize) {
        if let Some(cred) = self.state().credentials.get_mut(index) {
            cred.fail_streak = 0;
        }
    }

    // ========================================================================
    // Models
    // ========================================================================

    pub fn model_healthy(&self, model: &str) -> bool {
        self.model_healthy_at(model, Instant::now())
    }

    pub fn model_healthy_at(&self, model: &str, now: Instant) -> bool {
        let state = self.state();
        match state.models.get(model) {
            Some(health) => is_model_healthy(health, &self.policy, now),
            None => true,
        }
    }

    pub fn record_model_failure(&self, model: &str) {
        self.record_model_failure_at(model, Instant::now());
    }

    pub fn record_model_failure_at(&self, model: &str, now: Instant) {
        let mut state = self.state();
        let health = state.models.entry(model.to_string()).or_default();
        health.consecutive_fails += 1;
        health.last_failure_at = Some(now);
    }

    pub fn record_model_success(&self, model: &str) {
        self.state().models.remove(model);
    }

    // ========================================================================
    // Diagnostics
    // ========================================================================

    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> HealthSnapshot {
        let state = self.state();
        let credentials = state
            .credentials
            .iter()
            .enumerate()
            .map(|(index, cred)| {
                let remaining = cred.exhausted_at.and_then(|at| {
                    self.policy
                        .cooldown
                        .checked_sub(now.saturating_duration_since(at))
                });
                CredentialHealth {
                    label: credential_label(index),
                    fail_streak: cred.fail_streak,
                    exhausted: remaining.is_some(),
                    cooldown_remaining_secs: remaining.map(|d| d.as_secs()),
                }
            })
            .collect();

        let mut models: Vec<ModelHealthEntry> = state
            .models
            .iter()
            .map(|(model, health)| ModelHealthEntry {
                model: model.clone(),
                consecutive_fails: health.consecutive_fails,
                healthy: is_model_healthy(health, &self.policy, now),
            })
            .collect();
        models.sort_by(|a, b| a.model.cmp(&b.model));

        HealthSnapshot {
            credentials,
            models,
        }
    }
}

/// Clear an expired exhaustion; returns whether the credential is usable.
fn refresh(cred: &mut CredentialState, now: Instant, cooldown: Duration) -> bool {
    match cred.exhausted_at {
        None => true,
        Some(at) if now.saturating_duration_since(at) > cooldown => {
            cred.exhausted_at = None;
            cred.fail_streak = 0;
            true
        }
        Some(_) => false,
    }
}

fn is_model_healthy(health: &ModelState, policy: &HealthPolicy, now: Instant) -> bool {
    let recent = health
        .last_failure_at
        .is_some_and(|at| now.saturating_duration_since(at) < policy.model_failure_window);
    !(health.consecutive_fails >= policy.model_failure_threshold && recent)
}
