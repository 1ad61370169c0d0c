//! Per-tenant circuit breakers.
//!
//! # Purpose
//! Gates calls to a tenant endpoint, counting terminal outcomes in a
//! count-based sliding window of the last `sliding_window_size` samples. A
//! tenant whose endpoint keeps failing trips its own breaker and stops
//! burning pool capacity; every other tenant is untouched.
//!
//! # State machine
//! - CLOSED: calls pass; once the window holds `min_calls_before_eval`
//!   samples and the failure rate reaches the threshold, trip to OPEN.
//! - OPEN: calls are rejected outright; after `open_state_duration` the next
//!   caller moves the breaker to HALF_OPEN.
//! - HALF_OPEN: up to `half_open_probe_count` probes are admitted. All
//!   probes succeeding closes the breaker and clears the window; any probe
//!   failing reopens it.
//!
//! Rejections are counted for telemetry but never enter the failure window;
//! letting them in would entrench the open state.
pub mod registry;

pub use registry::{BreakerConfigSource, BreakerRegistry};

use courier_core::{Error, TenantConfig};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    pub failure_rate_threshold_pct: f32,
    pub min_calls_before_eval: u32,
    pub open_state_duration: Duration,
    pub sliding_window_size: usize,
    pub half_open_probe_count: u32,
}

impl From<&TenantConfig> for BreakerConfig {
    fn from(cfg: &TenantConfig) -> Self {
        Self {
            failure_rate_threshold_pct: cfg.failure_rate_threshold_pct,
            min_calls_before_eval: cfg.min_calls_before_eval,
            open_state_duration: cfg.open_state_duration(),
            sliding_window_size: cfg.sliding_window_size.max(1),
            half_open_probe_count: cfg.half_open_probe_count.max(1),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self::from(&TenantConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Admission token returned by `try_acquire`; carried by the decorated task
/// so the terminal outcome is attributed to the right accounting lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Admitted while CLOSED; outcome feeds the sliding window.
    Normal,
    /// Admitted as a HALF_OPEN probe; outcome drives the probe verdict.
    Probe,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStats {
    pub business_unit: String,
    pub state: BreakerState,
    pub failure_rate: f32,
    pub number_of_calls: usize,
    pub number_of_successful_calls: usize,
    pub number_of_failed_calls: usize,
    pub number_of_not_permitted_calls: u64,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    // Ring of the last N terminal outcomes; true = failure.
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_permits_left: u32,
    half_open_successes: u32,
    not_permitted: u64,
}

/// Breaker for a single tenant. All mutation happens under one lock;
/// administrative transitions are serialized with the natural ones.
pub struct CircuitBreaker {
    tenant_id: String,
    cfg: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(tenant_id: &str, cfg: BreakerConfig) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            cfg,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                window: VecDeque::new(),
                opened_at: None,
                half_open_permits_left: 0,
                half_open_successes: 0,
                not_permitted: 0,
            }),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Asks the breaker whether a call may proceed.
    pub fn try_acquire(&self) -> Result<Admission, Error> {
        let mut inner = self.lock();
        match inner.state {
            BreakerState::Closed => Ok(Admission::Normal),
            BreakerState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.cfg.open_state_duration)
                    .unwrap_or(true);
                if elapsed {
                    self.enter_half_open(&mut inner);
                    inner.half_open_permits_left -= 1;
                    Ok(Admission::Probe)
                } else {
                    inner.not_permitted += 1;
                    Err(Error::BreakerOpen(self.tenant_id.clone()))
                }
            }
            BreakerState::HalfOpen => {
                if inner.half_open_permits_left > 0 {
                    inner.half_open_permits_left -= 1;
                    Ok(Admission::Probe)
                } else {
                    inner.not_permitted += 1;
                    Err(Error::BreakerOpen(self.tenant_id.clone()))
                }
            }
        }
    }

    /// Records the terminal outcome of an admitted call.
    pub fn record(&self, admission: Admission, success: bool) {
        let mut inner = self.lock();
        match admission {
            Admission::Probe => {
                if !matches!(inner.state, BreakerState::HalfOpen) {
                    // An administrative transition superseded this probe.
                    return;
                }
                if success {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.cfg.half_open_probe_count {
                        self.transition(&mut inner, BreakerState::Closed);
                    }
                } else {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            Admission::Normal => {
                // A task admitted while CLOSED runs to completion even if the
                // breaker tripped mid-flight; its late outcome only enters
                // the window while the breaker is still CLOSED.
                if !matches!(inner.state, BreakerState::Closed) {
                    return;
                }
                if inner.window.len() == self.cfg.sliding_window_size {
                    inner.window.pop_front();
                }
                inner.window.push_back(!success);
                let samples = inner.window.len() as u32;
                if samples >= self.cfg.min_calls_before_eval {
                    let failures = inner.window.iter().filter(|failed| **failed).count() as f32;
                    let rate = failures / samples as f32 * 100.0;
                    if rate >= self.cfg.failure_rate_threshold_pct {
                        self.transition(&mut inner, BreakerState::Open);
                    }
                }
            }
        }
    }

    /// Returns an unused admission, e.g. when the pool refused the decorated
    /// task before it could run. Keeps probe accounting honest.
    pub fn cancel(&self, admission: Admission) {
        if matches!(admission, Admission::Probe) {
            let mut inner = self.lock();
            if matches!(inner.state, BreakerState::HalfOpen) {
                inner.half_open_permits_left =
                    (inner.half_open_permits_left + 1).min(self.cfg.half_open_probe_count);
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        self.lock().state
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.state(), BreakerState::Closed)
    }

    pub fn force_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, BreakerState::Open);
    }

    pub fn force_closed(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, BreakerState::Closed);
    }

    pub fn force_half_open(&self) {
        let mut inner = self.lock();
        self.transition(&mut inner, BreakerState::HalfOpen);
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        let samples = inner.window.len();
        let failures = inner.window.iter().filter(|failed| **failed).count();
        let rate = if samples == 0 {
            0.0
        } else {
            failures as f32 / samples as f32 * 100.0
        };
        BreakerStats {
            business_unit: self.tenant_id.clone(),
            state: inner.state,
            failure_rate: rate,
            number_of_calls: samples,
            number_of_successful_calls: samples - failures,
            number_of_failed_calls: failures,
            number_of_not_permitted_calls: inner.not_permitted,
        }
    }

    fn enter_half_open(&self, inner: &mut BreakerInner) {
        inner.state = BreakerState::HalfOpen;
        inner.half_open_permits_left = self.cfg.half_open_probe_count;
        inner.half_open_successes = 0;
        tracing::warn!(tenant = %self.tenant_id, "breaker OPEN -> HALF_OPEN");
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        if inner.state == to {
            // Idempotent: re-forcing the current state changes nothing.
            return;
        }
        let from = inner.state;
        inner.state = to;
        match to {
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
                inner.half_open_permits_left = 0;
                inner.half_open_successes = 0;
            }
            BreakerState::HalfOpen => {
                inner.half_open_permits_left = self.cfg.half_open_probe_count;
                inner.half_open_successes = 0;
            }
            BreakerState::Closed => {
                inner.window.clear();
                inner.opened_at = None;
                inner.half_open_permits_left = 0;
                inner.half_open_successes = 0;
            }
        }
        tracing::warn!(tenant = %self.tenant_id, ?from, ?to, "breaker state transition");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().expect("breaker lock")
    }
}
