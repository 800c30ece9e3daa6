//! Execution budget checks.
//!
//! A `BudgetGuard` is created per execution and answers whether the scan must
//! checkpoint before touching the next page. Time is read through `Clock` and
//! remaining usage through `UsageMeter`, so both can be driven by tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use tracing::debug;

use crate::config::BudgetConfig;

/// Millisecond clock used for elapsed-time checks.
pub trait Clock: Send + Sync {
    /// Current reading in milliseconds; only differences are meaningful.
    fn now_ms(&self) -> u64;
}

/// Monotonic clock anchored at construction.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Manually advanced clock for tests and simulated hosts.
///
/// Clones share the same reading.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock reading `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Jump to an absolute reading.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    /// Move the reading forward by `delta_ms`.
    pub fn advance(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Source of the host's remaining usage allowance.
pub trait UsageMeter: Send + Sync {
    /// Usage units left for the current execution.
    fn remaining_usage(&self) -> i64;
}

/// Meter for hosts without a usage quota.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnmeteredUsage;

impl UsageMeter for UnmeteredUsage {
    fn remaining_usage(&self) -> i64 {
        i64::MAX
    }
}

/// Shared usage counter that callers charge as work is done.
#[derive(Clone, Debug)]
pub struct UsageLedger {
    remaining: Arc<AtomicI64>,
}

impl UsageLedger {
    /// Create a ledger holding `units`.
    pub fn new(units: i64) -> Self {
        Self {
            remaining: Arc::new(AtomicI64::new(units)),
        }
    }

    /// Spend `units` from the ledger.
    pub fn charge(&self, units: i64) {
        self.remaining.fetch_sub(units, Ordering::SeqCst);
    }

    /// Reset the ledger, e.g. when a fresh execution starts.
    pub fn refill(&self, units: i64) {
        self.remaining.store(units, Ordering::SeqCst);
    }
}

impl UsageMeter for UsageLedger {
    fn remaining_usage(&self) -> i64 {
        self.remaining.load(Ordering::SeqCst)
    }
}

/// Per-execution time and usage guard.
pub struct BudgetGuard {
    config: BudgetConfig,
    clock: Arc<dyn Clock>,
    baseline_ms: Option<u64>,
}

impl BudgetGuard {
    /// Create a guard; the baseline is set by `start` or the first time check.
    pub fn new(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            baseline_ms: None,
        }
    }

    /// Record the baseline. No-op when a baseline already exists.
    pub fn start(&mut self) {
        if self.baseline_ms.is_none() {
            self.baseline_ms = Some(self.clock.now_ms());
        }
    }

    /// Baseline reading, if started.
    pub fn baseline_ms(&self) -> Option<u64> {
        self.baseline_ms
    }

    /// True once `time_limit` has elapsed since the baseline.
    pub fn time_exhausted(&mut self) -> bool {
        self.start();
        let baseline = self.baseline_ms.unwrap_or_default();
        let elapsed = self.clock.now_ms().saturating_sub(baseline);
        let limit = self.config.time_limit.as_millis() as u64;
        debug!(
            "[reconcile:budget] remaining time before restart: {} ms",
            limit as i128 - elapsed as i128
        );
        elapsed >= limit
    }

    /// True once `remaining` no longer covers the configured reserve.
    pub fn quota_exhausted(&self, remaining: i64) -> bool {
        let headroom = remaining.saturating_sub(self.config.usage_reserve);
        debug!("[reconcile:budget] remaining usage before restart: {headroom}");
        headroom <= 0
    }

    /// Combined check run before each page.
    pub fn exhausted(&mut self, meter: &dyn UsageMeter) -> bool {
        self.time_exhausted() || self.quota_exhausted(meter.remaining_usage())
    }
}
