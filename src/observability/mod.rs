//! Observability for probing and routing.
//!
//! Provides logging setup and atomic-counter metrics.

mod logging;

pub use logging::{init_logging, LogFormat, LogLevel, LoggingConfig, Redacted};

use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::ErrorKind;
use crate::types::ProbeResult;

/// Probe metrics collector.
#[derive(Debug, Default)]
pub struct ProbeMetrics {
    /// Probes started.
    pub attempts: AtomicU64,
    /// Probes whose credentials were accepted.
    pub successes: AtomicU64,
    /// Failures by kind, indexed like [`ErrorKind::ALL`].
    failures: [AtomicU64; 5],
    /// Probes settled by the timeout rather than a connection event.
    pub timeouts: AtomicU64,
}

fn kind_index(kind: ErrorKind) -> usize {
    match kind {
        ErrorKind::UnresponsiveServer => 0,
        ErrorKind::BadUserOrPass => 1,
        ErrorKind::BadSecurity => 2,
        ErrorKind::ServerProblem => 3,
        ErrorKind::Unknown => 4,
    }
}

impl ProbeMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a probe start.
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a settled probe.
    pub fn record_result(&self, result: &ProbeResult, timed_out: bool) {
        match result.error {
            None => {
                self.successes.fetch_add(1, Ordering::Relaxed);
            }
            Some(kind) => {
                self.failures[kind_index(kind)].fetch_add(1, Ordering::Relaxed);
            }
        }
        if timed_out {
            self.timeouts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> ProbeMetricsSnapshot {
        let mut failures = [0u64; 5];
        for (slot, counter) in failures.iter_mut().zip(&self.failures) {
            *slot = counter.load(Ordering::Relaxed);
        }
        ProbeMetricsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures,
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ProbeMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeMetricsSnapshot {
    /// Probes started.
    pub attempts: u64,
    /// Probes that succeeded.
    pub successes: u64,
    failures: [u64; 5],
    /// Probes settled by the timeout.
    pub timeouts: u64,
}

impl ProbeMetricsSnapshot {
    /// Returns the failure count for one kind.
    pub fn failures_for(&self, kind: ErrorKind) -> u64 {
        self.failures[kind_index(kind)]
    }

    /// Returns the total failure count.
    pub fn failures(&self) -> u64 {
        self.failures.iter().sum()
    }

    /// Returns probes started but not yet settled.
    pub fn in_flight(&self) -> u64 {
        self.attempts.saturating_sub(self.successes + self.failures())
    }
}

/// Router metrics collector.
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Messages handed to an endpoint.
    pub dispatched: AtomicU64,
    /// Messages dropped for lack of an endpoint.
    pub unroutable: AtomicU64,
    /// Inbound messages dropped as malformed.
    pub malformed: AtomicU64,
    /// Messages posted to the background context.
    pub forwarded: AtomicU64,
    /// Primary channel messages queued before the handshake.
    pub buffered: AtomicU64,
    /// Queued messages released by the handshake.
    pub flushed: AtomicU64,
    /// Disconnect notifications delivered to endpoints.
    pub disconnects: AtomicU64,
}

impl RouterMetrics {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Returns a snapshot of all metrics.
    pub fn snapshot(&self) -> RouterMetricsSnapshot {
        RouterMetricsSnapshot {
            dispatched: self.dispatched.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            buffered: self.buffered.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`RouterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct RouterMetricsSnapshot {
    pub dispatched: u64,
    pub unroutable: u64,
    pub malformed: u64,
    pub forwarded: u64,
    pub buffered: u64,
    pub flushed: u64,
    pub disconnects: u64,
}
