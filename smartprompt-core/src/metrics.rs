//! Runtime counters and latency tracking.
//!
//! Counters are lock-free `AtomicU64`s bumped on the query path. Latency
//! history sits behind a `parking_lot::Mutex` and is only locked for a
//! single write per routed query.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for engine events.
#[derive(Debug)]
pub struct EngineCounters {
    /// Pattern searches performed (routing included).
    pub searches: AtomicU64,
    /// Cumulative nanoseconds spent in searches (whole route time for routed searches).
    pub search_nanos: AtomicU64,
    /// Routing calls of any kind.
    pub routes: AtomicU64,
    /// Routing calls that returned an error decision.
    pub route_failures: AtomicU64,
    /// Documents assembled.
    pub assemblies: AtomicU64,
    /// Documents cut at the length limit.
    pub truncations: AtomicU64,
    /// Template renders that fell back to the raw body.
    pub template_fallbacks: AtomicU64,
    /// Successful reloads.
    pub reloads: AtomicU64,
    /// Reloads that kept the previous state.
    pub reload_failures: AtomicU64,
}

impl EngineCounters {
    /// Zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            searches: AtomicU64::new(0),
            search_nanos: AtomicU64::new(0),
            routes: AtomicU64::new(0),
            route_failures: AtomicU64::new(0),
            assemblies: AtomicU64::new(0),
            truncations: AtomicU64::new(0),
            template_fallbacks: AtomicU64::new(0),
            reloads: AtomicU64::new(0),
            reload_failures: AtomicU64::new(0),
        }
    }

    /// Increment a counter by one.
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            searches: self.searches.load(Ordering::Relaxed),
            search_nanos: self.search_nanos.load(Ordering::Relaxed),
            routes: self.routes.load(Ordering::Relaxed),
            route_failures: self.route_failures.load(Ordering::Relaxed),
            assemblies: self.assemblies.load(Ordering::Relaxed),
            truncations: self.truncations.load(Ordering::Relaxed),
            template_fallbacks: self.template_fallbacks.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Counter values at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    /// Pattern searches.
    pub searches: u64,
    /// Nanoseconds spent searching.
    pub search_nanos: u64,
    /// Routing calls.
    pub routes: u64,
    /// Failed routing calls.
    pub route_failures: u64,
    /// Documents assembled.
    pub assemblies: u64,
    /// Truncated documents.
    pub truncations: u64,
    /// Template fallbacks.
    pub template_fallbacks: u64,
    /// Successful reloads.
    pub reloads: u64,
    /// Failed reloads.
    pub reload_failures: u64,
}

impl CounterSnapshot {
    /// Mean search latency in microseconds (0 if nothing was searched).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn mean_search_us(&self) -> f64 {
        if self.searches == 0 {
            return 0.0;
        }
        self.search_nanos as f64 / self.searches as f64 / 1000.0
    }

    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        let rows: [(&str, &str, u64); 9] = [
            ("smartprompt_searches_total", "Pattern searches performed", self.searches),
            ("smartprompt_search_nanoseconds_total", "Time spent in pattern search", self.search_nanos),
            ("smartprompt_routes_total", "Routing calls", self.routes),
            ("smartprompt_route_failures_total", "Routing calls that failed", self.route_failures),
            ("smartprompt_assemblies_total", "Documents assembled", self.assemblies),
            ("smartprompt_truncations_total", "Documents truncated at the length limit", self.truncations),
            ("smartprompt_template_fallbacks_total", "Template renders that fell back to raw text", self.template_fallbacks),
            ("smartprompt_reloads_total", "Successful reloads", self.reloads),
            ("smartprompt_reload_failures_total", "Reloads that kept the previous state", self.reload_failures),
        ];

        let mut out = String::new();
        for (name, help, value) in rows {
            out.push_str(&format!(
                "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
            ));
        }
        out
    }
}

// ---------------------------------------------------------------------------
// Latency history
// ---------------------------------------------------------------------------

const HISTORY_LEN: usize = 256;

/// Ring buffer of recent operation timings with a slow-operation threshold.
#[derive(Debug)]
pub struct LatencyMonitor {
    slow_ms: f64,
    history: Mutex<LatencyHistory>,
}

#[derive(Debug)]
struct LatencyHistory {
    timings: Vec<f64>,
    write_idx: usize,
    count: u64,
}

impl LatencyMonitor {
    /// Create a monitor flagging operations slower than `slow_ms`.
    #[must_use]
    pub fn new(slow_ms: f64) -> Self {
        Self {
            slow_ms,
            history: Mutex::new(LatencyHistory {
                timings: vec![0.0; HISTORY_LEN],
                write_idx: 0,
                count: 0,
            }),
        }
    }

    /// Record one timing in milliseconds. Returns `true` if it was slow.
    pub fn record(&self, ms: f64) -> bool {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        h.timings[idx] = ms;
        h.write_idx = (idx + 1) % HISTORY_LEN;
        h.count += 1;
        ms > self.slow_ms
    }

    /// Number of timings recorded since creation.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.history.lock().count
    }

    /// The slow-operation threshold in milliseconds.
    #[must_use]
    pub fn slow_ms(&self) -> f64 {
        self.slow_ms
    }

    /// Percentiles over the retained history.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percentiles(&self) -> LatencyPercentiles {
        let h = self.history.lock();
        let n = usize::try_from(h.count).unwrap_or(usize::MAX).min(HISTORY_LEN);
        if n == 0 {
            return LatencyPercentiles::default();
        }

        let mut sorted: Vec<f64> = h.timings[..n].to_vec();
        sorted.sort_by(f64::total_cmp);

        let at = |q: f64| sorted[((n as f64 * q) as usize).min(n - 1)];
        LatencyPercentiles {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
            max: sorted[n - 1],
            slow_ratio: sorted.iter().filter(|&&t| t > self.slow_ms).count() as f64 / n as f64,
        }
    }
}

/// Latency percentiles in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    /// Median.
    pub p50: f64,
    /// 95th percentile.
    pub p95: f64,
    /// 99th percentile.
    pub p99: f64,
    /// Slowest retained timing.
    pub max: f64,
    /// Share of retained timings above the slow threshold (0.0 to 1.0).
    pub slow_ratio: f64,
}

// ---------------------------------------------------------------------------
// Tracing span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing` spans.
pub mod spans {
    /// Pattern search.
    pub const SEARCH: &str = "smartprompt::search";
    /// Routing (search + resolution).
    pub const ROUTE: &str = "smartprompt::route";
    /// Document assembly.
    pub const ASSEMBLE: &str = "smartprompt::assemble";
    /// Registry and index rebuild.
    pub const RELOAD: &str = "smartprompt::reload";
}
