use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{MetricKind, MetricsSink, SecurityMetric};

/// Attribute carrying a refresh cycle's wall-clock duration
pub const DURATION_MS: &str = "duration_ms";

/// Aggregated totals since the collector was created
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SecurityMetricsSnapshot {
    pub refresh_attempts: usize,
    pub refresh_successes: usize,
    pub refresh_failures: usize,
    pub forced_logouts: usize,
    pub validation_failures: usize,
    pub authentications: usize,
    pub signouts: usize,
    /// Mean duration of completed refresh cycles
    pub mean_refresh_ms: Option<f64>,
    pub last_event_at: Option<DateTime<Utc>>,
}

/// Events kept in memory when no capacity is configured
pub const DEFAULT_METRICS_LOG_CAPACITY: usize = 256;

#[derive(Default)]
struct Counters {
    by_kind: HashMap<MetricKind, usize>,
    refresh_ms_total: f64,
    refresh_ms_count: usize,
    last_event_at: Option<DateTime<Utc>>,
}

struct State {
    counters: Counters,
    recent: VecDeque<SecurityMetric>,
}

/// Running totals over every recorded event plus a bounded window of the
/// most recent ones. Totals are unaffected when old events are evicted.
pub struct SecurityMetricsCollector {
    state: Mutex<State>,
    capacity: usize,
    sink: Option<Arc<dyn MetricsSink>>,
}

impl SecurityMetricsCollector {
    pub fn new(sink: Option<Arc<dyn MetricsSink>>) -> Self {
        Self::with_capacity(sink, DEFAULT_METRICS_LOG_CAPACITY)
    }

    /// `capacity` bounds the retained event window; a zero capacity keeps
    /// totals only.
    pub fn with_capacity(sink: Option<Arc<dyn MetricsSink>>, capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                counters: Counters::default(),
                recent: VecDeque::with_capacity(capacity.min(DEFAULT_METRICS_LOG_CAPACITY)),
            }),
            capacity,
            sink,
        }
    }

    pub fn record(&self, metric: SecurityMetric) {
        if let Some(ref sink) = self.sink {
            sink.record(&metric);
        }

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let counters = &mut state.counters;
        *counters.by_kind.entry(metric.kind).or_insert(0) += 1;
        if matches!(metric.kind, MetricKind::RefreshSuccess | MetricKind::RefreshFailure) {
            if let Some(ms) = metric.attribute(DURATION_MS).and_then(|v| v.parse::<f64>().ok()) {
                counters.refresh_ms_total += ms;
                counters.refresh_ms_count += 1;
            }
        }
        counters.last_event_at = Some(metric.timestamp);

        if self.capacity == 0 {
            return;
        }
        if state.recent.len() == self.capacity {
            state.recent.pop_front();
        }
        state.recent.push_back(metric);
    }

    /// Most recent events, oldest first
    pub fn events(&self) -> Vec<SecurityMetric> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent
            .iter()
            .cloned()
            .collect()
    }

    /// Total recorded events of `kind`, including evicted ones
    pub fn count(&self, kind: MetricKind) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
            .by_kind
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> SecurityMetricsSnapshot {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let counters = &state.counters;
        let count = |kind| counters.by_kind.get(&kind).copied().unwrap_or(0);

        SecurityMetricsSnapshot {
            refresh_attempts: count(MetricKind::RefreshAttempt),
            refresh_successes: count(MetricKind::RefreshSuccess),
            refresh_failures: count(MetricKind::RefreshFailure),
            forced_logouts: count(MetricKind::ForcedLogout),
            validation_failures: count(MetricKind::ValidationFailure),
            authentications: count(MetricKind::Authenticated),
            signouts: count(MetricKind::SignedOut),
            mean_refresh_ms: (counters.refresh_ms_count > 0)
                .then(|| counters.refresh_ms_total / counters.refresh_ms_count as f64),
            last_event_at: counters.last_event_at,
        }
    }
}

impl Default for SecurityMetricsCollector {
    fn default() -> Self {
        Self::new(None)
    }
}
