//! Security event recording.
//!
//! `SecurityMetricsCollector` keeps running totals and a bounded window of
//! recent auth events, and forwards each one to an optional external
//! `MetricsSink`.

pub mod collector;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

pub use collector::{
    SecurityMetricsCollector, SecurityMetricsSnapshot, DEFAULT_METRICS_LOG_CAPACITY,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    RefreshAttempt,
    RefreshSuccess,
    RefreshFailure,
    ForcedLogout,
    ValidationFailure,
    Authenticated,
    SignedOut,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::RefreshAttempt => "refresh_attempt",
            MetricKind::RefreshSuccess => "refresh_success",
            MetricKind::RefreshFailure => "refresh_failure",
            MetricKind::ForcedLogout => "forced_logout",
            MetricKind::ValidationFailure => "validation_failure",
            MetricKind::Authenticated => "authenticated",
            MetricKind::SignedOut => "signed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityMetric {
    pub kind: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

impl SecurityMetric {
    pub fn new(kind: MetricKind) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.attributes.insert(key.into(), value.to_string());
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// External destination for security events. Fire-and-forget: a sink must
/// not block and cannot fail the operation that produced the event.
pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: &SecurityMetric);
}

/// Emits every security event as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: &SecurityMetric) {
        info!(
            target: "sessionward::security",
            kind = metric.kind.as_str(),
            attributes = ?metric.attributes,
            "Security event"
        );
    }
}
