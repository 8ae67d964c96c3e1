use std::fmt;
use std::sync::Once;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{log_event, LogLevel};

pub const VITALS_ENDPOINT: &str = "/api/vitals";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    #[serde(rename = "LCP")]
    LargestContentfulPaint,
    #[serde(rename = "INP")]
    InteractionToNextPaint,
    #[serde(rename = "CLS")]
    CumulativeLayoutShift,
    #[serde(rename = "FCP")]
    FirstContentfulPaint,
    #[serde(rename = "TTFB")]
    TimeToFirstByte,
}

impl MetricName {
    pub const ALL: [Self; 5] = [
        Self::LargestContentfulPaint,
        Self::InteractionToNextPaint,
        Self::CumulativeLayoutShift,
        Self::FirstContentfulPaint,
        Self::TimeToFirstByte,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LargestContentfulPaint => "LCP",
            Self::InteractionToNextPaint => "INP",
            Self::CumulativeLayoutShift => "CLS",
            Self::FirstContentfulPaint => "FCP",
            Self::TimeToFirstByte => "TTFB",
        }
    }

    pub fn thresholds(self) -> (f64, f64) {
        match self {
            Self::LargestContentfulPaint => (2_500.0, 4_000.0),
            Self::InteractionToNextPaint => (200.0, 500.0),
            Self::CumulativeLayoutShift => (0.1, 0.25),
            Self::FirstContentfulPaint => (1_800.0, 3_000.0),
            Self::TimeToFirstByte => (800.0, 1_800.0),
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn for_value(name: MetricName, value: f64) -> Self {
        let (good, needs_improvement) = name.thresholds();
        if value <= good {
            Self::Good
        } else if value <= needs_improvement {
            Self::NeedsImprovement
        } else {
            Self::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NeedsImprovement => "needs-improvement",
            Self::Poor => "poor",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: MetricName,
    pub value: f64,
    pub rating: Rating,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub navigation_type: Option<String>,
}

impl Metric {
    pub fn new(name: MetricName, value: f64, id: impl Into<String>) -> Self {
        Self {
            name,
            value,
            rating: Rating::for_value(name, value),
            id: id.into(),
            navigation_type: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
    #[serde(default)]
    pub viewport: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VitalsEvent {
    pub metric: Metric,
    pub page: PageContext,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VitalsValidationError {
    #[error("metric value must be a finite, non-negative number")]
    InvalidValue,
    #[error("metric id must not be empty")]
    MissingId,
    #[error("page path must start with '/'")]
    InvalidPath,
}

impl VitalsEvent {
    pub fn validate(&self) -> Result<(), VitalsValidationError> {
        if !self.metric.value.is_finite() || self.metric.value < 0.0 {
            return Err(VitalsValidationError::InvalidValue);
        }
        if self.metric.id.trim().is_empty() {
            return Err(VitalsValidationError::MissingId);
        }
        if !self.page.path.starts_with('/') {
            return Err(VitalsValidationError::InvalidPath);
        }
        Ok(())
    }
}

const CLS_SESSION_GAP_MS: f64 = 1_000.0;
const CLS_SESSION_MAX_MS: f64 = 5_000.0;
const INP_INTERACTIONS_PER_SKIP: usize = 50;
const INP_LONGEST_KEPT: usize = 10;

#[derive(Clone, Copy, Debug, Default)]
struct ShiftSession {
    value: f64,
    first_ms: f64,
    last_ms: f64,
}

#[derive(Clone, Debug, Default)]
pub struct VitalsAccumulator {
    largest_paint_ms: Option<f64>,
    session: Option<ShiftSession>,
    worst_session: f64,
    saw_layout_shift: bool,
    longest_interactions: Vec<(u64, f64)>,
    interaction_count: usize,
    last_interaction_id: u64,
    first_input_ms: Option<f64>,
    finalized: bool,
}

impl VitalsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_largest_paint(&mut self, start_ms: f64) {
        if self.finalized || !start_ms.is_finite() {
            return;
        }
        self.largest_paint_ms = Some(start_ms);
    }

    /// A new window opens after a 1 s gap or once the current one spans 5 s.
    /// Shifts right after user input do not count.
    pub fn record_layout_shift(&mut self, start_ms: f64, value: f64, had_recent_input: bool) {
        if self.finalized || had_recent_input || !value.is_finite() {
            return;
        }
        self.saw_layout_shift = true;

        let session = match self.session {
            Some(current)
                if start_ms - current.last_ms < CLS_SESSION_GAP_MS
                    && start_ms - current.first_ms < CLS_SESSION_MAX_MS =>
            {
                ShiftSession {
                    value: current.value + value,
                    first_ms: current.first_ms,
                    last_ms: start_ms,
                }
            }
            _ => ShiftSession {
                value,
                first_ms: start_ms,
                last_ms: start_ms,
            },
        };

        self.worst_session = self.worst_session.max(session.value);
        self.session = Some(session);
    }

    /// Interaction ids only grow, so a larger id is a new interaction. Only
    /// the longest few are kept.
    pub fn record_interaction(&mut self, interaction_id: u64, duration_ms: f64) {
        if self.finalized || interaction_id == 0 || !duration_ms.is_finite() {
            return;
        }
        if interaction_id > self.last_interaction_id {
            self.last_interaction_id = interaction_id;
            self.interaction_count += 1;
        }

        if let Some((_, longest)) = self
            .longest_interactions
            .iter_mut()
            .find(|(id, _)| *id == interaction_id)
        {
            *longest = longest.max(duration_ms);
        } else {
            self.longest_interactions.push((interaction_id, duration_ms));
        }
        self.longest_interactions.sort_by(|a, b| b.1.total_cmp(&a.1));
        self.longest_interactions.truncate(INP_LONGEST_KEPT);
    }

    pub fn record_first_input(&mut self, duration_ms: f64) {
        if self.finalized || !duration_ms.is_finite() || self.first_input_ms.is_some() {
            return;
        }
        self.first_input_ms = Some(duration_ms.max(0.0));
    }

    pub fn cumulative_layout_shift(&self) -> f64 {
        self.worst_session
    }

    /// Worst interaction, skipping one outlier per 50 interactions.
    pub fn interaction_to_next_paint(&self) -> Option<f64> {
        if self.longest_interactions.is_empty() {
            return self.first_input_ms;
        }
        let skip = (self.interaction_count / INP_INTERACTIONS_PER_SKIP)
            .min(self.longest_interactions.len() - 1);
        Some(self.longest_interactions[skip].1)
    }

    pub fn finalize(&mut self, id_prefix: &str) -> Vec<Metric> {
        if self.finalized {
            return Vec::new();
        }
        self.finalized = true;

        let mut metrics = Vec::new();
        if let Some(largest_paint_ms) = self.largest_paint_ms {
            metrics.push(Metric::new(
                MetricName::LargestContentfulPaint,
                largest_paint_ms,
                format!("{id_prefix}-lcp"),
            ));
        }
        if self.saw_layout_shift || self.largest_paint_ms.is_some() {
            metrics.push(Metric::new(
                MetricName::CumulativeLayoutShift,
                self.cumulative_layout_shift(),
                format!("{id_prefix}-cls"),
            ));
        }
        if let Some(inp) = self.interaction_to_next_paint() {
            metrics.push(Metric::new(
                MetricName::InteractionToNextPaint,
                inp,
                format!("{id_prefix}-inp"),
            ));
        }
        metrics
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("could not encode vitals event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("analytics sink rejected event: {0}")]
    Delivery(String),
}

/// Destination for vitals events. Delivery is fire-and-forget: an `Ok`
/// means the event was handed off, not that it arrived.
pub trait AnalyticsSink {
    fn deliver(&self, event: &VitalsEvent) -> Result<(), SinkError>;
}

pub struct Reporter<S> {
    sink: S,
    subscribed: Once,
}

impl<S: AnalyticsSink> Reporter<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            subscribed: Once::new(),
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn subscribe_once<F: FnOnce()>(&self, subscribe: F) -> bool {
        let mut ran = false;
        self.subscribed.call_once(|| {
            subscribe();
            ran = true;
        });
        ran
    }

    pub fn report(&self, metric: Metric, page: &PageContext) -> bool {
        let event = VitalsEvent {
            metric,
            page: page.clone(),
        };

        log_event(
            LogLevel::Debug,
            "vitals_metric",
            serde_json::json!({
                "metric": event.metric.name.as_str(),
                "value": event.metric.value,
                "rating": event.metric.rating.as_str(),
                "path": event.page.path.as_str(),
            }),
        );

        match self.sink.deliver(&event) {
            Ok(()) => true,
            Err(error) => {
                log_event(
                    LogLevel::Warn,
                    "vitals_sink_failed",
                    serde_json::json!({
                        "metric": event.metric.name.as_str(),
                        "message": error.to_string(),
                    }),
                );
                false
            }
        }
    }
}
