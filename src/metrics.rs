/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::anyhow;
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fmt,
    str::FromStr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

pub type SharedMetricsLog = Arc<Mutex<MetricsLog>>;

/// Locks the shared metrics log. A VU that panicked while holding the lock leaves the log in a
/// usable state because every update is a single push or increment.
pub fn lock(metrics_log: &SharedMetricsLog) -> MutexGuard<'_, MetricsLog> {
    metrics_log.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Metrics recorded during a run which thresholds can refer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    HttpReqDuration,
    IterationDuration,
    HttpReqFailed,
    Checks,
    HttpReqs,
    Iterations,
}
impl MetricName {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricName::HttpReqDuration | MetricName::IterationDuration => MetricKind::Trend,
            MetricName::HttpReqFailed | MetricName::Checks => MetricKind::Rate,
            MetricName::HttpReqs | MetricName::Iterations => MetricKind::Counter,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::HttpReqDuration => "http_req_duration",
            MetricName::IterationDuration => "iteration_duration",
            MetricName::HttpReqFailed => "http_req_failed",
            MetricName::Checks => "checks",
            MetricName::HttpReqs => "http_reqs",
            MetricName::Iterations => "iterations",
        }
    }
}
impl FromStr for MetricName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "http_req_duration" => Ok(MetricName::HttpReqDuration),
            "iteration_duration" => Ok(MetricName::IterationDuration),
            "http_req_failed" => Ok(MetricName::HttpReqFailed),
            "checks" => Ok(MetricName::Checks),
            "http_reqs" => Ok(MetricName::HttpReqs),
            "iterations" => Ok(MetricName::Iterations),
            _ => Err(anyhow!("Unknown metric '{}'", s)),
        }
    }
}
impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Trend,
    Rate,
    Counter,
}

/// How a single request ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Status(u16),
    Timeout,
    Error(String),
}
impl RequestOutcome {
    /// Key used in the status breakdown of the summary.
    pub fn status_key(&self) -> String {
        match self {
            RequestOutcome::Status(code) => code.to_string(),
            RequestOutcome::Timeout => "TIMEOUT".to_string(),
            RequestOutcome::Error(_) => "REQUEST_ERROR".to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestOutcome::Status(code) => Some(*code),
            _ => None,
        }
    }
}

/// Pass and fail counts for a single named check.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CheckCounts {
    pub passes: u64,
    pub fails: u64,
}
impl CheckCounts {
    pub fn total(&self) -> u64 {
        self.passes + self.fails
    }

    pub fn rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.passes as f64 / total as f64),
        }
    }
}

/// A sorted set of samples in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trend {
    sorted: Vec<f64>,
}
impl Trend {
    pub fn new(mut samples: Vec<f64>) -> Self {
        samples.sort_by(|a, b| a.total_cmp(b));
        Trend { sorted: samples }
    }

    pub fn count(&self) -> usize {
        self.sorted.len()
    }

    pub fn min(&self) -> Option<f64> {
        self.sorted.first().copied()
    }

    pub fn max(&self) -> Option<f64> {
        self.sorted.last().copied()
    }

    pub fn avg(&self) -> Option<f64> {
        if self.sorted.is_empty() {
            return None;
        }
        Some(self.sorted.iter().sum::<f64>() / self.sorted.len() as f64)
    }

    pub fn med(&self) -> Option<f64> {
        self.percentile(50.0)
    }

    /// Percentile using linear interpolation between the closest ranks.
    pub fn percentile(&self, pct: f64) -> Option<f64> {
        let n = self.sorted.len();
        if n == 0 {
            return None;
        }

        let rank = (pct.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let weight = rank - lo as f64;
        Some(self.sorted[lo] + (self.sorted[hi] - self.sorted[lo]) * weight)
    }
}

/// Everything observed during a run. Shared between VUs behind a mutex.
#[derive(Debug, Default, Clone)]
pub struct MetricsLog {
    req_durations: Vec<f64>,
    iteration_durations: Vec<f64>,
    requests: u64,
    failed_requests: u64,
    status_counts: BTreeMap<String, u64>,
    checks: BTreeMap<String, CheckCounts>,
    vus_max: usize,
}
impl MetricsLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedMetricsLog {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Records a finished request. Every request contributes to `http_req_duration`, including
    /// ones that timed out or failed before a response arrived.
    pub fn push_request(&mut self, outcome: &RequestOutcome, elapsed: Duration, expected: u16) {
        self.requests += 1;
        if outcome.status() != Some(expected) {
            self.failed_requests += 1;
        }
        self.req_durations.push(as_millis(elapsed));
        *self.status_counts.entry(outcome.status_key()).or_insert(0) += 1;
    }

    pub fn push_check(&mut self, name: &str, passed: bool) {
        let counts = self.checks.entry(name.to_string()).or_default();
        if passed {
            counts.passes += 1;
        } else {
            counts.fails += 1;
        }
    }

    pub fn push_iteration(&mut self, elapsed: Duration) {
        self.iteration_durations.push(as_millis(elapsed));
    }

    pub fn observe_vus(&mut self, vus: usize) {
        self.vus_max = self.vus_max.max(vus);
    }

    pub fn http_req_duration(&self) -> Trend {
        Trend::new(self.req_durations.clone())
    }

    pub fn iteration_duration(&self) -> Trend {
        Trend::new(self.iteration_durations.clone())
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests
    }

    pub fn iterations(&self) -> u64 {
        self.iteration_durations.len() as u64
    }

    pub fn vus_max(&self) -> usize {
        self.vus_max
    }

    pub fn http_req_failed_rate(&self) -> Option<f64> {
        match self.requests {
            0 => None,
            total => Some(self.failed_requests as f64 / total as f64),
        }
    }

    /// Pass rate over every check recorded during the run.
    pub fn checks_rate(&self) -> Option<f64> {
        self.checks_total().rate()
    }

    pub fn checks_total(&self) -> CheckCounts {
        self.checks
            .values()
            .fold(CheckCounts::default(), |acc, counts| CheckCounts {
                passes: acc.passes + counts.passes,
                fails: acc.fails + counts.fails,
            })
    }

    pub fn get_check(&self, name: &str) -> Option<&CheckCounts> {
        self.checks.get(name)
    }

    pub fn get_checks(&self) -> &BTreeMap<String, CheckCounts> {
        &self.checks
    }

    pub fn get_status_counts(&self) -> &BTreeMap<String, u64> {
        &self.status_counts
    }
}

fn as_millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}
