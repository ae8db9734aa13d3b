/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::metrics::{MetricKind, MetricName, MetricsLog};
use anyhow::{anyhow, Context};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Avg,
    Min,
    Max,
    Med,
    Percentile(f64),
    Rate,
    Count,
}
impl Aggregation {
    fn parse(s: &str) -> anyhow::Result<Self> {
        let agg = match s {
            "avg" => Aggregation::Avg,
            "min" => Aggregation::Min,
            "max" => Aggregation::Max,
            "med" => Aggregation::Med,
            "rate" => Aggregation::Rate,
            "count" => Aggregation::Count,
            _ => {
                let pct = s
                    .strip_prefix("p(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| anyhow!("Unknown aggregation '{}'", s))?;
                let pct = pct
                    .trim()
                    .parse::<f64>()
                    .context(format!("Invalid percentile '{}'", s))?;
                if !(0.0..=100.0).contains(&pct) {
                    return Err(anyhow!("Percentile must be between 0 and 100, got {}", pct));
                }
                Aggregation::Percentile(pct)
            }
        };
        Ok(agg)
    }

    fn applies_to(&self, kind: MetricKind) -> bool {
        match self {
            Aggregation::Rate => kind == MetricKind::Rate,
            Aggregation::Count => kind == MetricKind::Counter,
            _ => kind == MetricKind::Trend,
        }
    }
}
impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Avg => f.write_str("avg"),
            Aggregation::Min => f.write_str("min"),
            Aggregation::Max => f.write_str("max"),
            Aggregation::Med => f.write_str("med"),
            Aggregation::Percentile(pct) => write!(f, "p({})", pct),
            Aggregation::Rate => f.write_str("rate"),
            Aggregation::Count => f.write_str("count"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
}
impl Operator {
    fn holds(&self, lhs: f64, rhs: f64) -> bool {
        match self {
            Operator::Lt => lhs < rhs,
            Operator::Le => lhs <= rhs,
            Operator::Gt => lhs > rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Eq => lhs == rhs,
            Operator::Ne => lhs != rhs,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::Eq => "==",
            Operator::Ne => "!=",
        }
    }
}

/// A pass/fail gate on an aggregated metric, e.g. `http_req_duration: p(95)<500`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub metric: MetricName,
    pub aggregation: Aggregation,
    pub operator: Operator,
    pub value: f64,
}
impl Threshold {
    pub fn parse(metric: &str, expr: &str) -> anyhow::Result<Self> {
        let metric = metric.parse::<MetricName>()?;

        // two character operators first so "<=" isn't read as "<"
        let (idx, operator) = ["<=", ">=", "==", "!=", "<", ">"]
            .iter()
            .find_map(|op| expr.find(op).map(|idx| (idx, *op)))
            .ok_or_else(|| anyhow!("Threshold '{}' has no comparison operator", expr))?;

        let operator = match operator {
            "<=" => Operator::Le,
            ">=" => Operator::Ge,
            "==" => Operator::Eq,
            "!=" => Operator::Ne,
            "<" => Operator::Lt,
            _ => Operator::Gt,
        };

        let lhs = expr[..idx].trim();
        let rhs = expr[idx + operator.as_str().len()..].trim();

        let aggregation = Aggregation::parse(lhs)?;
        if !aggregation.applies_to(metric.kind()) {
            return Err(anyhow!(
                "Aggregation {} cannot be applied to metric {}",
                aggregation,
                metric
            ));
        }

        let value = rhs
            .parse::<f64>()
            .context(format!("Invalid threshold value '{}'", rhs))?;

        Ok(Threshold {
            metric,
            aggregation,
            operator,
            value,
        })
    }

    /// The aggregated value this threshold compares against, if the run recorded any samples
    /// for its metric.
    pub fn observed(&self, metrics_log: &MetricsLog) -> Option<f64> {
        match self.metric {
            MetricName::HttpReqDuration => {
                aggregate_trend(&metrics_log.http_req_duration(), self.aggregation)
            }
            MetricName::IterationDuration => {
                aggregate_trend(&metrics_log.iteration_duration(), self.aggregation)
            }
            MetricName::HttpReqFailed => metrics_log.http_req_failed_rate(),
            MetricName::Checks => metrics_log.checks_rate(),
            MetricName::HttpReqs => Some(metrics_log.requests() as f64),
            MetricName::Iterations => Some(metrics_log.iterations() as f64),
        }
    }

    pub fn evaluate(&self, metrics_log: &MetricsLog) -> ThresholdResult {
        let observed = self.observed(metrics_log);
        let passed = observed
            .map(|observed| self.operator.holds(observed, self.value))
            .unwrap_or(false);

        ThresholdResult {
            threshold: self.clone(),
            observed,
            passed,
        }
    }
}
impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.aggregation,
            self.operator.as_str(),
            self.value
        )
    }
}

fn aggregate_trend(trend: &crate::metrics::Trend, aggregation: Aggregation) -> Option<f64> {
    match aggregation {
        Aggregation::Avg => trend.avg(),
        Aggregation::Min => trend.min(),
        Aggregation::Max => trend.max(),
        Aggregation::Med => trend.med(),
        Aggregation::Percentile(pct) => trend.percentile(pct),
        Aggregation::Rate | Aggregation::Count => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdResult {
    pub threshold: Threshold,
    pub observed: Option<f64>,
    pub passed: bool,
}
