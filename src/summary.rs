/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    executor::RunOutcome,
    metrics::{MetricsLog, Trend},
    threshold::{Threshold, ThresholdResult},
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::*;
use itertools::Itertools;
use serde::Serialize;
use std::{collections::BTreeMap, fs, path::Path};
use term_table::{row, row::Row, rows, table_cell::*, Table, TableStyle};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendSummary {
    pub count: usize,
    pub avg: Option<f64>,
    pub min: Option<f64>,
    pub med: Option<f64>,
    pub max: Option<f64>,
    pub p90: Option<f64>,
    pub p95: Option<f64>,
}
impl From<&Trend> for TrendSummary {
    fn from(trend: &Trend) -> Self {
        TrendSummary {
            count: trend.count(),
            avg: trend.avg(),
            min: trend.min(),
            med: trend.med(),
            max: trend.max(),
            p90: trend.percentile(90.0),
            p95: trend.percentile(95.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckSummary {
    pub name: String,
    pub passes: u64,
    pub fails: u64,
}

/// End of run report. Thresholds are evaluated once, over every sample in the run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub interrupted: bool,
    pub checks: Vec<CheckSummary>,
    pub http_req_duration: TrendSummary,
    pub iteration_duration: TrendSummary,
    pub http_reqs: u64,
    pub http_req_failed: Option<f64>,
    pub iterations: u64,
    pub vus_max: usize,
    pub status_counts: BTreeMap<String, u64>,
    pub thresholds: Vec<ThresholdResult>,
}
impl RunSummary {
    pub fn new(
        run_id: &str,
        outcome: &RunOutcome,
        metrics_log: &MetricsLog,
        thresholds: &[Threshold],
    ) -> Self {
        let checks = metrics_log
            .get_checks()
            .iter()
            .map(|(name, counts)| CheckSummary {
                name: name.clone(),
                passes: counts.passes,
                fails: counts.fails,
            })
            .collect_vec();

        RunSummary {
            run_id: run_id.to_string(),
            started_at: outcome.started_at,
            stopped_at: outcome.stopped_at,
            elapsed_secs: outcome.elapsed.as_secs_f64(),
            interrupted: outcome.interrupted,
            checks,
            http_req_duration: TrendSummary::from(&metrics_log.http_req_duration()),
            iteration_duration: TrendSummary::from(&metrics_log.iteration_duration()),
            http_reqs: metrics_log.requests(),
            http_req_failed: metrics_log.http_req_failed_rate(),
            iterations: metrics_log.iterations(),
            vus_max: metrics_log.vus_max(),
            status_counts: metrics_log.get_status_counts().clone(),
            thresholds: thresholds
                .iter()
                .map(|threshold| threshold.evaluate(metrics_log))
                .collect(),
        }
    }

    /// True when every threshold holds.
    pub fn passed(&self) -> bool {
        self.thresholds.iter().all(|result| result.passed)
    }

    pub fn export_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).context(format!("Unable to write summary to {}", path.display()))
    }

    pub fn render(&self) -> String {
        let mut out = vec![format!("\n{}", " Summary ".reversed().green())];
        out.push(format!(
            "run {} - {} to {} ({:.1}s){}",
            self.run_id.bold(),
            self.started_at.format("%Y/%m/%d %H:%M:%S"),
            self.stopped_at.format("%H:%M:%S"),
            self.elapsed_secs,
            if self.interrupted {
                " interrupted".yellow().to_string()
            } else {
                String::new()
            }
        ));

        out.push(self.checks_table().render());
        out.push(self.trends_table().render());
        out.push(self.counters_table().render());
        if !self.thresholds.is_empty() {
            out.push(self.thresholds_table().render());
        }

        out.join("\n")
    }

    fn checks_table(&self) -> Table {
        let mut rows: Vec<Row> = rows![row![
            TableCell::builder("Check".bold()).build(),
            TableCell::builder("Passes".bold()).build(),
            TableCell::builder("Fails".bold()).build(),
            TableCell::builder("Rate".bold()).build()
        ]];

        for check in self.checks.iter() {
            let total = check.passes + check.fails;
            let rate = match total {
                0 => "--".bright_black(),
                _ => {
                    let rate = format!("{:.2}%", check.passes as f64 / total as f64 * 100.0);
                    if check.fails == 0 {
                        rate.green()
                    } else {
                        rate.red()
                    }
                }
            };
            rows.push(row![
                TableCell::new(&check.name),
                TableCell::new(check.passes),
                TableCell::new(check.fails),
                TableCell::new(rate)
            ]);
        }

        Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build()
    }

    fn trends_table(&self) -> Table {
        let trend_row = |name: &str, trend: &TrendSummary| {
            row![
                TableCell::new(name),
                TableCell::new(fmt_ms(trend.avg)),
                TableCell::new(fmt_ms(trend.min)),
                TableCell::new(fmt_ms(trend.med)),
                TableCell::new(fmt_ms(trend.max)),
                TableCell::new(fmt_ms(trend.p90)),
                TableCell::new(fmt_ms(trend.p95))
            ]
        };

        Table::builder()
            .rows(rows![
                row![
                    TableCell::builder("Metric".bold()).build(),
                    TableCell::builder("avg".bold()).build(),
                    TableCell::builder("min".bold()).build(),
                    TableCell::builder("med".bold()).build(),
                    TableCell::builder("max".bold()).build(),
                    TableCell::builder("p(90)".bold()).build(),
                    TableCell::builder("p(95)".bold()).build()
                ],
                trend_row("http_req_duration", &self.http_req_duration),
                trend_row("iteration_duration", &self.iteration_duration)
            ])
            .style(TableStyle::rounded())
            .build()
    }

    fn counters_table(&self) -> Table {
        let statuses = self
            .status_counts
            .iter()
            .map(|(status, count)| format!("{}: {}", status, count))
            .join(", ");

        Table::builder()
            .rows(rows![
                row![
                    TableCell::builder("Requests".bold()).build(),
                    TableCell::builder("Failed".bold()).build(),
                    TableCell::builder("Iterations".bold()).build(),
                    TableCell::builder("VUs (max)".bold()).build(),
                    TableCell::builder("Statuses".bold()).build()
                ],
                row![
                    TableCell::new(self.http_reqs),
                    TableCell::new(
                        self.http_req_failed
                            .map(|rate| format!("{:.2}%", rate * 100.0))
                            .unwrap_or("--".to_string())
                    ),
                    TableCell::new(self.iterations),
                    TableCell::new(self.vus_max),
                    TableCell::new(if statuses.is_empty() {
                        "--".to_string()
                    } else {
                        statuses
                    })
                ]
            ])
            .style(TableStyle::rounded())
            .build()
    }

    fn thresholds_table(&self) -> Table {
        let mut rows: Vec<Row> = rows![row![
            TableCell::builder("Threshold".bold()).build(),
            TableCell::builder("Observed".bold()).build(),
            TableCell::builder("Result".bold()).build()
        ]];

        for result in self.thresholds.iter() {
            let verdict = match result.passed {
                true => "✓ pass".green(),
                false => "✗ fail".red(),
            };
            rows.push(row![
                TableCell::new(format!(
                    "{}: {}",
                    result.threshold.metric, result.threshold
                )),
                TableCell::new(
                    result
                        .observed
                        .map(|value| format!("{:.3}", value))
                        .unwrap_or("--".to_string())
                ),
                TableCell::new(verdict)
            ]);
        }

        Table::builder()
            .rows(rows)
            .style(TableStyle::rounded())
            .build()
    }
}

fn fmt_ms(value: Option<f64>) -> String {
    value
        .map(|ms| format!("{:.2}ms", ms))
        .unwrap_or("--".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RequestOutcome;
    use std::time::Duration;

    fn outcome() -> RunOutcome {
        let now = Utc::now();
        RunOutcome {
            started_at: now,
            stopped_at: now,
            elapsed: Duration::from_secs(40),
            interrupted: false,
        }
    }

    fn metrics_log(statuses: &[u16], millis: u64) -> MetricsLog {
        let mut log = MetricsLog::new();
        for status in statuses {
            let outcome = RequestOutcome::Status(*status);
            log.push_request(&outcome, Duration::from_millis(millis), 200);
            log.push_check("is status 200", *status == 200);
        }
        log.push_iteration(Duration::from_millis(millis * statuses.len() as u64));
        log.observe_vus(20);
        log
    }

    #[test]
    fn summary_passes_when_every_threshold_holds() -> anyhow::Result<()> {
        let thresholds = vec![Threshold::parse("http_req_duration", "p(95)<500")?];
        let log = metrics_log(&[200, 200, 500], 120);

        let summary = RunSummary::new("abcde", &outcome(), &log, &thresholds);

        assert!(summary.passed());
        assert_eq!(summary.http_reqs, 3);
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.vus_max, 20);
        assert_eq!(
            summary.checks,
            vec![CheckSummary {
                name: "is status 200".to_string(),
                passes: 2,
                fails: 1
            }]
        );
        Ok(())
    }

    #[test]
    fn summary_fails_when_latency_threshold_is_violated() -> anyhow::Result<()> {
        let thresholds = vec![Threshold::parse("http_req_duration", "p(95)<500")?];
        let log = metrics_log(&[200; 10], 650);

        let summary = RunSummary::new("abcde", &outcome(), &log, &thresholds);
        assert!(!summary.passed());
        assert_eq!(summary.thresholds[0].observed, Some(650.0));
        Ok(())
    }

    #[test]
    fn render_includes_checks_and_thresholds() -> anyhow::Result<()> {
        colored::control::set_override(false);
        let thresholds = vec![Threshold::parse("http_req_duration", "p(95)<500")?];
        let log = metrics_log(&[200, 500], 100);

        let rendered = RunSummary::new("abcde", &outcome(), &log, &thresholds).render();

        assert!(rendered.contains("is status 200"));
        assert!(rendered.contains("http_req_duration: p(95)<500"));
        assert!(rendered.contains("✓ pass"));
        assert!(rendered.contains("500: 1"));
        Ok(())
    }

    #[test]
    fn summary_can_be_exported_as_json() -> anyhow::Result<()> {
        let log = metrics_log(&[200], 10);
        let summary = RunSummary::new("abcde", &outcome(), &log, &[]);
        let path = std::env::temp_dir().join(format!("surge-summary-{}.json", nanoid::nanoid!(8)));

        summary.export_json(&path)?;
        let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        fs::remove_file(&path)?;

        assert_eq!(json["run_id"], "abcde");
        assert_eq!(json["http_reqs"], 1);
        assert_eq!(json["checks"][0]["passes"], 1);
        Ok(())
    }
}
