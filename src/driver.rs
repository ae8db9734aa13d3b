/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::{
    address::AddressBatch,
    config::Scenario,
    metrics::{self, RequestOutcome, SharedMetricsLog},
};
use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::{debug, trace};

/// Issues one batch of lookups per iteration and records the outcome of every request in the
/// shared metrics log. Cheap to clone, every VU holds its own copy.
#[derive(Debug, Clone)]
pub struct LoadDriver {
    client: reqwest::Client,
    scenario: Arc<Scenario>,
    metrics_log: SharedMetricsLog,
}
impl LoadDriver {
    pub fn new(
        scenario: Scenario,
        request_timeout: Duration,
        metrics_log: SharedMetricsLog,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(LoadDriver {
            client,
            scenario: Arc::new(scenario),
            metrics_log,
        })
    }

    pub fn metrics_log(&self) -> &SharedMetricsLog {
        &self.metrics_log
    }

    /// Runs a single iteration: generate a fresh address batch, then request every address in
    /// order, pausing after each request. Failed requests are recorded as failed checks and never
    /// interrupt the batch.
    ///
    /// The iteration only counts towards `iterations` if it runs to completion. Dropping the future
    /// abandons the in-flight request.
    pub async fn run_iteration(&self) {
        let batch = {
            let mut rng = rand::thread_rng();
            AddressBatch::generate(&mut rng, &self.scenario.prefix, self.scenario.batch_size)
        };

        self.run_batch(batch).await;
    }

    /// The body of an iteration for an already generated batch.
    pub async fn run_batch(&self, batch: AddressBatch) {
        let start = Instant::now();

        for address in batch {
            let url = self.scenario.url_for(&address.to_string());
            let (outcome, elapsed) = self.get(&url).await;
            let passed = outcome.status() == Some(self.scenario.expected_status);

            trace!("GET {} -> {} in {:?}", url, outcome.status_key(), elapsed);
            {
                let mut log = metrics::lock(&self.metrics_log);
                log.push_request(&outcome, elapsed, self.scenario.expected_status);
                log.push_check(&self.scenario.check, passed);
            }

            tokio::time::sleep(self.scenario.pause).await;
        }

        metrics::lock(&self.metrics_log).push_iteration(start.elapsed());
    }

    async fn get(&self, url: &str) -> (RequestOutcome, Duration) {
        let start = Instant::now();

        let outcome = match self.client.get(url).send().await {
            // the body is drained so the sample covers receiving as well as waiting
            Ok(resp) => {
                let status = resp.status().as_u16();
                match resp.bytes().await {
                    Ok(_) => RequestOutcome::Status(status),
                    Err(err) => failed_outcome(url, err),
                }
            }
            Err(err) => failed_outcome(url, err),
        };

        (outcome, start.elapsed())
    }
}

fn failed_outcome(url: &str, err: reqwest::Error) -> RequestOutcome {
    if err.is_timeout() {
        debug!("GET {} timed out", url);
        RequestOutcome::Timeout
    } else {
        debug!("GET {} failed: {}", url, err);
        RequestOutcome::Error(err.to_string())
    }
}
