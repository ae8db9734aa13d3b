/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod address;
pub mod config;
pub mod driver;
pub mod executor;
pub mod metrics;
pub mod stub;
pub mod summary;
pub mod threshold;

use config::Config;
use driver::LoadDriver;
use metrics::MetricsLog;
use summary::RunSummary;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Runs the full stage schedule described by `config` and evaluates its thresholds.
///
/// # Arguments
///
/// * config - The validated run configuration.
/// * shutdown - Cancelling this token stops the run early. The summary still covers everything
///   recorded up to that point.
///
/// # Returns
///
/// The summary of the run. Use [`RunSummary::passed`] to find out whether every threshold held.
pub async fn run(config: &Config, shutdown: CancellationToken) -> anyhow::Result<RunSummary> {
    let thresholds = config.thresholds()?;

    // create a unique surge run id
    let run_id = nanoid::nanoid!(5, &nanoid::alphabet::SAFE);
    info!("Run {} targeting {}", run_id, config.scenario.base_url);

    let metrics_log = MetricsLog::shared();
    let driver = LoadDriver::new(
        config.scenario.clone(),
        config.options.request_timeout,
        metrics_log.clone(),
    )?;

    let outcome = executor::run(config, driver, shutdown).await?;

    let metrics_log = metrics::lock(&metrics_log);
    Ok(RunSummary::new(&run_id, &outcome, &metrics_log, &thresholds))
}
