/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod ramp;

use crate::{
    config::{duration, Config},
    driver::LoadDriver,
    metrics,
};
use chrono::{DateTime, Utc};
use colored::*;
use ramp::RampSchedule;
use std::time::Duration;
use tokio::{
    task::JoinSet,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the ramp controller re-evaluates the target VU count.
const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub elapsed: Duration,
    /// True if the run was stopped before the last stage finished.
    pub interrupted: bool,
}

struct VirtualUser {
    id: usize,
    retire: CancellationToken,
}

/// Runs the stage schedule described by `config`, one task per VU, each repeatedly calling
/// [`LoadDriver::run_iteration`]. Returns once every VU has stopped.
///
/// Cancelling `shutdown` stops the run early and abandons in-flight iterations immediately.
pub async fn run(
    config: &Config,
    driver: LoadDriver,
    shutdown: CancellationToken,
) -> anyhow::Result<RunOutcome> {
    config.validate()?;

    let schedule = RampSchedule::new(config.options.start_vus, config.stages.clone());
    let grace = config.options.graceful_ramp_down;
    let root = shutdown.child_token();

    let mut join_set = JoinSet::new();
    let mut active: Vec<VirtualUser> = vec![];
    let mut next_id = 1;
    let mut current_stage = None;

    let started_at = Utc::now();
    let start = Instant::now();
    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        "Starting run: {} stages over {}, up to {} VUs",
        schedule.stages().len(),
        duration::format(&schedule.total_duration()),
        config.max_target()
    );

    let interrupted = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break true,
            _ = ticker.tick() => {}
            Some(res) = join_set.join_next(), if !join_set.is_empty() => {
                if let Err(err) = res {
                    warn!("Virtual user task failed: {}", err);
                }
                continue;
            }
        }

        let Some(position) = schedule.target_at(start.elapsed()) else {
            break false;
        };

        if current_stage != Some(position.stage) {
            let stage = schedule.stages()[position.stage];
            println!(
                "> stage {}/{} - ramping to {} VUs over {}",
                position.stage + 1,
                schedule.stages().len(),
                stage.target.to_string().green(),
                duration::format(&stage.duration)
            );
            info!(
                "Entered stage {} (target {} VUs)",
                position.stage + 1,
                stage.target
            );
            current_stage = Some(position.stage);
        }

        while active.len() < position.vus {
            let vu = VirtualUser {
                id: next_id,
                retire: root.child_token(),
            };
            next_id += 1;

            debug!("Starting VU {}", vu.id);
            join_set.spawn(virtual_user(vu.id, driver.clone(), vu.retire.clone(), grace));
            active.push(vu);
        }

        // newest VUs are retired first
        while active.len() > position.vus {
            if let Some(vu) = active.pop() {
                debug!("Retiring VU {}", vu.id);
                vu.retire.cancel();
            }
        }

        metrics::lock(driver.metrics_log()).observe_vus(active.len());
    };

    root.cancel();
    if interrupted {
        warn!("Run interrupted, abandoning {} VUs", join_set.len());
        join_set.abort_all();
    }

    while let Some(res) = join_set.join_next().await {
        if let Err(err) = res {
            if err.is_panic() {
                warn!("Virtual user task panicked: {}", err);
            }
        }
    }

    let elapsed = start.elapsed();
    info!("Run finished after {:.2}s", elapsed.as_secs_f64());

    Ok(RunOutcome {
        started_at,
        stopped_at: Utc::now(),
        elapsed,
        interrupted,
    })
}

/// Loops over iterations until retired. Once retired the current iteration gets `grace` to
/// finish before it is abandoned.
async fn virtual_user(id: usize, driver: LoadDriver, retire: CancellationToken, grace: Duration) {
    let mut iterations = 0;
    while !retire.is_cancelled() {
        tokio::select! {
            _ = abandon_after(&retire, grace) => break,
            _ = driver.run_iteration() => iterations += 1,
        }
    }
    debug!("VU {} stopped after {} iterations", id, iterations);
}

async fn abandon_after(retire: &CancellationToken, grace: Duration) {
    retire.cancelled().await;
    tokio::time::sleep(grace).await;
}
