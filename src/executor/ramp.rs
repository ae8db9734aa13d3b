/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use crate::config::Stage;
use std::time::Duration;

/// Where the schedule is at a given point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagePosition {
    /// Index of the active stage.
    pub stage: usize,
    /// Number of VUs that should be running.
    pub vus: usize,
}

/// Linear VU ramp across an ordered list of stages.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start_vus: usize,
    stages: Vec<Stage>,
}
impl RampSchedule {
    pub fn new(start_vus: usize, stages: Vec<Stage>) -> Self {
        RampSchedule { start_vus, stages }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, stage| total.saturating_add(stage.duration))
    }

    /// The target VU count `elapsed` into the run, or `None` once every stage has finished.
    ///
    /// Inside a stage the count moves linearly from the previous stage's target to this stage's
    /// target and is truncated towards the previous target, so a stage only reaches its own
    /// target at its very end.
    pub fn target_at(&self, elapsed: Duration) -> Option<StagePosition> {
        let mut from = self.start_vus;
        let mut stage_start = Duration::ZERO;

        for (idx, stage) in self.stages.iter().enumerate() {
            let stage_end = stage_start.saturating_add(stage.duration);
            if elapsed < stage_end {
                let progress = (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let to = stage.target;
                let vus = if to >= from {
                    from + ((to - from) as f64 * progress).floor() as usize
                } else {
                    from - ((from - to) as f64 * progress).floor() as usize
                };
                return Some(StagePosition { stage: idx, vus });
            }

            from = stage.target;
            stage_start = stage_end;
        }

        None
    }
}
