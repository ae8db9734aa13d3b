/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

pub mod duration;

use crate::{address::AddressPrefix, threshold::Threshold};
use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::Path,
    time::Duration,
};

static EXAMPLE_CONFIG: &str = include_str!("templates/surge.toml");

// ******** ******** ********
// **    CONFIGURATION     **
// ******** ******** ********
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    #[serde(rename(serialize = "stage", deserialize = "stage"))]
    pub stages: Vec<Stage>,
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub scenario: Scenario,
    #[serde(default)]
    pub options: Options,
}
impl Default for Config {
    fn default() -> Self {
        let stages = vec![
            Stage::new(Duration::from_secs(5), 5),
            Stage::new(Duration::from_secs(10), 10),
            Stage::new(Duration::from_secs(15), 20),
            Stage::new(Duration::from_secs(10), 15),
        ];

        let mut thresholds = BTreeMap::new();
        thresholds.insert(
            "http_req_duration".to_string(),
            vec!["p(95)<500".to_string()],
        );

        Config {
            stages,
            thresholds,
            scenario: Scenario::default(),
            options: Options::default(),
        }
    }
}
impl Config {
    /// Writes the bundled example configuration to `path`. Existing files are never overwritten.
    pub fn write_example_to_file(path: &Path) -> anyhow::Result<File> {
        let mut file = File::create_new(path)
            .context(format!("Unable to create config file {}", path.display()))?;
        File::write_all(&mut file, EXAMPLE_CONFIG.as_bytes())?;
        Ok(file)
    }

    pub fn try_from_path(path: &Path) -> anyhow::Result<Config> {
        let mut config_str = String::new();
        fs::File::open(path)
            .context(format!("Unable to open config file {}", path.display()))?
            .read_to_string(&mut config_str)?;
        Config::try_from_str(&config_str)
    }

    pub fn try_from_str(conf_str: &str) -> anyhow::Result<Config> {
        let config = toml::from_str::<Config>(conf_str)
            .map_err(|e| anyhow!("TOML parsing error: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.stages.is_empty() {
            return Err(anyhow!("At least one [[stage]] must be declared"));
        }
        let total = self
            .stages
            .iter()
            .try_fold(Duration::ZERO, |total, stage| total.checked_add(stage.duration))
            .ok_or_else(|| anyhow!("The stages together span more time than can be represented"))?;
        if total.is_zero() {
            return Err(anyhow!("The stages must span a non-zero duration"));
        }
        if !self.scenario.path.contains("{address}") {
            return Err(anyhow!(
                "Scenario path {} must contain the {{address}} placeholder",
                self.scenario.path
            ));
        }
        if self.scenario.batch_size == 0 {
            return Err(anyhow!("Scenario batch_size must be greater than zero"));
        }

        self.thresholds()?;
        Ok(())
    }

    /// Parses every configured threshold expression.
    pub fn thresholds(&self) -> anyhow::Result<Vec<Threshold>> {
        let mut thresholds = vec![];
        for (metric, exprs) in self.thresholds.iter() {
            for expr in exprs {
                let threshold = Threshold::parse(metric, expr)
                    .context(format!("Invalid threshold for {}", metric))?;
                thresholds.push(threshold);
            }
        }
        Ok(thresholds)
    }

    pub fn total_duration(&self) -> Duration {
        self.stages
            .iter()
            .fold(Duration::ZERO, |total, stage| total.saturating_add(stage.duration))
    }

    pub fn max_target(&self) -> usize {
        self.stages
            .iter()
            .map(|stage| stage.target)
            .chain(std::iter::once(self.options.start_vus))
            .max()
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct Stage {
    #[serde(with = "duration")]
    pub duration: Duration,
    pub target: usize,
}
impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Stage { duration, target }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Scenario {
    pub base_url: String,
    pub path: String,
    pub prefix: AddressPrefix,
    pub batch_size: usize,
    #[serde(with = "duration")]
    pub pause: Duration,
    pub check: String,
    pub expected_status: u16,
}
impl Default for Scenario {
    fn default() -> Self {
        Scenario {
            base_url: "http://127.0.0.1:3000".to_string(),
            path: "/api/lookup/{address}".to_string(),
            prefix: AddressPrefix::default(),
            batch_size: 100,
            pause: Duration::from_millis(100),
            check: "is status 200".to_string(),
            expected_status: 200,
        }
    }
}
impl Scenario {
    /// Builds the request url for the given address.
    pub fn url_for(&self, address: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.path.replace("{address}", address);
        if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct Options {
    pub start_vus: usize,
    #[serde(with = "duration")]
    pub graceful_ramp_down: Duration,
    #[serde(with = "duration")]
    pub request_timeout: Duration,
}
impl Default for Options {
    fn default() -> Self {
        Options {
            start_vus: 0,
            graceful_ramp_down: Duration::ZERO,
            request_timeout: Duration::from_secs(60),
        }
    }
}
