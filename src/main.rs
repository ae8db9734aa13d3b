/*
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::{collections::HashSet, path::PathBuf, process::ExitCode, time::Duration};
use surge::{
    config::{self, Config},
    stub::{self, StubOptions},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, subscriber::set_global_default, Subscriber};
use tracing_subscriber::EnvFilter;

/// Exit status used when the run completed but at least one threshold failed.
const THRESHOLDS_FAILED: u8 = 99;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging (RUST_LOG takes priority)
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ramp virtual users against the lookup API and evaluate thresholds
    Run {
        /// Path to a surge.toml, the built-in lookup test plan is used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Overrides the scenario base url
        #[arg(long)]
        base_url: Option<String>,

        /// Writes the end of run summary to this file as JSON
        #[arg(long)]
        summary_export: Option<PathBuf>,
    },

    /// Write an example surge.toml to the current directory
    Init,

    /// Serve a stub lookup API to run against
    Stub {
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Address to answer with 500, may be repeated
        #[arg(long = "fail")]
        fail: Vec<String>,

        /// Delay before every response, e.g. 20ms
        #[arg(long, value_parser = parse_duration)]
        delay: Option<Duration>,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    config::duration::parse(s).map_err(|err| err.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    init_subscriber(get_subscriber(default_level.into()));

    match execute(args.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{} {:#}", "Error:".red().bold(), err);
            ExitCode::FAILURE
        }
    }
}

async fn execute(command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            config,
            base_url,
            summary_export,
        } => {
            let mut config = match config {
                Some(path) => Config::try_from_path(&path)?,
                None => Config::default(),
            };
            if let Some(base_url) = base_url {
                config.scenario.base_url = base_url;
            }

            println!(
                "\n{} {}",
                " Surge ".reversed().green(),
                config.scenario.url_for("{address}")
            );

            let shutdown = ctrl_c_token();
            let summary = surge::run(&config, shutdown).await?;
            println!("{}", summary.render());

            if let Some(path) = summary_export {
                summary.export_json(&path)?;
                info!("Summary written to {}", path.display());
            }

            if summary.passed() {
                Ok(ExitCode::SUCCESS)
            } else {
                println!("{}", "Some thresholds have failed".red());
                Ok(ExitCode::from(THRESHOLDS_FAILED))
            }
        }

        Commands::Init => {
            Config::write_example_to_file(&PathBuf::from("./surge.toml"))?;
            println!("{}", "surge.toml created!".green());
            Ok(ExitCode::SUCCESS)
        }

        Commands::Stub { port, fail, delay } => {
            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port))
                .await
                .context(format!("Unable to bind stub to port {}", port))?;
            let opts = StubOptions {
                fail: fail.into_iter().collect::<HashSet<_>>(),
                delay: delay.unwrap_or_default(),
            };

            stub::serve(listener, opts, ctrl_c_token()).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// A token that is cancelled when the user presses Ctrl-C.
fn ctrl_c_token() -> CancellationToken {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\n{}", "Stopping...".yellow());
            cancel.cancel();
        }
    });
    token
}

fn get_subscriber(env_filter: String) -> impl Subscriber + Sync + Send {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(env_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .finish()
}

fn init_subscriber(subscriber: impl Subscriber + Sync + Send) {
    if let Err(err) = set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", err);
    }
}
