mod cli;
mod ingest;
mod key;
mod metrics;
mod monitor;
mod report;
mod state;
mod ui;

use std::io::IsTerminal;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Config};
use crate::monitor::run_monitor;

fn main() {
    // stdout belongs to the report, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .ok();

    let cli = Cli::parse();
    let result: Result<()> = Config::from_cli(cli, std::io::stdout().is_terminal())
        .map_err(anyhow::Error::from)
        .and_then(run_monitor);

    if let Err(err) = result {
        // Map to stable exit codes
        let code = exit_code_for_error(&err);
        eprintln!("error: {err:?}");
        std::process::exit(code);
    }
}

pub(crate) fn exit_code_for_error(err: &anyhow::Error) -> i32 {
    // 2: invalid configuration, 3: MQTT client failure, 1: other
    for cause in err.chain() {
        if cause.is::<crate::cli::ConfigError>() {
            return 2;
        }
        if cause.is::<rumqttc::ClientError>() || cause.is::<rumqttc::ConnectionError>() {
            return 3;
        }
    }
    1
}
