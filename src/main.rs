use std::process::ExitCode;

use clap::Parser;

use crate::config::CheckConfig;
use crate::events::{EventSink, PrintSink, Status, UdpSink};
use crate::metadata::MetadataClient;
use crate::state::StateStore;

mod cli;
mod config;
mod config_file;
mod evaluator;
mod events;
mod metadata;
mod runner;
mod state;

const CHECK_NAME: &str = "RancherServiceCheck";

/// Sensu plugin summary line.
fn summary_line(status: Status, msg: &str) -> String {
    format!("{CHECK_NAME} {}: {msg}", status.as_ref())
}

/// Final status and message of a run. Any error is UNKNOWN.
fn conclude<E: std::fmt::Display>(result: Result<runner::CycleSummary, E>) -> (Status, String) {
    match result {
        Ok(summary) => (summary.status(), summary.message()),
        Err(e) => (Status::Unknown, e.to_string()),
    }
}

/// Prints the summary line and turns the status into the process exit code.
fn report(status: Status, msg: &str) -> ExitCode {
    println!("{}", summary_line(status, msg));
    ExitCode::from(status.code())
}

async fn run(config: &CheckConfig) -> Result<runner::CycleSummary, Box<dyn std::error::Error>> {
    let client = MetadataClient::new(&config.api_url, config.timeout)?;
    let store = StateStore::new(config.state_file());
    let sink: Box<dyn EventSink> = if config.dryrun {
        Box::new(PrintSink::stdout())
    } else {
        Box::new(UdpSink::bind(config.socket).await?)
    };

    Ok(runner::run_cycle(config, &client, &store, sink.as_ref()).await?)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize the logger
    env_logger::init();

    let config = match CheckConfig::try_init(cli::Args::parse()) {
        Ok(config) => config,
        Err(e) => return report(Status::Unknown, &format!("Unable to read config: {e}")),
    };
    log::debug!("{config:?}");

    let result = run(&config).await;
    if let Ok(summary) = &result {
        log::info!(
            "Checked {} containers across {} services",
            summary.containers,
            summary.services
        );
    }
    let (status, msg) = conclude(result);
    report(status, &msg)
}
