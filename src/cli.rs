use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;

/// Health check for services running on Rancher.
///
/// Reports every container to the local Sensu client socket and exits
/// with the aggregated status of the whole pass.
#[derive(Parser, Debug, Default)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Optional TOML file providing defaults for the options below.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Rancher Metadata API URL (default: http://rancher-metadata/2015-07-25)
    #[arg(long, env = "RANCHER_METADATA_URL")]
    pub api_url: Option<String>,

    /// Directory holding the persisted container state.
    #[arg(long, env = "RANCHER_CHECK_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Sensu handlers attached to every emitted event.
    #[arg(long, env = "RANCHER_CHECK_HANDLERS", value_delimiter = ',')]
    pub handlers: Option<Vec<String>>,

    /// Do not send events to the Sensu client socket, print them instead.
    #[arg(long)]
    pub dryrun: bool,

    /// Metadata API request timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Address of the Sensu client socket.
    #[arg(long)]
    pub socket: Option<SocketAddr>,
}
