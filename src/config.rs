use std::{net::SocketAddr, path::PathBuf, time::Duration};

use crate::cli::Args;
use crate::config_file::{CheckConfigFile, ConfigFileError};

pub const DEFAULT_API_URL: &str = "http://rancher-metadata/2015-07-25";
pub const DEFAULT_STATE_DIR: &str = "/var/cache/check-rancher-service";
pub const DEFAULT_HANDLER: &str = "default";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const SENSU_SOCKET: SocketAddr = SocketAddr::V4(std::net::SocketAddrV4::new(
    std::net::Ipv4Addr::LOCALHOST,
    3030,
));

const STATE_FILE: &str = "containers.json";

/// Resolved configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckConfig {
    /// Base URL without trailing slash
    pub api_url: String,
    pub state_dir: PathBuf,
    pub handlers: Vec<String>,
    pub dryrun: bool,
    pub timeout: Duration,
    pub socket: SocketAddr,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self::resolve(Args::default(), CheckConfigFile::default())
    }
}

impl CheckConfig {
    pub fn try_init(args: Args) -> Result<Self, ConfigFileError> {
        let file = match &args.config {
            Some(path) => CheckConfigFile::try_init(path)?,
            None => CheckConfigFile::default(),
        };
        Ok(Self::resolve(args, file))
    }

    fn resolve(args: Args, file: CheckConfigFile) -> Self {
        let api_url = args
            .api_url
            .or(file.api_url)
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let timeout = args
            .timeout
            .or(file.timeout)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);

        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            state_dir: args
                .state_dir
                .or(file.state_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            handlers: args
                .handlers
                .or(file.handlers)
                .unwrap_or_else(|| vec![DEFAULT_HANDLER.to_string()]),
            dryrun: args.dryrun || file.dryrun.unwrap_or(false),
            timeout,
            socket: args.socket.or(file.socket).unwrap_or(SENSU_SOCKET),
        }
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }
}
