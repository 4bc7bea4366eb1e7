use std::{net::SocketAddr, path::Path, path::PathBuf};

/// On-disk configuration. Every key is optional; flags win over the file.
#[derive(Debug, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CheckConfigFile {
    pub api_url: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub handlers: Option<Vec<String>>,
    pub dryrun: Option<bool>,
    /// Request timeout in seconds
    pub timeout: Option<u64>,
    pub socket: Option<SocketAddr>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl CheckConfigFile {
    fn try_init_from_string(config: &str) -> Result<Self, ConfigFileError> {
        Ok(toml::from_str(config)?)
    }

    pub fn try_init(path: &Path) -> Result<Self, ConfigFileError> {
        let config = std::fs::read_to_string(path)?;
        Self::try_init_from_string(&config)
    }
}
