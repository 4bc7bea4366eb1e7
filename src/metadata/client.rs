use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::types::{ContainerRecord, ServiceRecord};

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Failed to query Rancher Metadata API - {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Rancher Metadata API answered {status} for {url}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
    #[error("Invalid response from Rancher Metadata API for {url}: {source}")]
    Parse {
        url: String,
        source: serde_json::Error,
    },
    #[error("Rancher Metadata API has no {0} endpoint")]
    MissingEndpoint(String),
}

pub type Result<T> = std::result::Result<T, MetadataError>;

/// Answer to a metadata query that may legitimately not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    Found(T),
    NotFound,
}

impl<T> Lookup<T> {
    pub fn found(self) -> Option<T> {
        match self {
            Self::Found(value) => Some(value),
            Self::NotFound => None,
        }
    }
}

/// The metadata API signals missing resources with a `{"code": 404}` body.
fn is_not_found(body: &serde_json::Value) -> bool {
    body.get("code").and_then(serde_json::Value::as_u64) == Some(404)
}

#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn list_services(&self) -> Result<Vec<ServiceRecord>> {
        match self.get("/services").await? {
            Lookup::Found(services) => Ok(services),
            Lookup::NotFound => Err(MetadataError::MissingEndpoint("/services".to_string())),
        }
    }

    pub async fn get_container(&self, id: &str) -> Result<Lookup<ContainerRecord>> {
        self.get(&format!("/containers/{id}")).await
    }

    async fn get<T: DeserializeOwned>(&self, query: &str) -> Result<Lookup<T>> {
        let url = format!("{}{}", self.base_url, query);
        log::debug!("GET {url}");

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        let value = match serde_json::from_str::<serde_json::Value>(&body) {
            Ok(value) if is_not_found(&value) => return Ok(Lookup::NotFound),
            Ok(value) => value,
            Err(_) if !status.is_success() => return Err(MetadataError::Status { url, status }),
            Err(source) => return Err(MetadataError::Parse { url, source }),
        };

        if !status.is_success() {
            return Err(MetadataError::Status { url, status });
        }

        serde_json::from_value(value)
            .map(Lookup::Found)
            .map_err(|source| MetadataError::Parse { url, source })
    }
}
