//! HTTP client for the remote control-plane
//!
//! The control-plane publishes a set of named entry links (e.g. `instances`)
//! when the agent is installed. Instance records live under
//! `<instances-link>/<uuid>`: a GET fetches the record, a PUT replaces it.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::StatusCode;
use tracing::{debug, instrument, trace};

use crate::error::{InstanceError, InstanceResult};

/// Link name under which instance records are published
pub const INSTANCES_LINK: &str = "instances";

/// Header carrying the agent's API key
pub const API_KEY_HEADER: &str = "X-Percona-API-Key";

/// Client for the control-plane API
///
/// Cheap to clone; the underlying HTTP client (and its connection pool) is shared.
#[derive(Debug, Clone)]
pub struct ControlPlaneClient {
    client: reqwest::Client,
    api_key: String,
    links: HashMap<String, String>,
}

impl ControlPlaneClient {
    pub fn new(api_key: impl Into<String>, links: HashMap<String, String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            links,
        })
    }

    /// Resolve a named entry link, ignoring empty ones
    pub fn entry_link(&self, name: &str) -> Option<&str> {
        self.links
            .get(name)
            .map(|link| link.trim_end_matches('/'))
            .filter(|link| !link.is_empty())
    }

    /// URL of an instance record under the `instances` link
    pub fn instance_url(&self, uuid: &str) -> Option<String> {
        self.entry_link(INSTANCES_LINK)
            .map(|link| format!("{link}/{uuid}"))
    }

    /// Keyed GET; returns the status code and the raw body
    #[instrument(skip(self))]
    pub async fn get(&self, url: &str) -> InstanceResult<(StatusCode, Vec<u8>)> {
        trace!("GET {url}");

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| remote_error(url, e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| remote_error(url, e))?;

        debug!("GET {url} returned {status}");
        Ok((status, body.to_vec()))
    }

    /// Keyed PUT with a JSON body; returns the status code
    #[instrument(skip(self, body))]
    pub async fn put(&self, url: &str, body: Vec<u8>) -> InstanceResult<StatusCode> {
        trace!("PUT {url}");

        let response = self
            .client
            .put(url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| remote_error(url, e))?;

        debug!("PUT {url} returned {}", response.status());
        Ok(response.status())
    }
}

fn remote_error(url: &str, err: reqwest::Error) -> InstanceError {
    InstanceError::Remote {
        url: url.to_string(),
        message: err.to_string(),
    }
}
