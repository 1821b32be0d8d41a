//! Boskos resource broker client
//!
//! Leases scarce GCP projects from a shared Boskos instance. A successful
//! acquire starts a background heartbeat that keeps the lease alive until it
//! is released or the caller's stop signal flips.
//!
//! Wire protocol (all `POST`, parameters in the query string):
//!
//! ```text
//! /acquire?type=T&state=free&dest=busy&owner=O   200 -> Resource JSON, 404 -> none free
//! /update?name=N&owner=O&state=busy              heartbeat
//! /release?name=N&owner=O&dest=dirty             give the resource back
//! ```

pub mod heartbeat;

pub use heartbeat::{HeartbeatConfig, HeartbeatFailure, DEFAULT_HEARTBEAT_INTERVAL_SECS};

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How long to wait between acquire attempts while nothing is free
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// State a resource is taken from on acquire
pub const STATE_FREE: &str = "free";

/// State a leased resource is held in
pub const STATE_BUSY: &str = "busy";

/// State a resource is returned to on release
pub const STATE_DIRTY: &str = "dirty";

/// Errors that can occur talking to Boskos
#[derive(Error, Debug)]
pub enum BoskosError {
    #[error("invalid boskos location {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    #[error("boskos returned {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("timed out after {0:?} waiting for a free {1}")]
    Timeout(Duration, String),
}

/// A resource as Boskos reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub owner: String,
}

/// A resource held by this process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub name: String,
    pub resource_type: String,
    pub owner: String,
    pub acquired_at: DateTime<Utc>,
}

/// Client contract against a resource broker
#[async_trait]
pub trait ResourceBroker: Send + Sync {
    /// Lease one resource of `resource_type`, waiting at most `timeout`.
    ///
    /// Heartbeats for the lease stop when `stop` flips to `true`.
    async fn acquire(
        &self,
        resource_type: &str,
        timeout: Duration,
        stop: watch::Receiver<bool>,
    ) -> Result<Lease, BoskosError>;

    /// Return a leased resource to the broker
    async fn release(&self, lease: &Lease) -> Result<(), BoskosError>;
}

/// HTTP client for a Boskos server
pub struct BoskosClient {
    base_url: Url,
    owner: String,
    http_client: Client,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    failures: Option<mpsc::UnboundedSender<HeartbeatFailure>>,
    /// Per-lease heartbeat shutdown, keyed by resource name
    heartbeats: Mutex<HashMap<String, watch::Sender<bool>>>,
}

impl BoskosClient {
    /// Create a client for the Boskos server at `location`
    pub fn new(location: &str, owner: impl Into<String>) -> Result<Self, BoskosError> {
        let base_url = Url::parse(location).map_err(|e| BoskosError::InvalidLocation {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BoskosError::InvalidLocation {
                location: location.to_string(),
                reason: "not a base URL".to_string(),
            });
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| BoskosError::ClientBuild(e.to_string()))?;

        Ok(Self {
            base_url,
            owner: owner.into(),
            http_client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            failures: None,
            heartbeats: Mutex::new(HashMap::new()),
        })
    }

    /// Set the wait between acquire attempts
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the heartbeat interval for new leases
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Report heartbeat failures on `tx` in addition to logging them
    pub fn with_failure_reporter(mut self, tx: mpsc::UnboundedSender<HeartbeatFailure>) -> Self {
        self.failures = Some(tx);
        self
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/{}", base_path, path));
        url.query_pairs_mut().clear().extend_pairs(query);
        url
    }

    /// One acquire attempt; `Ok(None)` means nothing is free right now
    async fn try_acquire(&self, resource_type: &str) -> Result<Option<Resource>, BoskosError> {
        let url = self.endpoint(
            "acquire",
            &[
                ("type", resource_type),
                ("state", STATE_FREE),
                ("dest", STATE_BUSY),
                ("owner", self.owner.as_str()),
            ],
        );

        let response = self.http_client.post(url).send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<Resource>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BoskosError::ServerError {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }

    /// Acquire, retrying while nothing is free
    async fn acquire_wait(&self, resource_type: &str) -> Result<Resource, BoskosError> {
        loop {
            if let Some(resource) = self.try_acquire(resource_type).await? {
                return Ok(resource);
            }
            debug!(
                "No free {} in boskos, retrying in {:?}",
                resource_type, self.poll_interval
            );
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Number of leases with a running heartbeat
    pub fn active_heartbeats(&self) -> usize {
        self.heartbeats.lock().map(|h| h.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ResourceBroker for BoskosClient {
    async fn acquire(
        &self,
        resource_type: &str,
        timeout: Duration,
        stop: watch::Receiver<bool>,
    ) -> Result<Lease, BoskosError> {
        let resource = tokio::time::timeout(timeout, self.acquire_wait(resource_type))
            .await
            .map_err(|_| BoskosError::Timeout(timeout, resource_type.to_string()))??;

        info!("Acquired {} {} from boskos", resource.resource_type, resource.name);

        let lease = Lease {
            name: resource.name,
            resource_type: resource.resource_type,
            owner: self.owner.clone(),
            acquired_at: Utc::now(),
        };

        let config = HeartbeatConfig::new(self.base_url.clone(), &lease.name, &self.owner)
            .with_interval(self.heartbeat_interval);
        let release_tx = heartbeat::spawn_heartbeat(
            config,
            self.http_client.clone(),
            stop,
            self.failures.clone(),
        );
        if let Ok(mut heartbeats) = self.heartbeats.lock() {
            heartbeats.insert(lease.name.clone(), release_tx);
        }

        Ok(lease)
    }

    async fn release(&self, lease: &Lease) -> Result<(), BoskosError> {
        let release_tx = self
            .heartbeats
            .lock()
            .ok()
            .and_then(|mut heartbeats| heartbeats.remove(&lease.name));
        match release_tx {
            Some(tx) => {
                let _ = tx.send(true);
            }
            None => warn!("Releasing {} without a running heartbeat", lease.name),
        }

        let url = self.endpoint(
            "release",
            &[
                ("name", lease.name.as_str()),
                ("owner", lease.owner.as_str()),
                ("dest", STATE_DIRTY),
            ],
        );
        let response = self.http_client.post(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BoskosError::ServerError {
                status: status.as_u16(),
                message: body,
            });
        }

        info!("Released {} back to boskos", lease.name);
        Ok(())
    }
}
