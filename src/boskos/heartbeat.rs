//! Lease heartbeat
//!
//! Background task that keeps a Boskos lease alive by periodically marking
//! the resource busy again. It stops when either the run-wide stop signal
//! or the lease's own release signal flips.

use std::time::Duration;

use reqwest::{Client, Url};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::STATE_BUSY;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 300;

/// Configuration for one lease's heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Boskos base URL
    pub base_url: Url,

    /// Leased resource name
    pub resource_name: String,

    /// Owner the lease was taken under
    pub owner: String,

    pub interval: Duration,

    /// Consecutive failures before logging escalates to error
    pub max_retries: u32,
}

impl HeartbeatConfig {
    pub fn new(base_url: Url, resource_name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            base_url,
            resource_name: resource_name.into(),
            owner: owner.into(),
            interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECS),
            max_retries: 3,
        }
    }

    /// Set the heartbeat interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    fn update_url(&self) -> Url {
        let mut url = self.base_url.clone();
        let base_path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{}/update", base_path));
        url.query_pairs_mut()
            .clear()
            .append_pair("name", &self.resource_name)
            .append_pair("owner", &self.owner)
            .append_pair("state", STATE_BUSY);
        url
    }
}

/// A heartbeat that did not go through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatFailure {
    pub resource_name: String,
    pub consecutive_failures: u32,
    pub message: String,
}

/// Heartbeat loop for a single lease
pub struct LeaseHeartbeat {
    config: HeartbeatConfig,
    http_client: Client,
    failures: Option<mpsc::UnboundedSender<HeartbeatFailure>>,
}

impl LeaseHeartbeat {
    pub fn new(
        config: HeartbeatConfig,
        http_client: Client,
        failures: Option<mpsc::UnboundedSender<HeartbeatFailure>>,
    ) -> Self {
        Self {
            config,
            http_client,
            failures,
        }
    }

    /// Run until `stop` or `release` flips to `true` (or its sender goes away)
    pub async fn run(self, mut stop: watch::Receiver<bool>, mut release: watch::Receiver<bool>) {
        let mut consecutive_failures = 0u32;

        info!(
            "Starting heartbeat for {}: owner={}, interval={:?}",
            self.config.resource_name, self.config.owner, self.config.interval
        );

        loop {
            if *stop.borrow() || *release.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    match self.send_heartbeat().await {
                        Ok(()) => {
                            if consecutive_failures > 0 {
                                info!(
                                    "Heartbeat for {} recovered after {} failures",
                                    self.config.resource_name, consecutive_failures
                                );
                            }
                            consecutive_failures = 0;
                            debug!("Heartbeat sent for {}", self.config.resource_name);
                        }
                        Err(message) => {
                            consecutive_failures += 1;
                            if consecutive_failures >= self.config.max_retries {
                                error!(
                                    "Heartbeat for {} failed {} consecutive times: {}",
                                    self.config.resource_name, consecutive_failures, message
                                );
                            } else {
                                warn!(
                                    "Heartbeat for {} failed (attempt {}): {}",
                                    self.config.resource_name, consecutive_failures, message
                                );
                            }
                            self.report(consecutive_failures, message);
                        }
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                changed = release.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Heartbeat for {} stopped", self.config.resource_name);
    }

    async fn send_heartbeat(&self) -> Result<(), String> {
        let response = self
            .http_client
            .post(self.config.update_url())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(format!("boskos returned {}: {}", status.as_u16(), body));
        }
        Ok(())
    }

    fn report(&self, consecutive_failures: u32, message: String) {
        if let Some(tx) = &self.failures {
            let _ = tx.send(HeartbeatFailure {
                resource_name: self.config.resource_name.clone(),
                consecutive_failures,
                message,
            });
        }
    }
}

/// Spawn the heartbeat for one lease as a background task.
///
/// Returns the lease's release sender; sending `true` (or dropping it)
/// stops this heartbeat only.
pub fn spawn_heartbeat(
    config: HeartbeatConfig,
    http_client: Client,
    stop: watch::Receiver<bool>,
    failures: Option<mpsc::UnboundedSender<HeartbeatFailure>>,
) -> watch::Sender<bool> {
    let (release_tx, release_rx) = watch::channel(false);
    let heartbeat = LeaseHeartbeat::new(config, http_client, failures);

    tokio::spawn(async move {
        heartbeat.run(stop, release_rx).await;
    });

    release_tx
}
