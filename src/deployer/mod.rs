//! GCE deployer
//!
//! `Deployer` owns the configuration for one process run. Its `init` step
//! runs exactly once no matter how many entry points call it: it validates
//! flags, leases projects from Boskos when none were supplied, and plans
//! which clusters go to which project. `up` and `down` build on the result.

mod down;
mod error;
mod up;

pub use error::{DownError, ErrorKind, InitError, UpError};

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch, OnceCell};
use tracing::{debug, info, warn};

use crate::boskos::{BoskosClient, BoskosError, HeartbeatFailure, Lease, ResourceBroker};
use crate::config::{
    verify_down_flags, verify_up_flags, DeployerConfig, GCP_PROJECT_RESOURCE_TYPE,
};
use crate::gce::ClusterOps;
use crate::topology::{self, ClusterLayout};

/// Sink for heartbeat failures of leased resources
pub type FailureReporter = mpsc::UnboundedSender<HeartbeatFailure>;

/// Builds the broker client on first use
pub type BrokerConnector = Arc<
    dyn Fn(&DeployerConfig, FailureReporter) -> Result<Arc<dyn ResourceBroker>, BoskosError>
        + Send
        + Sync,
>;

/// Everything init resolves; read-only once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentState {
    pub repo_root: PathBuf,
    pub kubectl_path: PathBuf,
    /// Projects in use, in order (configured or leased)
    pub projects: Vec<String>,
    /// Clusters per project; empty for a down-only run
    pub layout: ClusterLayout,
    /// Whether `projects` came from Boskos
    pub leased: bool,
}

impl DeploymentState {
    /// Project the single GCE cluster is brought up in
    pub fn primary_project(&self) -> &str {
        self.projects.first().map(String::as_str).unwrap_or_default()
    }
}

/// Connector that talks to the Boskos server named in the config
pub fn boskos_connector() -> BrokerConnector {
    Arc::new(
        |config: &DeployerConfig,
         failures: FailureReporter|
         -> Result<Arc<dyn ResourceBroker>, BoskosError> {
            let client =
                BoskosClient::new(&config.boskos_location, config.effective_boskos_owner())?
                    .with_heartbeat_interval(config.heartbeat_interval())
                    .with_failure_reporter(failures);
            Ok(Arc::new(client))
        },
    )
}

pub struct Deployer {
    config: DeployerConfig,
    ops: Arc<dyn ClusterOps>,
    connect_broker: BrokerConnector,
    state: OnceCell<Result<DeploymentState, InitError>>,
    broker: Mutex<Option<Arc<dyn ResourceBroker>>>,
    /// Leases acquired so far, including those of a batch that later failed
    leases: Mutex<Vec<Lease>>,
    heartbeat_stop: watch::Sender<bool>,
    failure_tx: FailureReporter,
    failure_rx: Mutex<mpsc::UnboundedReceiver<HeartbeatFailure>>,
}

impl Deployer {
    pub fn new(config: DeployerConfig, ops: Arc<dyn ClusterOps>) -> Self {
        let (heartbeat_stop, _) = watch::channel(false);
        let (failure_tx, failure_rx) = mpsc::unbounded_channel();
        Self {
            config,
            ops,
            connect_broker: boskos_connector(),
            state: OnceCell::new(),
            broker: Mutex::new(None),
            leases: Mutex::new(Vec::new()),
            heartbeat_stop,
            failure_tx,
            failure_rx: Mutex::new(failure_rx),
        }
    }

    /// Use a different broker connector (tests, alternative brokers)
    pub fn with_broker_connector(mut self, connector: BrokerConnector) -> Self {
        self.connect_broker = connector;
        self
    }

    pub fn config(&self) -> &DeployerConfig {
        &self.config
    }

    /// Run initialization, or wait for and return the outcome of the run
    /// already in flight.
    ///
    /// If the future driving the body is dropped part way, the next caller
    /// runs it again; leases taken by the abandoned run are kept and count
    /// towards the requested number.
    pub async fn init(&self) -> Result<&DeploymentState, InitError> {
        self.state
            .get_or_init(|| self.initialize())
            .await
            .as_ref()
            .map_err(Clone::clone)
    }

    /// Snapshot of the leases held by this deployer
    pub fn leases(&self) -> Vec<Lease> {
        self.leases
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Heartbeat failures reported since the last call
    pub fn heartbeat_failures(&self) -> Vec<HeartbeatFailure> {
        let mut rx = self
            .failure_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut failures = Vec::new();
        while let Ok(failure) = rx.try_recv() {
            failures.push(failure);
        }
        failures
    }

    /// Stop every lease heartbeat without releasing the leases
    pub fn stop_heartbeats(&self) {
        self.heartbeat_stop.send_replace(true);
    }

    /// Release every held lease back to the broker and stop heartbeats.
    ///
    /// Release failures are logged; the lease is still dropped from the list.
    pub async fn release_leases(&self) {
        let leases = std::mem::take(
            &mut *self
                .leases
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let broker = self
            .broker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        if let Some(broker) = broker {
            for lease in &leases {
                if let Err(e) = broker.release(lease).await {
                    warn!("Failed to release {} to boskos: {}", lease.name, e);
                }
            }
        }
        self.stop_heartbeats();
    }

    /// The init body; only ever called through `init`
    async fn initialize(&self) -> Result<DeploymentState, InitError> {
        let operation = self.config.operation();
        let mut state = DeploymentState {
            projects: self.config.projects.clone(),
            ..Default::default()
        };

        if operation.should_up() {
            let paths = verify_up_flags(&self.config).map_err(InitError::UpFlags)?;
            state.repo_root = paths.repo_root;
            state.kubectl_path = paths.kubectl_path;

            if state.projects.is_empty() {
                state.projects = self.acquire_projects().await?;
                state.leased = true;
            }

            state.layout = topology::plan(&self.config.clusters, &state.projects)?;
        }

        if operation.should_down() {
            let paths = verify_down_flags(&self.config, &state.projects)
                .map_err(InitError::DownFlags)?;
            state.repo_root = paths.repo_root;
            state.kubectl_path = paths.kubectl_path;
        }

        debug!("Initialized deployment state: {:?}", state);
        Ok(state)
    }

    /// Lease the requested number of projects one at a time, stopping at
    /// the first failure. Leases taken before the failure stay recorded, and
    /// leases already held from an abandoned init are reused.
    async fn acquire_projects(&self) -> Result<Vec<String>, InitError> {
        let requested = self.config.projects_requested;
        info!(
            "No GCP projects provided, acquiring {} project(s) from boskos",
            requested
        );

        let broker = (self.connect_broker)(&self.config, self.failure_tx.clone())
            .map_err(|e| InitError::BrokerClient(e.to_string()))?;
        *self
            .broker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&broker));

        let mut projects: Vec<String> = self.leases().into_iter().map(|l| l.name).collect();
        if !projects.is_empty() {
            info!("Reusing {} project(s) already leased", projects.len());
        }
        for attempt in projects.len() + 1..=requested {
            let lease = broker
                .acquire(
                    GCP_PROJECT_RESOURCE_TYPE,
                    self.config.acquire_timeout(),
                    self.heartbeat_stop.subscribe(),
                )
                .await
                .map_err(|e| InitError::Acquisition {
                    attempt,
                    requested,
                    message: e.to_string(),
                })?;

            info!("Got project {} from boskos", lease.name);
            projects.push(lease.name.clone());
            self.leases
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(lease);
        }
        Ok(projects)
    }
}
