//! Deployer configuration
//!
//! The configuration is supplied once, before any operation runs, and is
//! read-only afterwards. It can come from a YAML file, from command-line
//! flags, or both (flags win).

pub mod validation;

pub use validation::{
    resolve_repo_root, verify_down_flags, verify_up_flags, ResolvedPaths, ValidationError,
};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Resource type leased from Boskos for this workload
pub const GCP_PROJECT_RESOURCE_TYPE: &str = "gce-project";

/// Default in-cluster Boskos endpoint
pub const DEFAULT_BOSKOS_LOCATION: &str = "http://boskos.test-pods.svc.cluster.local.";

/// Errors for config file I/O (separate from flag validation)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(String),

    #[error("Failed to load env file {}: {source}", path.display())]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
}

/// Which halves of the lifecycle were requested
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Operation {
    pub up: bool,
    pub down: bool,
}

impl Operation {
    pub fn up() -> Self {
        Self { up: true, down: false }
    }

    pub fn down() -> Self {
        Self { up: false, down: true }
    }

    pub fn both() -> Self {
        Self { up: true, down: true }
    }

    pub fn should_up(&self) -> bool {
        self.up
    }

    pub fn should_down(&self) -> bool {
        self.down
    }
}

/// The complete deployer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct DeployerConfig {
    pub up: bool,

    pub down: bool,

    /// Cluster-name tokens, `<name>-<projectIndex>` when more than one project is used
    pub clusters: Vec<String>,

    /// Pre-supplied GCP projects; when empty, projects are leased from Boskos
    pub projects: Vec<String>,

    /// How many projects to lease when none are pre-supplied
    pub projects_requested: usize,

    /// Boskos base URL
    pub boskos_location: String,

    /// Owner name reported to Boskos (defaults to $JOB_NAME, then the host name)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boskos_owner: Option<String>,

    /// Per-lease acquire timeout
    pub boskos_acquire_timeout_seconds: u64,

    /// Interval between lease heartbeats
    pub boskos_heartbeat_interval_seconds: u64,

    /// Kubernetes checkout containing `cluster/kube-up.sh`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,

    pub num_nodes: i64,

    /// Run `gcloud services enable compute.googleapis.com` before bring-up
    pub enable_compute_api: bool,

    pub zone: String,

    pub network: String,

    /// Prefix for instance and firewall-rule names
    pub instance_prefix: String,

    pub artifacts_dir: PathBuf,

    /// Clear the cluster log directory before dumping logs into it
    pub overwrite_logs_dir: bool,
}

impl Default for DeployerConfig {
    fn default() -> Self {
        Self {
            up: false,
            down: false,
            clusters: Vec::new(),
            projects: Vec::new(),
            projects_requested: 1,
            boskos_location: DEFAULT_BOSKOS_LOCATION.to_string(),
            boskos_owner: None,
            boskos_acquire_timeout_seconds: 300,
            boskos_heartbeat_interval_seconds: 300,
            repo_root: None,
            num_nodes: 3,
            enable_compute_api: false,
            zone: "us-central1-c".to_string(),
            network: "default".to_string(),
            instance_prefix: "kubetest2".to_string(),
            artifacts_dir: PathBuf::from("_artifacts"),
            overwrite_logs_dir: false,
        }
    }
}

impl DeployerConfig {
    pub fn operation(&self) -> Operation {
        Operation {
            up: self.up,
            down: self.down,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.boskos_acquire_timeout_seconds)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.boskos_heartbeat_interval_seconds)
    }

    /// Owner name for Boskos leases
    pub fn effective_boskos_owner(&self) -> String {
        if let Some(owner) = self.boskos_owner.as_deref().filter(|o| !o.is_empty()) {
            return owner.to_string();
        }
        if let Ok(job) = std::env::var("JOB_NAME") {
            if !job.is_empty() {
                return job;
            }
        }
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| format!("gce-deployer-{}", uuid::Uuid::new_v4()))
    }

    /// Directory that cluster logs are dumped into
    pub fn cluster_logs_dir(&self) -> PathBuf {
        self.artifacts_dir.join("cluster-logs")
    }
}

// ============================================================================
// SBIO: Pure parsing (no I/O)
// ============================================================================

/// Parse a config from YAML
pub fn parse_config(content: &str) -> Result<DeployerConfig, ConfigError> {
    serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
}

// ============================================================================
// I/O boundary
// ============================================================================

/// Load a config file from disk
pub fn load_config_file(path: &Path) -> Result<DeployerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let config = DeployerConfig::default();
        assert_eq!(config.projects_requested, 1);
        assert_eq!(config.num_nodes, 3);
        assert_eq!(config.boskos_location, DEFAULT_BOSKOS_LOCATION);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(300));
        assert!(!config.operation().should_up());
        assert!(!config.operation().should_down());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
up: true
clusters: [a-0, b-1, c-0]
projects-requested: 2
boskos-acquire-timeout-seconds: 60
"#;
        let config = parse_config(yaml).unwrap();
        assert!(config.operation().should_up());
        assert!(!config.operation().should_down());
        assert_eq!(config.clusters, vec!["a-0", "b-1", "c-0"]);
        assert_eq!(config.projects_requested, 2);
        assert_eq!(config.acquire_timeout(), Duration::from_secs(60));
        // untouched fields keep their defaults
        assert_eq!(config.num_nodes, 3);
        assert_eq!(config.instance_prefix, "kubetest2");
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = parse_config("num-nodes: [not, a, number]");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"down: true\nprojects: [proj-z]\n").unwrap();

        let config = load_config_file(file.path()).unwrap();
        assert_eq!(config.operation(), Operation::down());
        assert_eq!(config.projects, vec!["proj-z"]);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = load_config_file(Path::new("/nonexistent/deployer.yaml"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }

    #[test]
    fn test_explicit_owner_wins() {
        let config = DeployerConfig {
            boskos_owner: Some("ci-job".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_boskos_owner(), "ci-job");
    }

    #[test]
    fn test_cluster_logs_dir() {
        let config = DeployerConfig {
            artifacts_dir: PathBuf::from("/tmp/artifacts"),
            ..Default::default()
        };
        assert_eq!(
            config.cluster_logs_dir(),
            PathBuf::from("/tmp/artifacts/cluster-logs")
        );
    }
}
