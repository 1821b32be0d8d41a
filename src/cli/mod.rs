//! Command-line interface for gce-deployer
//!
//! Flags mirror the config file keys. A flag that is given overrides the
//! value from `--config`; boolean flags can only switch a setting on.

use clap::{ArgAction, Parser};
use std::ffi::OsString;
use std::path::PathBuf;

mod commands;

pub use commands::*;

use crate::config::{load_config_file, ConfigError, DeployerConfig};

#[derive(Parser, Debug)]
#[command(name = "gce-deployer")]
#[command(about = "Bring up and tear down GCE test clusters on projects leased from Boskos")]
#[command(version)]
pub struct Args {
    /// Enable verbose logging output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// YAML config file; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Path to a .env file to load before running
    #[arg(long, value_name = "FILE")]
    pub env_file: Option<PathBuf>,

    /// Bring the cluster up
    #[arg(long)]
    pub up: bool,

    /// Tear the cluster down
    #[arg(long)]
    pub down: bool,

    /// Cluster names, `name-projectIndex` when several projects are used
    #[arg(long, value_delimiter = ',', value_name = "NAMES")]
    pub clusters: Vec<String>,

    /// GCP projects to use; when omitted, projects are leased from Boskos
    #[arg(long = "gcp-project", value_delimiter = ',', value_name = "PROJECTS")]
    pub projects: Vec<String>,

    /// Number of projects to lease from Boskos
    #[arg(long, value_name = "N")]
    pub projects_requested: Option<usize>,

    /// Boskos base URL
    #[arg(long, env = "BOSKOS_LOCATION", value_name = "URL")]
    pub boskos_location: Option<String>,

    /// Owner name for Boskos leases
    #[arg(long, value_name = "NAME")]
    pub boskos_owner: Option<String>,

    /// Timeout for each Boskos acquire
    #[arg(long, value_name = "SECONDS")]
    pub boskos_acquire_timeout_seconds: Option<u64>,

    /// Interval between lease heartbeats
    #[arg(long, value_name = "SECONDS")]
    pub boskos_heartbeat_interval_seconds: Option<u64>,

    /// Kubernetes checkout containing cluster/kube-up.sh (default: current directory)
    #[arg(long, env = "KUBE_ROOT", value_name = "DIR")]
    pub repo_root: Option<String>,

    /// Number of nodes to bring up
    #[arg(long, allow_negative_numbers = true, value_name = "N")]
    pub num_nodes: Option<i64>,

    /// Enable the compute API in the project before bring-up
    #[arg(long)]
    pub enable_compute_api: bool,

    #[arg(long)]
    pub zone: Option<String>,

    #[arg(long)]
    pub network: Option<String>,

    /// Prefix for instance and firewall-rule names
    #[arg(long)]
    pub instance_prefix: Option<String>,

    /// Directory for logs and kubeconfig
    #[arg(long, env = "ARTIFACTS", value_name = "DIR")]
    pub artifacts: Option<PathBuf>,

    /// Clear the cluster log directory before dumping logs
    #[arg(long)]
    pub overwrite_logs_dir: bool,
}

/// Find the `--env-file` value in raw command-line arguments.
///
/// Runs before clap so that the file can feed the env-backed flags. The
/// last occurrence wins, as it does for clap.
pub fn env_file_arg<I, T>(args: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut found = None;
    let mut args = args.into_iter().map(Into::into);
    while let Some(arg) = args.next() {
        let Some(arg) = arg.to_str() else {
            continue;
        };
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            found = args.next().map(PathBuf::from);
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            found = Some(PathBuf::from(value));
        }
    }
    found
}

/// Load the `--env-file` named in `args`, if any, into the process
/// environment. Variables already set are left alone.
pub fn load_env_file<I, T>(args: I) -> Result<Option<PathBuf>, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let Some(path) = env_file_arg(args) else {
        return Ok(None);
    };
    dotenvy::from_path(&path).map_err(|source| ConfigError::EnvFile {
        path: path.clone(),
        source,
    })?;
    Ok(Some(path))
}

impl Args {
    /// Layer the flags that were given on top of `config`
    pub fn apply_to(&self, mut config: DeployerConfig) -> DeployerConfig {
        config.up |= self.up;
        config.down |= self.down;
        config.enable_compute_api |= self.enable_compute_api;
        config.overwrite_logs_dir |= self.overwrite_logs_dir;

        if !self.clusters.is_empty() {
            config.clusters = self.clusters.clone();
        }
        if !self.projects.is_empty() {
            config.projects = self.projects.clone();
        }
        if let Some(n) = self.projects_requested {
            config.projects_requested = n;
        }
        if let Some(location) = &self.boskos_location {
            config.boskos_location = location.clone();
        }
        if let Some(owner) = &self.boskos_owner {
            config.boskos_owner = Some(owner.clone());
        }
        if let Some(secs) = self.boskos_acquire_timeout_seconds {
            config.boskos_acquire_timeout_seconds = secs;
        }
        if let Some(secs) = self.boskos_heartbeat_interval_seconds {
            config.boskos_heartbeat_interval_seconds = secs;
        }
        if let Some(root) = &self.repo_root {
            config.repo_root = Some(root.clone());
        }
        if let Some(n) = self.num_nodes {
            config.num_nodes = n;
        }
        if let Some(zone) = &self.zone {
            config.zone = zone.clone();
        }
        if let Some(network) = &self.network {
            config.network = network.clone();
        }
        if let Some(prefix) = &self.instance_prefix {
            config.instance_prefix = prefix.clone();
        }
        if let Some(dir) = &self.artifacts {
            config.artifacts_dir = dir.clone();
        }
        config
    }

    /// Build the effective config: file (if any), then flags
    pub fn load_config(&self) -> Result<DeployerConfig, ConfigError> {
        let base = match &self.config {
            Some(path) => load_config_file(path)?,
            None => DeployerConfig::default(),
        };
        Ok(self.apply_to(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Env-backed flags are left out of these assertions so CI variables
    // such as ARTIFACTS do not leak into them.

    #[test]
    fn test_clap_minimal() {
        let args = Args::parse_from(["gce-deployer", "--up"]);
        assert!(args.up);
        assert!(!args.down);
        assert!(args.projects.is_empty());
        assert_eq!(args.verbose, 0);
    }

    #[test]
    fn test_clap_lists() {
        let args = Args::parse_from([
            "gce-deployer",
            "--up",
            "--clusters=a-0,b-1,c-0",
            "--gcp-project",
            "proj-x,proj-y",
        ]);
        assert_eq!(args.clusters, vec!["a-0", "b-1", "c-0"]);
        assert_eq!(args.projects, vec!["proj-x", "proj-y"]);
    }

    #[test]
    fn test_clap_verbose() {
        let args = Args::parse_from(["gce-deployer", "-vv", "--down"]);
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_negative_num_nodes_reaches_validation() {
        let args = Args::parse_from(["gce-deployer", "--up", "--num-nodes", "-1"]);
        assert_eq!(args.num_nodes, Some(-1));
    }

    #[test]
    fn test_flags_override_config() {
        let base = DeployerConfig {
            projects_requested: 4,
            num_nodes: 7,
            zone: "europe-west1-b".to_string(),
            ..Default::default()
        };
        let args = Args::parse_from([
            "gce-deployer",
            "--up",
            "--num-nodes=2",
            "--enable-compute-api",
        ]);
        let config = args.apply_to(base);

        assert!(config.up);
        assert!(config.enable_compute_api);
        assert_eq!(config.num_nodes, 2);
        // not given on the command line
        assert_eq!(config.projects_requested, 4);
        assert_eq!(config.zone, "europe-west1-b");
    }

    #[test]
    fn test_env_file_arg_forms() {
        assert_eq!(env_file_arg(["gce-deployer", "--up"]), None);
        assert_eq!(
            env_file_arg(["gce-deployer", "--env-file", "a.env", "--up"]),
            Some(PathBuf::from("a.env"))
        );
        assert_eq!(
            env_file_arg(["gce-deployer", "--env-file=a.env", "--env-file", "b.env"]),
            Some(PathBuf::from("b.env"))
        );
        assert_eq!(env_file_arg(["gce-deployer", "--", "--env-file=a.env"]), None);
    }

    #[test]
    fn test_missing_env_file_is_an_error() {
        let result = load_env_file(["gce-deployer", "--env-file", "/nonexistent/gce.env"]);
        assert!(matches!(result, Err(ConfigError::EnvFile { .. })));
    }

    #[test]
    fn test_env_file_feeds_env_backed_flags() {
        // A value already in the environment takes precedence over the file
        let preset = std::env::var("KUBE_ROOT").ok();

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"KUBE_ROOT=/from/envfile\n").unwrap();
        let path = file.path().display().to_string();
        let argv = ["gce-deployer", "--up", "--env-file", path.as_str()];

        let loaded = load_env_file(argv).unwrap();
        assert_eq!(loaded, Some(file.path().to_path_buf()));

        let config = Args::parse_from(argv).load_config().unwrap();
        assert_eq!(
            config.repo_root.as_deref(),
            Some(preset.as_deref().unwrap_or("/from/envfile"))
        );
    }

    #[test]
    fn test_load_config_with_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"down: true\nprojects: [proj-z]\ninstance-prefix: e2e\n")
            .unwrap();
        let path = file.path().display().to_string();

        let args = Args::parse_from(["gce-deployer", "--config", &path, "--up"]);
        let config = args.load_config().unwrap();
        assert!(config.up);
        assert!(config.down);
        assert_eq!(config.projects, vec!["proj-z"]);
        assert_eq!(config.instance_prefix, "e2e");
    }
}
