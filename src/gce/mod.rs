//! GCE cluster operations
//!
//! The external collaborators of a run: gcloud for API enablement and
//! firewall rules, and the scripts under `<repo-root>/cluster/` for
//! bring-up, tear-down, health and log collection.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::DeployerConfig;
use crate::deployer::DeploymentState;
use crate::exec::{self, CommandError, CommandSpec};

/// Ports opened for NodePort services
pub const NODE_PORT_RANGE: &str = "tcp:30000-32767,udp:30000-32767";

/// Ports opened for pods using hostPort
pub const HOST_PORTS: &str = "tcp:80,tcp:8080,tcp:8081";

/// Which supporting firewall rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirewallScope {
    NodePort,
    HostPort,
}

impl FirewallScope {
    pub fn rule_name(&self, instance_prefix: &str) -> String {
        match self {
            FirewallScope::NodePort => format!("{}-nodeports", instance_prefix),
            FirewallScope::HostPort => format!("{}-http-hostports", instance_prefix),
        }
    }

    pub fn allow(&self) -> &'static str {
        match self {
            FirewallScope::NodePort => NODE_PORT_RANGE,
            FirewallScope::HostPort => HOST_PORTS,
        }
    }
}

/// External operations a run drives against a cluster
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Enable the compute API in `project`; safe to repeat
    async fn enable_compute_api(&self, project: &str) -> Result<(), CommandError>;

    async fn bring_up(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError>;

    async fn is_up(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<bool, CommandError>;

    async fn create_firewall_rule(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
        scope: FirewallScope,
    ) -> Result<(), CommandError>;

    async fn delete_firewall_rule(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
        scope: FirewallScope,
    ) -> Result<(), CommandError>;

    async fn dump_cluster_logs(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError>;

    async fn bring_down(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError>;
}

// ============================================================================
// SBIO: Pure command construction (no I/O)
// ============================================================================

/// Convert an OS environment to strings; bytes that are not UTF-8 are
/// replaced rather than failing the run.
pub fn lossy_env(
    vars: impl IntoIterator<Item = (OsString, OsString)>,
) -> impl Iterator<Item = (String, String)> {
    vars.into_iter().map(|(key, value)| {
        (
            key.to_string_lossy().into_owned(),
            value.to_string_lossy().into_owned(),
        )
    })
}

/// Environment for the cluster scripts: the inherited environment with the
/// deployment settings layered on top.
pub fn build_env(
    inherited: impl IntoIterator<Item = (String, String)>,
    config: &DeployerConfig,
    state: &DeploymentState,
) -> Vec<(String, String)> {
    let mut env: BTreeMap<String, String> = inherited.into_iter().collect();
    let project = state.primary_project().to_string();
    let kubeconfig = config.artifacts_dir.join("kubetest2-kubeconfig");

    let overrides = [
        ("CLOUDSDK_CORE_PRINT_UNHANDLED_TRACEBACKS", "1".to_string()),
        ("KUBE_GCE_ENABLE_IP_ALIASES", "true".to_string()),
        ("KUBERNETES_CONFORMANCE_TEST", "y".to_string()),
        ("CLOUDSDK_CORE_PROJECT", project.clone()),
        ("PROJECT", project),
        ("ZONE", config.zone.clone()),
        ("KUBE_GCE_ZONE", config.zone.clone()),
        ("NUM_NODES", config.num_nodes.to_string()),
        ("KUBE_GCE_NETWORK", config.network.clone()),
        ("KUBE_GCE_INSTANCE_PREFIX", config.instance_prefix.clone()),
        ("KUBECONFIG", kubeconfig.display().to_string()),
    ];
    for (key, value) in overrides {
        env.insert(key.to_string(), value);
    }
    env.into_iter().collect()
}

/// `gcloud services enable compute.googleapis.com`
pub fn enable_compute_api_command(project: &str) -> CommandSpec {
    CommandSpec::new("gcloud")
        .args(["services", "enable", "compute.googleapis.com"])
        .arg(format!("--project={}", project))
}

/// `gcloud compute firewall-rules create` for `scope`
pub fn create_firewall_rule_command(
    config: &DeployerConfig,
    project: &str,
    scope: FirewallScope,
) -> CommandSpec {
    CommandSpec::new("gcloud")
        .args(["compute", "firewall-rules", "create"])
        .arg(scope.rule_name(&config.instance_prefix))
        .arg(format!("--project={}", project))
        .arg(format!("--network={}", config.network))
        .arg(format!("--allow={}", scope.allow()))
        .arg(format!("--target-tags={}-minion", config.instance_prefix))
}

/// `gcloud compute firewall-rules delete` for `scope`
pub fn delete_firewall_rule_command(
    config: &DeployerConfig,
    project: &str,
    scope: FirewallScope,
) -> CommandSpec {
    CommandSpec::new("gcloud")
        .args(["compute", "firewall-rules", "delete"])
        .arg(scope.rule_name(&config.instance_prefix))
        .arg(format!("--project={}", project))
        .arg("--quiet")
}

/// Count nodes in `kubectl get nodes -o=name` output
pub fn count_nodes(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.trim_start().starts_with("node/"))
        .count()
}

// ============================================================================
// I/O boundary
// ============================================================================

/// `ClusterOps` backed by gcloud and the Kubernetes cluster scripts
#[derive(Debug, Clone, Default)]
pub struct GceCluster;

impl GceCluster {
    pub fn new() -> Self {
        Self
    }

    fn script(state: &DeploymentState, relative: &[&str]) -> PathBuf {
        relative
            .iter()
            .fold(state.repo_root.join("cluster"), |path, part| path.join(part))
    }

    fn script_command(
        config: &DeployerConfig,
        state: &DeploymentState,
        relative: &[&str],
    ) -> CommandSpec {
        let script = Self::script(state, relative);
        CommandSpec::new(script.display().to_string())
            .env_clear_and_set(build_env(lossy_env(std::env::vars_os()), config, state))
    }
}

#[async_trait]
impl ClusterOps for GceCluster {
    async fn enable_compute_api(&self, project: &str) -> Result<(), CommandError> {
        exec::run_inherited(&enable_compute_api_command(project)).await
    }

    async fn bring_up(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError> {
        let cmd = Self::script_command(config, state, &["kube-up.sh"]);
        debug!("About to run script at: {}", cmd.program);
        exec::run_inherited(&cmd).await
    }

    async fn is_up(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<bool, CommandError> {
        let cmd = CommandSpec::new(state.kubectl_path.display().to_string())
            .args(["get", "nodes", "-o=name"])
            .env_clear_and_set(build_env(lossy_env(std::env::vars_os()), config, state));
        let output = exec::run_captured(&cmd).await?;
        let nodes = count_nodes(&output);
        debug!("Cluster reports {} nodes", nodes);
        Ok(nodes > 0)
    }

    async fn create_firewall_rule(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
        scope: FirewallScope,
    ) -> Result<(), CommandError> {
        let cmd = create_firewall_rule_command(config, state.primary_project(), scope);
        exec::run_inherited(&cmd).await
    }

    async fn delete_firewall_rule(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
        scope: FirewallScope,
    ) -> Result<(), CommandError> {
        let cmd = delete_firewall_rule_command(config, state.primary_project(), scope);
        exec::run_inherited(&cmd).await
    }

    async fn dump_cluster_logs(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError> {
        let logs_dir = config.cluster_logs_dir();
        if config.overwrite_logs_dir {
            match tokio::fs::remove_dir_all(&logs_dir).await {
                Ok(()) => info!("Cleared {}", logs_dir.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        tokio::fs::create_dir_all(&logs_dir).await?;

        let cmd = Self::script_command(config, state, &["log-dump", "log-dump.sh"])
            .arg(logs_dir.display().to_string());
        exec::run_inherited(&cmd).await
    }

    async fn bring_down(
        &self,
        config: &DeployerConfig,
        state: &DeploymentState,
    ) -> Result<(), CommandError> {
        let cmd = Self::script_command(config, state, &["kube-down.sh"]);
        debug!("About to run script at: {}", cmd.program);
        exec::run_inherited(&cmd).await
    }
}
