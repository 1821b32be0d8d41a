//! Bringing a cluster up

use tracing::{debug, error, info, warn};

use super::{Deployer, DeploymentState, UpError};
use crate::gce::FirewallScope;

impl Deployer {
    /// Bring the cluster up.
    ///
    /// Cluster logs are dumped once bring-up has been attempted, whatever
    /// its outcome. A failed or negative health check is logged only.
    pub async fn up(&self) -> Result<(), UpError> {
        info!("GCE deployer starting up");

        let state = self.init().await.map_err(UpError::Init)?;

        if self.config.enable_compute_api {
            debug!("Enabling compute API for project {}", state.primary_project());
            self.ops
                .enable_compute_api(state.primary_project())
                .await
                .map_err(UpError::ComputeApi)?;
        }

        let result = self.create_cluster(state).await;

        if let Err(e) = self.ops.dump_cluster_logs(&self.config, state).await {
            warn!("Dumping cluster logs at the end of up failed: {}", e);
        }

        result
    }

    async fn create_cluster(&self, state: &DeploymentState) -> Result<(), UpError> {
        self.ops
            .bring_up(&self.config, state)
            .await
            .map_err(|source| UpError::BringUp {
                script: state
                    .repo_root
                    .join("cluster")
                    .join("kube-up.sh")
                    .display()
                    .to_string(),
                source,
            })?;

        match self.ops.is_up(&self.config, state).await {
            Ok(true) => info!("Cluster reported as up"),
            Ok(false) => error!("Cluster reported as down"),
            Err(e) => warn!("Failed to check if cluster is up: {}", e),
        }

        for scope in [FirewallScope::NodePort, FirewallScope::HostPort] {
            let rule = scope.rule_name(&self.config.instance_prefix);
            debug!("About to create firewall rule {}", rule);
            self.ops
                .create_firewall_rule(&self.config, state, scope)
                .await
                .map_err(|source| UpError::NetworkRule { rule, source })?;
        }

        Ok(())
    }
}
