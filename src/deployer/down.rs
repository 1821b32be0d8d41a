//! Tearing a cluster down

use tracing::{info, warn};

use super::{Deployer, DownError};
use crate::gce::FirewallScope;

impl Deployer {
    /// Tear the cluster down, remove its firewall rules and give any leased
    /// projects back to Boskos.
    ///
    /// Leases are released even when the tear-down script fails.
    pub async fn down(&self) -> Result<(), DownError> {
        info!("GCE deployer starting down");

        let state = self.init().await.map_err(DownError::Init)?;

        let result = self
            .ops
            .bring_down(&self.config, state)
            .await
            .map_err(|source| DownError::BringDown {
                script: state
                    .repo_root
                    .join("cluster")
                    .join("kube-down.sh")
                    .display()
                    .to_string(),
                source,
            });

        if result.is_ok() {
            for scope in [FirewallScope::NodePort, FirewallScope::HostPort] {
                if let Err(e) = self
                    .ops
                    .delete_firewall_rule(&self.config, state, scope)
                    .await
                {
                    warn!(
                        "Failed to delete firewall rule {}: {}",
                        scope.rule_name(&self.config.instance_prefix),
                        e
                    );
                }
            }
        }

        self.release_leases().await;
        result
    }
}
