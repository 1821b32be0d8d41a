//! Running the requested operations

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{error, info, warn};

use crate::boskos::HeartbeatFailure;
use crate::deployer::{Deployer, DownError, UpError};

/// Errors from a full run
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Up(#[from] UpError),

    #[error(transparent)]
    Down(#[from] DownError),

    #[error("nothing to do: pass --up and/or --down")]
    NothingRequested,
}

/// Run up and/or down as configured.
///
/// Down still runs after a failed up so leased projects are returned; the
/// up error is the one reported.
pub async fn run(deployer: &Deployer) -> Result<(), RunError> {
    let operation = deployer.config().operation();
    if !operation.should_up() && !operation.should_down() {
        return Err(RunError::NothingRequested);
    }

    let mut first_error: Option<RunError> = None;

    if operation.should_up() {
        match deployer.up().await {
            Ok(()) => info!("Up completed"),
            Err(e) => {
                error!("Up failed: {}", e);
                first_error = Some(e.into());
            }
        }
    }

    if operation.should_down() {
        match deployer.down().await {
            Ok(()) => info!("Down completed"),
            Err(e) => {
                error!("Down failed: {}", e);
                if first_error.is_none() {
                    first_error = Some(e.into());
                }
            }
        }
    }

    deployer.stop_heartbeats();
    for (resource, (count, last)) in summarize_heartbeat_failures(&deployer.heartbeat_failures()) {
        warn!(
            "Lease {} missed {} heartbeat(s) during the run, last error: {}",
            resource, count, last
        );
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Failure count and last message per leased resource
pub fn summarize_heartbeat_failures(
    failures: &[HeartbeatFailure],
) -> BTreeMap<String, (usize, String)> {
    let mut summary: BTreeMap<String, (usize, String)> = BTreeMap::new();
    for failure in failures {
        let entry = summary
            .entry(failure.resource_name.clone())
            .or_insert_with(|| (0, String::new()));
        entry.0 += 1;
        entry.1 = failure.message.clone();
    }
    summary
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::DeployerConfig;
    use crate::deployer::testing::{connector_for, up_config, FakeBroker, FakeOps};

    #[tokio::test]
    async fn test_nothing_requested() {
        let d = Deployer::new(DeployerConfig::default(), Arc::new(FakeOps::healthy()));
        assert!(matches!(run(&d).await, Err(RunError::NothingRequested)));
    }

    #[tokio::test]
    async fn test_down_runs_after_failed_up() {
        let ops = Arc::new(FakeOps {
            fail_bring_up: true,
            ..FakeOps::healthy()
        });
        let broker = Arc::new(FakeBroker::new(&["proj-x"]));
        let config = DeployerConfig {
            down: true,
            ..up_config(&["a"], &[], 1)
        };
        let d = Deployer::new(config, ops.clone()).with_broker_connector(connector_for(broker.clone()));

        let err = run(&d).await.unwrap_err();
        assert!(matches!(err, RunError::Up(UpError::BringUp { .. })));
        assert!(ops.calls().contains(&"bring-down".to_string()));
        assert_eq!(*broker.released.lock().unwrap(), vec!["proj-x"]);
    }

    #[tokio::test]
    async fn test_up_only_keeps_leases() {
        let broker = Arc::new(FakeBroker::new(&["proj-x"]));
        let d = Deployer::new(up_config(&["a"], &[], 1), Arc::new(FakeOps::healthy()))
            .with_broker_connector(connector_for(broker.clone()));

        run(&d).await.unwrap();
        assert_eq!(d.leases().len(), 1);
        assert!(broker.released.lock().unwrap().is_empty());
    }

    #[test]
    fn test_summarize_heartbeat_failures() {
        let failure = |name: &str, n: u32, message: &str| HeartbeatFailure {
            resource_name: name.to_string(),
            consecutive_failures: n,
            message: message.to_string(),
        };
        let summary = summarize_heartbeat_failures(&[
            failure("proj-x", 1, "timed out"),
            failure("proj-y", 1, "boskos returned 500"),
            failure("proj-x", 2, "connection refused"),
        ]);

        assert_eq!(summary.len(), 2);
        assert_eq!(summary["proj-x"], (2, "connection refused".to_string()));
        assert_eq!(summary["proj-y"], (1, "boskos returned 500".to_string()));
    }
}
