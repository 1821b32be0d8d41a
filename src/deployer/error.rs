//! Error types for deployer operations

use thiserror::Error;

use crate::config::ValidationError;
use crate::exec::CommandError;
use crate::topology::TopologyError;

/// Broad category of an init failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Acquisition,
    Format,
}

/// Errors from the once-only initialization.
///
/// Every caller of `Deployer::init` receives a clone of the same value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InitError {
    #[error("init failed to verify flags for up: {0}")]
    UpFlags(ValidationError),

    #[error("init failed to verify flags for down: {0}")]
    DownFlags(ValidationError),

    #[error("failed to make boskos client: {0}")]
    BrokerClient(String),

    #[error("init failed to get project {attempt} of {requested} from boskos: {message}")]
    Acquisition {
        attempt: usize,
        requested: usize,
        message: String,
    },

    #[error("aborting initialization due to invalid cluster layout: {0}")]
    Topology(TopologyError),
}

impl InitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InitError::UpFlags(_) | InitError::DownFlags(_) => ErrorKind::Validation,
            InitError::BrokerClient(_) | InitError::Acquisition { .. } => ErrorKind::Acquisition,
            InitError::Topology(TopologyError::NoProjects) => ErrorKind::Validation,
            InitError::Topology(_) => ErrorKind::Format,
        }
    }
}

impl From<TopologyError> for InitError {
    fn from(err: TopologyError) -> Self {
        InitError::Topology(err)
    }
}

/// Errors from bringing a cluster up
#[derive(Error, Debug)]
pub enum UpError {
    #[error("up failed to init: {0}")]
    Init(#[source] InitError),

    #[error("up couldn't enable compute API: {0}")]
    ComputeApi(#[source] CommandError),

    #[error("error encountered during {script}: {source}")]
    BringUp {
        script: String,
        #[source]
        source: CommandError,
    },

    #[error("failed to create firewall rule {rule}: {source}")]
    NetworkRule {
        rule: String,
        #[source]
        source: CommandError,
    },
}

/// Errors from tearing a cluster down
#[derive(Error, Debug)]
pub enum DownError {
    #[error("down failed to init: {0}")]
    Init(#[source] InitError),

    #[error("error encountered during {script}: {source}")]
    BringDown {
        script: String,
        #[source]
        source: CommandError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(
            InitError::UpFlags(ValidationError::NumNodes(0)).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            InitError::Acquisition {
                attempt: 2,
                requested: 3,
                message: "timed out".to_string()
            }
            .kind(),
            ErrorKind::Acquisition
        );
        assert_eq!(
            InitError::from(TopologyError::MissingProjectIndex("foo".to_string())).kind(),
            ErrorKind::Format
        );
        assert_eq!(
            InitError::from(TopologyError::NoProjects).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_messages_carry_context() {
        let err = InitError::from(TopologyError::MissingProjectIndex("a-b-c".to_string()));
        let message = err.to_string();
        assert!(message.starts_with("aborting initialization"));
        assert!(message.contains("a-b-c"));
    }
}
