//! Flag validation for the up and down halves of a run
//!
//! The two checks are independent: a pure down run never looks at
//! up-only fields such as the node count.

use std::path::PathBuf;

use thiserror::Error;

use super::DeployerConfig;

/// Bad or missing configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("number of nodes must be at least 1, got {0}")]
    NumNodes(i64),

    #[error("could not resolve repo root: {0}")]
    RepoRoot(String),

    #[error("at least one gcp project must be set for down")]
    NoProject,
}

/// Paths resolved from the repo root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub repo_root: PathBuf,
    pub kubectl_path: PathBuf,
}

impl ResolvedPaths {
    fn from_root(repo_root: PathBuf) -> Self {
        let kubectl_path = repo_root.join("cluster").join("kubectl.sh");
        Self {
            repo_root,
            kubectl_path,
        }
    }
}

/// Resolve the repo root: the configured path (with `~` and `$VAR` expanded),
/// or the current working directory when none is configured.
pub fn resolve_repo_root(configured: Option<&str>) -> Result<PathBuf, ValidationError> {
    match configured.filter(|root| !root.is_empty()) {
        Some(root) => shellexpand::full(root)
            .map(|expanded| PathBuf::from(expanded.into_owned()))
            .map_err(|e| ValidationError::RepoRoot(e.to_string())),
        None => std::env::current_dir().map_err(|e| ValidationError::RepoRoot(e.to_string())),
    }
}

/// Validate the flags an up run needs.
///
/// No project is required here; one may be leased from Boskos later.
pub fn verify_up_flags(config: &DeployerConfig) -> Result<ResolvedPaths, ValidationError> {
    if config.num_nodes < 1 {
        return Err(ValidationError::NumNodes(config.num_nodes));
    }
    let repo_root = resolve_repo_root(config.repo_root.as_deref())?;
    Ok(ResolvedPaths::from_root(repo_root))
}

/// Validate the flags a down run needs.
///
/// `known_projects` is the project list as it stands once the up half of
/// init has run (configured or leased).
pub fn verify_down_flags(
    config: &DeployerConfig,
    known_projects: &[String],
) -> Result<ResolvedPaths, ValidationError> {
    let repo_root = resolve_repo_root(config.repo_root.as_deref())?;
    if known_projects.is_empty() {
        return Err(ValidationError::NoProject);
    }
    Ok(ResolvedPaths::from_root(repo_root))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_root(root: &str) -> DeployerConfig {
        DeployerConfig {
            repo_root: Some(root.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_up_rejects_zero_nodes() {
        let config = DeployerConfig {
            num_nodes: 0,
            ..config_with_root("/src/kubernetes")
        };
        assert_eq!(verify_up_flags(&config), Err(ValidationError::NumNodes(0)));
    }

    #[test]
    fn test_up_does_not_require_project() {
        let paths = verify_up_flags(&config_with_root("/src/kubernetes")).unwrap();
        assert_eq!(paths.repo_root, PathBuf::from("/src/kubernetes"));
        assert_eq!(
            paths.kubectl_path,
            PathBuf::from("/src/kubernetes/cluster/kubectl.sh")
        );
    }

    #[test]
    fn test_repo_root_defaults_to_cwd() {
        let root = resolve_repo_root(None).unwrap();
        assert_eq!(root, std::env::current_dir().unwrap());

        let root = resolve_repo_root(Some("")).unwrap();
        assert_eq!(root, std::env::current_dir().unwrap());
    }

    #[test]
    fn test_repo_root_undefined_variable() {
        let result = resolve_repo_root(Some("$GCE_DEPLOYER_SURELY_UNSET_VAR/k8s"));
        assert!(matches!(result, Err(ValidationError::RepoRoot(_))));
    }

    #[test]
    fn test_down_ignores_num_nodes() {
        let config = DeployerConfig {
            num_nodes: 0,
            ..config_with_root("/src/kubernetes")
        };
        let projects = vec!["proj-z".to_string()];
        assert!(verify_down_flags(&config, &projects).is_ok());
    }

    #[test]
    fn test_down_requires_project() {
        let config = config_with_root("/src/kubernetes");
        assert_eq!(
            verify_down_flags(&config, &[]),
            Err(ValidationError::NoProject)
        );
    }
}
