//! Cluster topology planning
//!
//! Partitions a flat list of cluster-name tokens across the projects a run
//! is using. With one project every token goes to it verbatim. With more,
//! each token must read `<name>-<projectIndex>` and lands, suffix stripped,
//! in the list of the project at that index.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

/// Project id -> ordered cluster names
pub type ClusterLayout = BTreeMap<String, Vec<String>>;

/// Errors that can occur while planning
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    #[error("cannot plan clusters onto zero projects")]
    NoProjects,

    #[error("cluster name does not follow expected format (name-projectIndex): {0}")]
    MissingProjectIndex(String),

    #[error("cluster name does not contain a valid project index (name-projectIndex, e.g. cluster-0): {token}: {reason}")]
    InvalidProjectIndex { token: String, reason: String },
}

/// A cluster token split into its name and project index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterToken<'a> {
    pub name: &'a str,
    pub project_index: usize,
}

/// Split `<name>-<projectIndex>`; anything other than exactly one hyphen is rejected.
pub fn parse_cluster_token(token: &str) -> Result<ClusterToken<'_>, TopologyError> {
    let parts: Vec<&str> = token.split('-').collect();
    let [name, index] = parts.as_slice() else {
        return Err(TopologyError::MissingProjectIndex(token.to_string()));
    };
    let project_index = index
        .parse::<usize>()
        .map_err(|e| TopologyError::InvalidProjectIndex {
            token: token.to_string(),
            reason: e.to_string(),
        })?;
    Ok(ClusterToken {
        name: *name,
        project_index,
    })
}

/// Build the cluster layout for `projects`.
///
/// Every project gets an entry, even when no cluster lands on it. Tokens
/// whose index points past the end of `projects` are dropped from every
/// list.
pub fn plan(clusters: &[String], projects: &[String]) -> Result<ClusterLayout, TopologyError> {
    match projects {
        [] => Err(TopologyError::NoProjects),
        [only] => {
            let mut layout = ClusterLayout::new();
            layout.insert(only.clone(), clusters.to_vec());
            Ok(layout)
        }
        _ => {
            let mut buckets: Vec<Vec<String>> = vec![Vec::new(); projects.len()];
            for token in clusters {
                let parsed = parse_cluster_token(token)?;
                match buckets.get_mut(parsed.project_index) {
                    Some(bucket) => bucket.push(parsed.name.to_string()),
                    None => warn!(
                        "Cluster {} names project index {} but only {} projects are in use; skipping it",
                        token,
                        parsed.project_index,
                        projects.len()
                    ),
                }
            }

            let layout: ClusterLayout = projects.iter().cloned().zip(buckets).collect();
            debug!("Planned clusters across {} projects: {:?}", projects.len(), layout);
            Ok(layout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_single_project_is_identity() {
        let layout = plan(&strings(&["a", "b"]), &strings(&["proj-z"])).unwrap();
        assert_eq!(layout.len(), 1);
        assert_eq!(layout["proj-z"], strings(&["a", "b"]));
    }

    #[test]
    fn test_single_project_skips_format_checks() {
        let tokens = strings(&["a-b-c", "foo-x", "plain", "", "x-7"]);
        let layout = plan(&tokens, &strings(&["only"])).unwrap();
        assert_eq!(layout["only"], tokens);
    }

    #[test]
    fn test_multi_project_partition() {
        let layout = plan(
            &strings(&["a-0", "b-1", "c-0"]),
            &strings(&["proj-x", "proj-y"]),
        )
        .unwrap();
        assert_eq!(layout["proj-x"], strings(&["a", "c"]));
        assert_eq!(layout["proj-y"], strings(&["b"]));
    }

    #[test]
    fn test_multi_project_preserves_relative_order() {
        let layout = plan(
            &strings(&["z-1", "y-0", "x-1", "w-2", "v-0", "u-1"]),
            &strings(&["p0", "p1", "p2"]),
        )
        .unwrap();
        assert_eq!(layout["p0"], strings(&["y", "v"]));
        assert_eq!(layout["p1"], strings(&["z", "x", "u"]));
        assert_eq!(layout["p2"], strings(&["w"]));
    }

    #[test]
    fn test_project_without_clusters_gets_empty_list() {
        let layout = plan(&strings(&["a-0"]), &strings(&["p0", "p1"])).unwrap();
        assert_eq!(layout["p1"], Vec::<String>::new());
    }

    #[test]
    fn test_missing_hyphen_is_format_error() {
        let result = plan(&strings(&["a-0", "foo"]), &strings(&["p0", "p1"]));
        assert_eq!(
            result,
            Err(TopologyError::MissingProjectIndex("foo".to_string()))
        );
    }

    #[test]
    fn test_extra_hyphen_is_format_error() {
        let result = plan(&strings(&["a-b-c"]), &strings(&["p0", "p1"]));
        assert_eq!(
            result,
            Err(TopologyError::MissingProjectIndex("a-b-c".to_string()))
        );
    }

    #[test]
    fn test_non_numeric_index_is_format_error() {
        let result = plan(&strings(&["foo-x"]), &strings(&["p0", "p1"]));
        assert!(matches!(
            result,
            Err(TopologyError::InvalidProjectIndex { ref token, .. }) if token == "foo-x"
        ));
    }

    #[test]
    fn test_out_of_range_index_is_dropped() {
        let layout = plan(&strings(&["a-0", "b-5", "c-1"]), &strings(&["p0", "p1"])).unwrap();
        assert_eq!(layout["p0"], strings(&["a"]));
        assert_eq!(layout["p1"], strings(&["c"]));
        let total: usize = layout.values().map(Vec::len).sum();
        assert_eq!(total, 2);
    }

    #[test]
    fn test_zero_projects_rejected() {
        assert_eq!(
            plan(&strings(&["a-0"]), &[]),
            Err(TopologyError::NoProjects)
        );
    }

    #[test]
    fn test_plan_is_deterministic() {
        let clusters = strings(&["a-0", "b-1", "c-0", "d-2"]);
        let projects = strings(&["p-c", "p-a", "p-b"]);
        let first = plan(&clusters, &projects).unwrap();
        for _ in 0..10 {
            assert_eq!(plan(&clusters, &projects).unwrap(), first);
        }
    }

    #[test]
    fn test_parse_cluster_token() {
        assert_eq!(
            parse_cluster_token("cluster-12").unwrap(),
            ClusterToken {
                name: "cluster",
                project_index: 12
            }
        );
        assert!(parse_cluster_token("cluster-").is_err());
        assert!(parse_cluster_token("cluster").is_err());
    }
}
