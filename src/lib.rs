//! # gce-deployer
//!
//! Brings up GCE test clusters on projects leased from a Boskos resource
//! broker, and tears them down again.
//!
//! - [`config`]: deployer configuration and flag validation
//! - [`boskos`]: Boskos client, leases and heartbeats
//! - [`topology`]: partitioning cluster names across projects
//! - [`deployer`]: once-only init plus the up and down sequences
//! - [`gce`]: gcloud and cluster-script operations
//! - [`exec`]: running external commands

pub mod boskos;
pub mod cli;
pub mod config;
pub mod deployer;
pub mod exec;
pub mod gce;
pub mod topology;
