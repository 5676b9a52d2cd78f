//! # Interop Cluster
//!
//! An in-process implementation of the `interop_core` scheduler boundary.
//! [`LocalCluster`] admits tasks against a fixed cpu, gpu and custom
//! resource capacity, runs them on a tokio runtime, re-runs crashed workers
//! and serves by-name plugin lookups for late-bound components.

pub mod cluster;
pub mod config;

pub use cluster::LocalCluster;
pub use config::ClusterConfig;
