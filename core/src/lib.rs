//! Jobwarden engine: desired-state reconciliation of remote compute objects.
//!
//! Each managed kind (cluster, job, run, block, workspace item, secret
//! scope) is a [`types::Resource`] with an author-owned spec and an
//! engine-owned status. Controllers repeatedly compare the two against the
//! remote service and converge them, tolerating redelivery, partial failure
//! and long-running remote operations.

pub mod controller;
pub mod convergence;
pub mod events;
pub mod finalizer;
pub mod fingerprint;
pub mod lifecycle;
pub mod ownership;
pub mod reconcile;
pub mod remote;
pub mod settings;
pub mod stats;
pub mod store;
pub mod types;
