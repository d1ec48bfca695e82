//! rollprobe - does a rolling restart drop requests?
//!
//! - [`harness`]: request workers, deployment driver, and scenario runs
//! - [`platform`]: Kubernetes provisioning and rollout restarts
//! - [`service`]: the probed HTTP service and its staged shutdown

pub mod harness;
pub mod platform;
pub mod service;
