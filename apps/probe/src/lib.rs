//! Uppe monitoring probe.
//!
//! Runs the checks a controller assigns to it, each on its own interval, and
//! publishes their results. Checks only run while the probe's own network
//! looks healthy.

pub mod app;
pub mod config;
pub mod controller;
pub mod error;
pub mod healthz;
pub mod metrics;
pub mod monitoring;
pub mod publisher;
