//! # throttling_app
//!
//! Load simulator and shared utilities for running the throttling provider

pub mod config_loader;
pub mod shutdown_handler;
pub mod simulation;
pub mod tracing_setup;
