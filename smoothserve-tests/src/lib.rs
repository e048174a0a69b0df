//! Test utilities for the smoothserve workspace
//!
//! This crate provides helpers for driving real supervisors: scripted
//! backends that record each launch, service definition builders, free
//! port discovery and polling helpers for instance state.

pub mod helpers;

pub use helpers::config_builder::{TestConfigBuilder, TestServiceBuilder};
pub use helpers::daemon_harness::TestDaemonHarness;
pub use helpers::marker_files::MarkerFileHelper;
pub use helpers::ports::{free_port, free_port_block};
pub use helpers::wait_utils::{wait_for_instances, wait_for_restarts, wait_until, WaitError};
