pub mod config_builder;
pub mod daemon_harness;
pub mod marker_files;
pub mod ports;
pub mod wait_utils;
