//! Control-plane protocol shared by the smoothserve daemon and CLI.
//!
//! Commands travel as `application/x-www-form-urlencoded` POST bodies;
//! replies are JSON-encoded [`protocol::Response`] values.

pub mod client;
pub mod errors;
pub mod protocol;
