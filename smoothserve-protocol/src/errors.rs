use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::Action;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("failed to encode form: {0}")]
    EncodeForm(#[source] serde_urlencoded::ser::Error),

    #[error("failed to decode form: {0}")]
    DecodeForm(#[source] serde_urlencoded::de::Error),

    #[error("message of {0} bytes exceeds the maximum size")]
    TooLarge(usize),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to daemon at {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: hyper_util::client::legacy::Error,
    },

    #[error("request {action} timed out")]
    Timeout { action: Action },

    #[error("failed to build request: {0}")]
    Request(#[source] hyper::http::Error),

    #[error("failed to receive response: {0}")]
    Receive(#[source] hyper::Error),

    #[error("daemon answered with HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
