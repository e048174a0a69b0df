use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

/// Maximum response body accepted by the client (1MB)
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Path of the command endpoint
pub const COMMAND_PATH: &str = "/";

/// Path of the read-only status endpoint
pub const STATUS_PATH: &str = "/status";

/// Operation requested on the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Stop,
    Restart,
    Status,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Stop => "stop",
            Action::Restart => "restart",
            Action::Status => "status",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Form body of a control-plane command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub action: Action,
    /// Service to act on. Absent or empty means every service.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
}

impl CommandRequest {
    pub fn new(action: Action, service_name: Option<String>) -> Self {
        Self {
            action,
            service_name,
        }
    }

    /// The named service, if the request targets only one
    pub fn target(&self) -> Option<&str> {
        self.service_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn to_form(&self) -> Result<String, ProtocolError> {
        serde_urlencoded::to_string(self).map_err(ProtocolError::EncodeForm)
    }

    pub fn from_form(body: &[u8]) -> Result<Self, ProtocolError> {
        serde_urlencoded::from_bytes(body).map_err(ProtocolError::DecodeForm)
    }
}

/// Response sent from daemon to CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Successful response
    Ok {
        message: Option<String>,
        data: Option<ResponseData>,
    },
    /// Error response
    Error { message: String },
}

impl Response {
    pub fn ok() -> Self {
        Response::Ok {
            message: None,
            data: None,
        }
    }

    /// Create a success response with a message
    pub fn ok_with_message(msg: impl Into<String>) -> Self {
        Response::Ok {
            message: Some(msg.into()),
            data: None,
        }
    }

    /// Create a success response with data
    pub fn ok_with_data(data: ResponseData) -> Self {
        Response::Ok {
            message: None,
            data: Some(data),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Response::Error {
            message: msg.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Response::Ok { .. })
    }
}

/// Data payload in response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseData {
    /// One entry per supervised service, sorted by name
    Services(Vec<ServiceInfo>),
}

/// Information about a supervised service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    /// Virtual hosts routed to this service
    pub server_names: Vec<String>,
    /// Public port the service is served on
    pub port: u16,
    pub instances: Vec<InstanceInfo>,
    /// Rolling restarts that ran to completion
    #[serde(default)]
    pub restarts_completed: u64,
    /// Whether file watching is active
    #[serde(default)]
    pub watching: bool,
}

impl ServiceInfo {
    /// Instances currently eligible for traffic
    pub fn serving_count(&self) -> usize {
        self.instances
            .iter()
            .filter(|i| matches!(i.status.as_str(), "running" | "waiting_stop"))
            .count()
    }
}

/// Information about one instance slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub slot: usize,
    pub port: u16,
    pub pid: Option<u32>,
    pub status: String,
    #[serde(default)]
    pub needs_restart: bool,
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(response).map_err(ProtocolError::Encode)
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, ProtocolError> {
    if bytes.len() > MAX_RESPONSE_SIZE {
        return Err(ProtocolError::TooLarge(bytes.len()));
    }
    serde_json::from_slice(bytes).map_err(ProtocolError::Decode)
}

#[cfg(test)]
mod tests;
