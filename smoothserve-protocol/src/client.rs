use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{CONTENT_TYPE, HeaderValue};
use hyper::{Method, Request as HttpRequest, StatusCode};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use tokio::net::TcpStream;
use tracing::debug;

use crate::{
    errors::{ClientError, ProtocolError},
    protocol::{
        Action, COMMAND_PATH, CommandRequest, MAX_RESPONSE_SIZE, Response, STATUS_PATH,
        decode_response,
    },
};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Default time allowed for one request. Stop and restart reply once the
/// daemon has acted, which can take a while for a full stop.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// HTTP client for the daemon's control plane
#[derive(Clone)]
pub struct Client {
    addr: SocketAddr,
    http: HyperClient<HttpConnector, Full<Bytes>>,
    timeout: Duration,
}

impl Client {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            http: HyperClient::builder(TokioExecutor::new()).build_http(),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn start(&self, service: Option<&str>) -> Result<Response> {
        self.send(&CommandRequest::new(Action::Start, service.map(String::from)))
            .await
    }

    pub async fn stop(&self, service: Option<&str>) -> Result<Response> {
        self.send(&CommandRequest::new(Action::Stop, service.map(String::from)))
            .await
    }

    pub async fn restart(&self, service: Option<&str>) -> Result<Response> {
        self.send(&CommandRequest::new(Action::Restart, service.map(String::from)))
            .await
    }

    pub async fn status(&self, service: Option<&str>) -> Result<Response> {
        self.send(&CommandRequest::new(Action::Status, service.map(String::from)))
            .await
    }

    /// Post a command as a form and decode the reply
    pub async fn send(&self, command: &CommandRequest) -> Result<Response> {
        let body = command.to_form()?;
        debug!("Sending {} to {}", body, self.addr);

        let request = HttpRequest::builder()
            .method(Method::POST)
            .uri(self.uri(COMMAND_PATH))
            .header(CONTENT_TYPE, HeaderValue::from_static(FORM_CONTENT_TYPE))
            .body(Full::new(Bytes::from(body)))
            .map_err(ClientError::Request)?;

        self.execute(request, command.action).await
    }

    /// Fetch the snapshot served on the status endpoint
    pub async fn snapshot(&self) -> Result<Response> {
        let request = HttpRequest::builder()
            .method(Method::GET)
            .uri(self.uri(STATUS_PATH))
            .body(Full::new(Bytes::new()))
            .map_err(ClientError::Request)?;

        self.execute(request, Action::Status).await
    }

    fn uri(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn execute(&self, request: HttpRequest<Full<Bytes>>, action: Action) -> Result<Response> {
        let response = tokio::time::timeout(self.timeout, self.http.request(request))
            .await
            .map_err(|_| ClientError::Timeout { action })?
            .map_err(|source| ClientError::Connect {
                addr: self.addr,
                source,
            })?;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout, response.into_body().collect())
            .await
            .map_err(|_| ClientError::Timeout { action })?
            .map_err(ClientError::Receive)?
            .to_bytes();

        if body.len() > MAX_RESPONSE_SIZE {
            return Err(ProtocolError::TooLarge(body.len()).into());
        }

        // Error statuses still carry a JSON `Response::Error` when they come
        // from the control plane itself
        match decode_response(&body) {
            Ok(decoded) => Ok(decoded),
            Err(_) if status != StatusCode::OK => Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if the daemon is running (control port accepts connections)
    pub async fn is_daemon_running(addr: SocketAddr) -> bool {
        matches!(
            tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests;
