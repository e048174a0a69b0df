//! HTTP reverse proxy in front of the instances.
//!
//! Each listener owns a `VirtualHosts` table. A request is matched on its
//! `Host`, handed to the owning supervisor to pick an instance, and
//! forwarded there with the body streamed through.

use axum::{
    Router,
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::errors::DaemonError;
use crate::registry::ServiceRegistry;
use crate::supervisor::Supervisor;

type ProxyClient = HyperClient<HttpConnector, Body>;

const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single connection and must not be forwarded
const HOP_BY_HOP: [HeaderName; 6] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

/// Lower-case a `Host` value and strip any port suffix
pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let host = if let Some(rest) = raw.strip_prefix('[') {
        // [v6]:port
        match rest.split_once(']') {
            Some((addr, _)) => addr,
            None => rest,
        }
    } else {
        match raw.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => name,
            _ => raw,
        }
    };
    host.to_ascii_lowercase()
}

/// Host name to supervisor table for one listener
#[derive(Debug, Clone, Default)]
pub struct VirtualHosts {
    hosts: HashMap<String, Arc<Supervisor>>,
}

impl VirtualHosts {
    /// Register every server name of `supervisor`. Names already claimed by
    /// another service keep their first owner.
    pub fn add(&mut self, supervisor: &Arc<Supervisor>) {
        for name in &supervisor.definition().server_names {
            match self.hosts.get(name) {
                Some(existing) => warn!(
                    "Host {} already routed to {}, ignoring it for {}",
                    name,
                    existing.name(),
                    supervisor.name()
                ),
                None => {
                    self.hosts.insert(name.clone(), Arc::clone(supervisor));
                }
            }
        }
    }

    pub fn lookup(&self, host: &str) -> Option<&Arc<Supervisor>> {
        self.hosts.get(&normalize_host(host))
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// Group services into one virtual-host table per listen address
pub fn listeners(registry: &ServiceRegistry, bind_ip: IpAddr) -> BTreeMap<SocketAddr, VirtualHosts> {
    let mut listeners: BTreeMap<SocketAddr, VirtualHosts> = BTreeMap::new();
    for supervisor in registry.supervisors() {
        let addr = SocketAddr::new(bind_ip, supervisor.definition().port);
        listeners.entry(addr).or_default().add(supervisor);
    }
    listeners
}

#[derive(Clone)]
struct ProxyState {
    hosts: Arc<VirtualHosts>,
    client: ProxyClient,
}

/// Router that proxies every request according to `hosts`
pub fn router(hosts: VirtualHosts) -> Router {
    let client = HyperClient::builder(TokioExecutor::new()).build_http();
    Router::new().fallback(forward).with_state(ProxyState {
        hosts: Arc::new(hosts),
        client,
    })
}

fn request_host(req: &Request) -> Option<String> {
    req.headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

async fn forward(State(state): State<ProxyState>, mut req: Request) -> Response {
    let Some(host) = request_host(&req) else {
        return (StatusCode::NOT_FOUND, "Unknown host").into_response();
    };
    let Some(supervisor) = state.hosts.lookup(&host) else {
        debug!("No service for host {}", host);
        return (StatusCode::NOT_FOUND, "Unknown host").into_response();
    };

    let selected = match supervisor.select_instance() {
        Ok(selected) => selected,
        Err(e @ (DaemonError::NoInstance(_) | DaemonError::NoInstanceAvailable(_))) => {
            warn!("{}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "No available instance").into_response();
        }
        Err(e) => {
            warn!("{}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    let path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let uri: Uri = match format!("http://{}{}", selected.authority, path).parse() {
        Ok(uri) => uri,
        Err(e) => {
            warn!("Cannot build upstream URI for {}: {}", selected.authority, e);
            return (StatusCode::BAD_GATEWAY, "Bad gateway").into_response();
        }
    };
    *req.uri_mut() = uri;

    let client_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    rewrite_headers(req.headers_mut(), &host, &selected.authority, client_ip);

    debug!(
        "{} {} -> {} instance {} ({})",
        req.method(),
        path,
        supervisor.name(),
        selected.slot,
        selected.authority
    );

    match state.client.request(req).await {
        Ok(response) => response.into_response(),
        Err(e) => {
            warn!(
                "Upstream {} for {} failed: {}",
                selected.authority,
                supervisor.name(),
                e
            );
            (StatusCode::BAD_GATEWAY, "Bad gateway").into_response()
        }
    }
}

/// Point the request at the backend while keeping the original host visible
fn rewrite_headers(headers: &mut HeaderMap, original_host: &str, authority: &str, client_ip: Option<IpAddr>) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }

    if let Ok(value) = HeaderValue::from_str(original_host) {
        headers.insert(X_FORWARDED_HOST, value);
    }
    if let Ok(value) = HeaderValue::from_str(authority) {
        headers.insert(header::HOST, value);
    }

    if let Some(ip) = client_ip {
        let forwarded_for = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{}, {}", prior, ip),
            None => ip.to_string(),
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
            headers.insert(X_FORWARDED_FOR, value);
        }
    }
}
