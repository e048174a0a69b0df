use super::*;
use crate::protocol::{InstanceInfo, ResponseData, ServiceInfo};
use axum::{
    Form, Json, Router,
    http::StatusCode as AxumStatus,
    routing::{get, post},
};
use tokio::net::TcpListener;

async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn echo_command(Form(command): Form<CommandRequest>) -> Json<Response> {
    Json(Response::ok_with_message(format!(
        "{} {}",
        command.action,
        command.target().unwrap_or("*")
    )))
}

#[tokio::test]
async fn command_is_posted_as_form() {
    let addr = serve(Router::new().route("/", post(echo_command))).await;
    let client = Client::new(addr);

    let response = client.restart(Some("web")).await.unwrap();
    assert_eq!(response, Response::ok_with_message("restart web"));

    let response = client.stop(None).await.unwrap();
    assert_eq!(response, Response::ok_with_message("stop *"));
}

#[tokio::test]
async fn error_status_with_json_body_is_decoded() {
    let router = Router::new().route(
        "/",
        post(|| async { (AxumStatus::NOT_FOUND, Json(Response::error("Service not found: api"))) }),
    );
    let client = Client::new(serve(router).await);

    let response = client.start(Some("api")).await.unwrap();
    assert_eq!(response, Response::error("Service not found: api"));
    assert!(!response.is_ok());
}

#[tokio::test]
async fn error_status_with_plain_body_is_reported() {
    let router = Router::new().route("/", post(|| async { (AxumStatus::BAD_GATEWAY, "upstream down") }));
    let client = Client::new(serve(router).await);

    let err = client.status(None).await.unwrap_err();
    match err {
        ClientError::Status { status, body } => {
            assert_eq!(status, 502);
            assert_eq!(body, "upstream down");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn snapshot_reads_status_endpoint() {
    let router = Router::new().route(
        "/status",
        get(|| async {
            Json(Response::ok_with_data(ResponseData::Services(vec![ServiceInfo {
                name: "web".to_string(),
                server_names: vec!["web.local".to_string()],
                port: 8080,
                instances: vec![InstanceInfo {
                    slot: 0,
                    port: 9000,
                    pid: Some(7),
                    status: "running".to_string(),
                    needs_restart: false,
                }],
                restarts_completed: 2,
                watching: true,
            }])))
        }),
    );
    let client = Client::new(serve(router).await);

    let Response::Ok {
        data: Some(ResponseData::Services(services)),
        ..
    } = client.snapshot().await.unwrap()
    else {
        panic!("expected services");
    };
    assert_eq!(services[0].restarts_completed, 2);
    assert_eq!(services[0].instances[0].pid, Some(7));
}

#[tokio::test]
async fn unreachable_daemon_is_a_connect_error() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    assert!(!Client::is_daemon_running(addr).await);
    let err = Client::new(addr).start(None).await.unwrap_err();
    assert!(matches!(err, ClientError::Connect { .. }));
}

#[tokio::test]
async fn running_daemon_is_detected() {
    let addr = serve(Router::new().route("/", post(echo_command))).await;
    assert!(Client::is_daemon_running(addr).await);
}
