//! Control plane: the HTTP command API the CLI talks to.
//!
//! `POST /` takes a form with `action` and an optional `service_name`;
//! `GET /status` returns the same snapshot as `action=status`.

use axum::{
    Form, Json, Router,
    extract::{State, rejection::FormRejection},
    http::StatusCode,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use smoothserve_protocol::protocol::{
    Action, COMMAND_PATH, CommandRequest, Response, ResponseData, STATUS_PATH,
};

use crate::errors::DaemonError;
use crate::registry::ServiceRegistry;

type Reply = (StatusCode, Json<Response>);

#[derive(Clone)]
struct ControlState {
    registry: Arc<ServiceRegistry>,
    shutdown_tx: mpsc::Sender<()>,
}

/// Build the control-plane router. A global stop sends on `shutdown_tx`
/// once every service has stopped.
pub fn router(registry: Arc<ServiceRegistry>, shutdown_tx: mpsc::Sender<()>) -> Router {
    Router::new()
        .route(COMMAND_PATH, post(handle_command))
        .route(STATUS_PATH, get(handle_status))
        .with_state(ControlState {
            registry,
            shutdown_tx,
        })
}

fn ok(response: Response) -> Reply {
    (StatusCode::OK, Json(response))
}

fn error_reply(e: &DaemonError) -> Reply {
    let status = match e {
        DaemonError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(Response::error(e.to_string())))
}

async fn handle_status(State(state): State<ControlState>) -> Reply {
    match state.registry.statuses(None) {
        Ok(services) => ok(Response::ok_with_data(ResponseData::Services(services))),
        Err(e) => error_reply(&e),
    }
}

async fn handle_command(
    State(state): State<ControlState>,
    form: Result<Form<CommandRequest>, FormRejection>,
) -> Reply {
    let command = match form {
        Ok(Form(command)) => command,
        Err(rejection) => {
            warn!("Rejected control request: {}", rejection);
            return (
                StatusCode::BAD_REQUEST,
                Json(Response::error(rejection.body_text())),
            );
        }
    };

    let target = command.target();
    info!(
        "Control request: {} {}",
        command.action,
        target.unwrap_or("(all services)")
    );

    match command.action {
        Action::Start => match state.registry.start(target).await {
            Ok(names) => ok(Response::ok_with_message(format!("Started {}", names.join(", ")))),
            Err(e) => error_reply(&e),
        },
        Action::Stop => {
            let result = state.registry.stop(target).await;
            if target.is_none() {
                info!("Global stop requested, shutting down");
                if state.shutdown_tx.send(()).await.is_err() {
                    error!("Shutdown channel closed");
                }
            }
            match result {
                Ok(names) => ok(Response::ok_with_message(format!("Stopped {}", names.join(", ")))),
                Err(e) => error_reply(&e),
            }
        }
        Action::Restart => match state.registry.restart(target) {
            Ok(names) => ok(Response::ok_with_message(format!(
                "Rolling restart started for {}",
                names.join(", ")
            ))),
            Err(e) => error_reply(&e),
        },
        Action::Status => match state.registry.statuses(target) {
            Ok(services) => ok(Response::ok_with_data(ResponseData::Services(services))),
            Err(e) => error_reply(&e),
        },
    }
}
