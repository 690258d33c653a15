//! Monitoring and control API.
//!
//! | Route | Method | Answer |
//! |---|---|---|
//! | `/` | GET | `{status, service, id}`; also the readiness probe target |
//! | `/data` | GET | module snapshots, identity, fault profile, counters |
//! | `/byz-behaviors` | GET | misbehaviour profiles that can be set |
//! | `/set-byz-behavior` | POST | `{behavior}`; 400 on an unknown profile |

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

use crate::fault::FaultProfile;
use crate::status::SystemStatus;
use crate::{Resolver, RuntimeError};

/// Value of `service` in the status answer.
pub const SERVICE_NAME: &str = "DistributedSystemBlueprint";

/// Answer of `GET /`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SystemStatus,
    pub service: String,
    pub id: u32,
}

/// Body of `POST /set-byz-behavior` and its answer.
#[derive(Debug, Serialize, Deserialize)]
pub struct BehaviorBody {
    pub behavior: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Routes over `resolver`.
pub fn router(resolver: Resolver) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/data", get(data_handler))
        .route("/byz-behaviors", get(behaviors_handler))
        .route("/set-byz-behavior", post(set_behavior_handler))
        .with_state(resolver)
}

/// Serve the API on `listener` until the task is dropped.
pub async fn serve(resolver: Resolver, listener: TcpListener) -> Result<(), RuntimeError> {
    let addr = listener.local_addr().map_err(RuntimeError::Api)?;
    tracing::info!(node = %resolver.id(), %addr, "monitoring API listening");
    axum::serve(listener, router(resolver))
        .await
        .map_err(RuntimeError::Api)
}

/// Bind `0.0.0.0:{port}` and serve.
pub async fn bind_and_serve(resolver: Resolver, port: u16) -> Result<(), RuntimeError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.map_err(RuntimeError::Api)?;
    serve(resolver, listener).await
}

async fn status_handler(State(resolver): State<Resolver>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: resolver.status(),
        service: SERVICE_NAME.to_string(),
        id: resolver.id().get(),
    })
}

async fn data_handler(State(resolver): State<Resolver>) -> Json<serde_json::Value> {
    Json(resolver.module_data())
}

async fn behaviors_handler() -> Json<&'static [FaultProfile]> {
    Json(FaultProfile::MISBEHAVIOURS)
}

async fn set_behavior_handler(
    State(resolver): State<Resolver>,
    Json(body): Json<BehaviorBody>,
) -> Response {
    match resolver.fault().set_by_name(&body.behavior) {
        Ok(profile) => Json(BehaviorBody {
            behavior: profile.as_str().to_string(),
        })
        .into_response(),
        Err(e) => {
            tracing::warn!("rejected fault profile change: {e}");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}
