use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use certflow_core::queue::Publisher;

use crate::error::ServiceError;
use crate::manager::StateManager;
use crate::storage::{Certificate, User};

type AppState<P> = State<Arc<StateManager<P>>>;

#[derive(Debug, Deserialize)]
pub struct AddUserRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct AddCertificateRequest {
    pub user_uuid: String,
    pub private_key: String,
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct CertificateQuery {
    pub user_uuid: String,
}

#[derive(Debug, Deserialize)]
pub struct SetActiveRequest {
    pub uuid: String,
    pub user_uuid: String,
    pub active: bool,
}

impl ServiceError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFoundOrInactive(_) => StatusCode::NOT_FOUND,
            Self::Duplicate(_) | Self::Integrity(_) => StatusCode::CONFLICT,
            Self::Transaction(_) | Self::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Delivery(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(kind = self.kind(), error = %self, "Request failed");
        }
        let body = json!({ "error": self.to_string(), "kind": self.kind() });
        (status, Json(body)).into_response()
    }
}

fn bad_json(rejection: &JsonRejection) -> ServiceError {
    ServiceError::Validation(rejection.body_text())
}

fn bad_query(rejection: &QueryRejection) -> ServiceError {
    ServiceError::Validation(rejection.body_text())
}

/// `POST /user`
pub async fn add_user<P: Publisher>(
    State(manager): AppState<P>,
    payload: Result<Json<AddUserRequest>, JsonRejection>,
) -> Result<Json<User>, ServiceError> {
    let Json(req) = payload.map_err(|e| bad_json(&e))?;
    let user = manager.add_user(&req.name, &req.email, &req.password).await?;
    Ok(Json(user))
}

/// `GET /user?uuid=`
pub async fn get_user<P: Publisher>(
    State(manager): AppState<P>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<User>, ServiceError> {
    let Query(q) = query.map_err(|e| bad_query(&e))?;
    Ok(Json(manager.get_user(&q.uuid).await?))
}

/// `DELETE /user?uuid=`
pub async fn deactivate_user<P: Publisher>(
    State(manager): AppState<P>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let Query(q) = query.map_err(|e| bad_query(&e))?;
    manager.deactivate_user(&q.uuid).await?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /cert`
pub async fn add_certificate<P: Publisher>(
    State(manager): AppState<P>,
    payload: Result<Json<AddCertificateRequest>, JsonRejection>,
) -> Result<Json<Certificate>, ServiceError> {
    let Json(req) = payload.map_err(|e| bad_json(&e))?;
    let cert = manager
        .add_certificate(&req.user_uuid, &req.private_key, &req.body)
        .await?;
    Ok(Json(cert))
}

/// `GET /cert?user_uuid=`
pub async fn list_certificates<P: Publisher>(
    State(manager): AppState<P>,
    query: Result<Query<CertificateQuery>, QueryRejection>,
) -> Result<Json<Vec<Certificate>>, ServiceError> {
    let Query(q) = query.map_err(|e| bad_query(&e))?;
    Ok(Json(manager.list_active_certificates(&q.user_uuid).await?))
}

/// `PATCH /cert`
pub async fn set_certificate_active<P: Publisher>(
    State(manager): AppState<P>,
    payload: Result<Json<SetActiveRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let Json(req) = payload.map_err(|e| bad_json(&e))?;
    let result = manager
        .set_certificate_active(&req.uuid, &req.user_uuid, req.active)
        .await?;
    Ok(Json(json!({ "success": true, "changed": result.changed })))
}

/// `GET /health`
pub async fn health<P: Publisher>(State(manager): AppState<P>) -> Response {
    match manager.db().ping().await {
        Ok(()) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => ServiceError::from(e).into_response(),
    }
}
