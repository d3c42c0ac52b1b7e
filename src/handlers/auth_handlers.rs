//! Login and identity endpoints.

use crate::{errors::AppError, services::access_gate::Identity, state::AppState};
use axum::{Extension, Json, extract::State};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub username: String,
}

/// POST `/api/login`: exchange credentials for a bearer token.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AppError> {
    let token = state.gate.login(&req.username, &req.password)?;
    Ok(Json(LoginResponse { token }))
}

/// GET `/api/user`: the identity the access gate resolved for this request.
pub async fn user_info(Extension(identity): Extension<Identity>) -> Json<UserInfo> {
    Json(UserInfo {
        username: identity.username,
    })
}
