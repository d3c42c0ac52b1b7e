//! Bearer-token gate for the `/api` routes.
//!
//! Rejected requests never reach their handler. Accepted requests carry the
//! resolved [`Identity`] in their extensions for handlers to extract with
//! `Extension<Identity>`.

use crate::{errors::AppError, services::access_gate::AccessGate};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

pub async fn require_bearer(
    State(gate): State<AccessGate>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let credential = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let identity = gate.authenticate(credential)?;
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}
