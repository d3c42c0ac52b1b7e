//! Defines routes for all bucket and object operations.
//!
//! ## Structure
//! - **Public endpoints**
//!   - `GET    /healthz`, `GET /readyz`: probes
//!   - `POST   /api/login`: exchange username/password for a bearer token
//!   - `GET    /oss/{bucket}/{*key}`: anonymous object download
//!
//! - **Bearer-protected endpoints** (`Authorization: Bearer <token>`)
//!   - `GET    /api/user`: identity behind the token
//!   - `GET    /api/oss/buckets`: list buckets
//!   - `GET    /api/oss/{bucket}`: list objects (supports prefix, marker, max-keys)
//!   - `PUT    /api/oss/{bucket}`: create bucket
//!   - `DELETE /api/oss/{bucket}`: delete bucket
//!   - `PUT    /api/oss/{bucket}/{*key}`: upload, or copy with `x-amz-copy-source-*`
//!   - `GET    /api/oss/{bucket}/{*key}`: public URL for the object
//!   - `HEAD   /api/oss/{bucket}/{*key}`: retrieve metadata only
//!   - `DELETE /api/oss/{bucket}/{*key}`: delete object
//!
//! The wildcard `*key` allows nested keys like `photos/2025/img.jpg`.

use crate::{
    handlers::{
        auth_handlers::{login, user_info},
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_bucket, delete_bucket, delete_object, get_object, head_object, list_buckets,
            list_objects, object_url, put_object,
        },
    },
    middleware::auth::require_bearer,
    state::AppState,
};
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Build the full router with the access gate layered over `/api` routes.
pub fn routes(state: AppState) -> Router {
    let protected = Router::new()
        .route("/user", get(user_info))
        .route("/oss/buckets", get(list_buckets))
        .route(
            "/oss/{bucket}",
            get(list_objects).put(create_bucket).delete(delete_bucket),
        )
        .route(
            "/oss/{bucket}/{*key}",
            get(object_url)
                .put(put_object)
                .head(head_object)
                .delete(delete_object),
        )
        .route_layer(middleware::from_fn_with_state(
            state.gate.clone(),
            require_bearer,
        ));

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/login", post(login))
        .route("/oss/{bucket}/{*key}", get(get_object))
        .nest("/api", protected)
        .with_state(state)
}
