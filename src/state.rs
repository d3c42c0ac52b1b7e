//! Shared state handed to every handler.

use crate::services::{access_gate::AccessGate, storage::ObjectStorage};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn ObjectStorage>,
    pub gate: AccessGate,
    /// Base URL prefixed onto public object links, without a trailing slash.
    pub public_url: Arc<str>,
}

impl AppState {
    pub fn new(storage: Arc<dyn ObjectStorage>, gate: AccessGate, public_url: &str) -> Self {
        Self {
            storage,
            gate,
            public_url: Arc::from(public_url.trim_end_matches('/')),
        }
    }
}
