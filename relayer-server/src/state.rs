//! Application state shared across all request handlers.

use relayer_core::relayer::Relayer;

/// State shared by the telemetry handlers.
///
/// This is cloneable and cheap to pass around (the relayer is a shared handle).
#[derive(Clone)]
pub struct AppState {
    pub relayer: Relayer,
}

impl AppState {
    pub fn new(relayer: Relayer) -> Self {
        Self { relayer }
    }
}
