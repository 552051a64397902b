//! `/health` endpoint body.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving.
    pub status: &'static str,
    pub uptime_secs: u64,
    /// Live identities in the registry.
    pub connections: usize,
    /// Name of the active completion source.
    pub provider: String,
}

pub fn health_check(start_time: Instant, connections: usize, provider: &str) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        connections,
        provider: provider.to_owned(),
    }
}
