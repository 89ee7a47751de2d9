//! Raw transport to the dispatch backend.

use async_trait::async_trait;
use crate::error::ApiError;

/// Abstraction for request/response I/O against the dispatch backend.
///
/// # Implementations
///
/// - **Production**: an HTTP client issuing `GET {base_url}{path}`
/// - **Simulation**: `SimTransport`, serving a scripted fleet with fault injection
///
/// # Request Flow
///
/// ```text
/// Console                  Transport                  Backend
///   |                          |                          |
///   |-- get("/vehicles") ----->|                          |
///   |                          |-- [latency/faults] ----->|
///   |<------ JSON bytes -------|<-------------------------|
/// ```
#[async_trait]
pub trait JsonTransport: Send + Sync + 'static {
    /// Issues a GET for `path` and returns the response body.
    ///
    /// # Returns
    /// * `Ok(bytes)` - A 2xx response body
    /// * `Err(ApiError::Status)` - Non-success status code
    /// * `Err(ApiError::Transport)` - The request never completed
    async fn get(&self, path: &str) -> Result<Vec<u8>, ApiError>;
}
