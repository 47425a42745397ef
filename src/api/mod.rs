/// REST API server for the unified inbox
///
/// This module provides:
/// - REST endpoints for listing conversations and messages
/// - Manual sync triggering
/// - JSON request/response format
pub mod handlers;
pub mod models;
pub mod server;

pub use handlers::AppState;
pub use models::ErrorResponse;
pub use server::{ApiConfig, ApiServer};
