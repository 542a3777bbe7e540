//! Axum HTTP/WS API for reel generation.
//!
//! This crate provides:
//! - Job submission, status, listing and cancellation
//! - Streamed delivery of finished videos and thumbnails
//! - WebSocket push of job progress
//! - Rate limiting, security headers and Prometheus metrics

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod ws;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
