//! WebAPI - operator-facing REST endpoints
//!
//! ## Responsibilities
//!
//! - HTTP API routes over the other components
//! - Session-cookie auth middleware
//! - Response formatting

mod auth;
mod routes;

pub use auth::SessionStore;
pub use routes::create_router;
