//! HTTP API layer for the room service.
//!
//! - **Endpoints**: groups, rooms and the countdown under `/api/rest/v1`
//! - **Extractors**: the authenticated request context and badge parsing
//! - **Middleware**: request ids, panic recovery, authentication, CORS, deadlines
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod app;
pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use app::app;
pub use endpoints::router;
pub use middleware::AppState;
