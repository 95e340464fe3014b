//! Common utilities and shared types for the room service.
//!
//! - **Configuration**: strict, validated settings via [`Config`]
//! - **Error handling**: the error taxonomy via [`AppError`] and [`AppResult`]
//! - **Caller identity**: [`Caller`] and the per-request [`RequestContext`]
//! - **Request ids**: the `X-Request-Id` scope in [`request_id`]
//! - **Circuit breaking**: [`CircuitBreaker`] for downstream calls
//! - **ID Generation**: UUIDs and invite codes via [`IdGenerator`]
//!
//! # Example
//!
//! ```no_run
//! use roomsvc_common::{AppResult, Config, IdGenerator};
//!
//! fn example() -> AppResult<()> {
//!     let config = Config::load()?;
//!     let id_gen = IdGenerator::new();
//!     println!("{} issues {}", config.service.name, id_gen.generate());
//!     Ok(())
//! }
//! ```

pub mod caller;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod id;
pub mod request_id;

pub use caller::{Caller, CallerKind, Credentials, Identity, RequestContext};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use config::Config;
pub use error::{AppError, AppResult, Details, ErrorBody};
pub use id::{IdGenerator, is_valid_uuid};
