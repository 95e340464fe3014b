//! Core business logic for the room service.
//!
//! Groups and rooms, the attendee registry and mail clients they depend on,
//! caller authentication and the booking countdown.

pub mod services;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use services::*;
