//! Request id handling.
//!
//! The request id is accepted from the `X-Request-Id` header when it has the
//! expected shape, generated otherwise, and kept in a task-local for the
//! lifetime of the request so error bodies and downstream calls can use it.

use std::future::Future;

use rand::Rng;

/// Header carrying the request id, inbound and outbound.
pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

tokio::task_local! {
    static REQUEST_ID: String;
}

/// Whether an inbound id may be reused: exactly eight lowercase hex digits.
#[must_use]
pub fn is_valid(candidate: &str) -> bool {
    candidate.len() == 8
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Generate a fresh request id.
#[must_use]
pub fn generate() -> String {
    let value: u32 = rand::thread_rng().r#gen();
    format!("{value:08x}")
}

/// Reuse the inbound id if valid, otherwise generate one.
#[must_use]
pub fn accept_or_generate(inbound: Option<&str>) -> String {
    match inbound {
        Some(id) if is_valid(id) => id.to_string(),
        _ => generate(),
    }
}

/// Run `fut` with `id` as the current request id.
pub async fn scope<F>(id: String, fut: F) -> F::Output
where
    F: Future,
{
    REQUEST_ID.scope(id, fut).await
}

/// The current request id, if called within [`scope`].
#[must_use]
pub fn current() -> Option<String> {
    REQUEST_ID.try_with(Clone::clone).ok()
}
