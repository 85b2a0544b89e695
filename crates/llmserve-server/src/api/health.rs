//! Liveness endpoint

/// Always `OK`; never touches the session.
pub async fn health() -> &'static str {
    "OK"
}
