use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::AppState;

/// Room for the multipart framing around the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let upload_limit = upload_body_limit(state.config.max_upload_size);

    Router::new()
        // Direct upload to the cache storage
        .route(
            "/upload",
            post(handlers::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        // Downloads from any registered storage
        .route("/files/:storage/*id", get(handlers::download))
        // Internal
        .route("/_internal/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Request body limit for uploads, saturating instead of overflowing.
fn upload_body_limit(max_upload_size: u64) -> usize {
    usize::try_from(max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_state_with_limit;

    #[test]
    fn test_upload_body_limit() {
        assert_eq!(upload_body_limit(1024), 1024 + MULTIPART_OVERHEAD);
        assert_eq!(upload_body_limit(u64::MAX), usize::MAX);
    }

    #[test]
    fn test_router_accepts_unbounded_upload_size() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state_with_limit(&dir, u64::MAX);
        assert!(state.config.validate().is_ok());

        let _router = create_router(state);
    }
}
