use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;

use crate::api::response::ApiError;
use crate::object_store::ObjectStoreError;
use crate::uploaded_file::StorageKey;
use crate::AppState;

/// Serve an object from a registered storage.
/// Route: GET /files/:storage/*id
pub async fn download(
    State(state): State<Arc<AppState>>,
    Path((storage, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let key = StorageKey::from(storage);
    let store = state
        .storages
        .get(&key)
        .map_err(|_| ApiError::not_found(format!("Unknown storage: {key}")))?;

    let data = store.get(&id).await.map_err(|e| match e {
        ObjectStoreError::NotFound(_) | ObjectStoreError::InvalidKey(_) => {
            ApiError::not_found("File not found")
        }
        _ => ApiError::internal(format!("Failed to retrieve file: {e}")),
    })?;

    let content_type = mime_guess::from_path(&id)
        .first()
        .map(|m| m.to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let length = data.len() as u64;

    let mut response = (StatusCode::OK, data).into_response();
    let headers = response.headers_mut();

    headers.insert(
        header::CONTENT_TYPE,
        content_type
            .parse()
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    // Ids are never reused, so stored objects are immutable
    let cache_control = if key.is_cache() {
        "private, no-cache"
    } else {
        "public, max-age=31536000, immutable"
    };
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache_control),
    );

    Ok(response)
}
