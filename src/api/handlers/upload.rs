use axum::extract::{Multipart, State};
use axum::Json;
use std::sync::Arc;

use crate::api::response::{ApiError, JSend};
use crate::context::Context;
use crate::io::ByteFile;
use crate::uploaded_file::FileData;
use crate::AppState;

/// Store the multipart `file` field in the cache storage.
///
/// Responds with the cached file's serialized data, which clients submit
/// back as trusted attachment state.
pub async fn upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<JSend<FileData>>, ApiError> {
    let mut file: Option<ByteFile> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid multipart data: {e}")))?
    {
        if field.name() != Some("file") {
            // Ignore unknown fields
            continue;
        }

        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field.content_type().map(|s| s.to_string());
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read file: {e}")))?;

        if data.len() as u64 > state.config.max_upload_size {
            return Err(ApiError::payload_too_large(format!(
                "File exceeds maximum upload size of {} bytes",
                state.config.max_upload_size
            )));
        }

        let mut upload = ByteFile::new(data);
        if let Some(name) = file_name {
            upload = upload.with_filename(name);
        }
        if let Some(content_type) = content_type {
            upload = upload.with_content_type(content_type);
        }
        file = Some(upload);
    }

    let file = file.ok_or_else(|| ApiError::bad_request("file field is required"))?;

    let context = Context::new("upload").with("phase", "cache");
    let cached = state.cache.upload(&file, &context).await?;

    tracing::debug!(file_id = %cached.id(), "Cached direct upload");
    Ok(JSend::success(cached.into_data()))
}
