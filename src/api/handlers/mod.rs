mod download;
mod upload;

use axum::Json;
use serde_json::json;

use crate::api::response::JSend;

pub use download::download;
pub use upload::upload;

pub async fn health() -> Json<JSend<serde_json::Value>> {
    JSend::success(json!({ "healthy": true }))
}
