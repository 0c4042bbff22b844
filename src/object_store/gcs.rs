use std::path::{Path, PathBuf};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use tokio::sync::RwLock;

use super::{ObjectStore, ObjectStoreError, UrlOptions};
use crate::uploaded_file::FileMetadata;

const API_BASE: &str = "https://storage.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";
/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    bucket: String,
    client: Client,
    source: TokenSource,
    token: RwLock<Option<AccessToken>>,
}

enum TokenSource {
    ServiceAccount(PathBuf),
    MetadataServer,
}

#[derive(Clone)]
struct AccessToken {
    value: String,
    expires_at: i64,
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

impl GcsStore {
    /// Connects with a service-account key file, or the metadata server when `None`.
    pub async fn new(bucket: &str, credentials_file: Option<&str>) -> Result<Self, anyhow::Error> {
        let source = match credentials_file {
            Some(path) => TokenSource::ServiceAccount(PathBuf::from(path)),
            None => TokenSource::MetadataServer,
        };
        let store = Self {
            bucket: bucket.to_string(),
            client: Client::builder().build()?,
            source,
            token: RwLock::new(None),
        };

        // Fail at startup rather than on the first upload.
        store.fetch_token().await?;
        Ok(store)
    }

    async fn bearer(&self) -> Result<String, ObjectStoreError> {
        let now = chrono::Utc::now().timestamp();
        if let Some(token) = self.token.read().await.as_ref() {
            if token.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }
        self.fetch_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("GCS token refresh failed: {e}")))
    }

    async fn fetch_token(&self) -> Result<String, anyhow::Error> {
        let response = match &self.source {
            TokenSource::ServiceAccount(path) => self.exchange_service_account(path).await?,
            TokenSource::MetadataServer => {
                self.client
                    .get(METADATA_TOKEN_URL)
                    .header("Metadata-Flavor", "Google")
                    .send()
                    .await?
                    .error_for_status()?
                    .json::<TokenResponse>()
                    .await?
            }
        };

        let token = AccessToken {
            value: response.access_token,
            expires_at: chrono::Utc::now().timestamp() + response.expires_in,
        };
        let value = token.value.clone();
        *self.token.write().await = Some(token);
        tracing::debug!(bucket = %self.bucket, "Refreshed GCS access token");
        Ok(value)
    }

    async fn exchange_service_account(
        &self,
        path: &Path,
    ) -> Result<TokenResponse, anyhow::Error> {
        let raw = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;
        let assertion = signed_jwt(&key)?;

        let response = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response)
    }


    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response, ObjectStoreError> {
        let token = self.bearer().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }
}

/// Map a non-success response to an error; 404 becomes `NotFound`.
async fn check(response: Response, key: &str, action: &str) -> Result<Response, ObjectStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(ObjectStoreError::NotFound(key.to_string()));
    }
    let body = response.text().await.unwrap_or_default();
    Err(ObjectStoreError::Backend(format!(
        "GCS {action} failed ({status}): {body}"
    )))
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: &FileMetadata,
    ) -> Result<(), ObjectStoreError> {
        let url = upload_url(&self.bucket, key)?;
        let content_type = metadata
            .mime_type
            .as_deref()
            .unwrap_or("application/octet-stream");
        let request = self
            .client
            .post(url)
            .header("Content-Type", content_type)
            .body(data);
        check(self.send(request).await?, key, "upload").await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let request = self
            .client
            .get(object_url(&self.bucket, key)?)
            .query(&[("alt", "media")]);
        let response = check(self.send(request).await?, key, "download").await?;
        response
            .bytes()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let request = self.client.delete(object_url(&self.bucket, key)?);
        check(self.send(request).await?, key, "delete").await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let request = self.client.get(object_url(&self.bucket, key)?);
        match check(self.send(request).await?, key, "metadata lookup").await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Public object URL; assumes the bucket grants read access.
    fn url(&self, key: &str, options: &UrlOptions) -> String {
        public_url(&self.bucket, key, options)
    }
}

/// JSON API metadata URL. The whole object name is one percent-encoded path segment.
fn object_url(bucket: &str, key: &str) -> Result<Url, ObjectStoreError> {
    let mut url = Url::parse(API_BASE).map_err(|e| ObjectStoreError::Backend(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| ObjectStoreError::Backend(format!("{API_BASE} cannot take a path")))?
        .pop_if_empty()
        .extend(["storage", "v1", "b", bucket, "o", key]);
    Ok(url)
}

/// Media upload URL with the object name form-encoded in the query.
fn upload_url(bucket: &str, key: &str) -> Result<Url, ObjectStoreError> {
    Url::parse_with_params(
        &format!("{API_BASE}/upload/storage/v1/b/{bucket}/o"),
        &[("uploadType", "media"), ("name", key)],
    )
    .map_err(|e| ObjectStoreError::Backend(e.to_string()))
}

/// `host` replaces the storage.googleapis.com bucket URL, e.g. for a CDN in front of the bucket.
fn public_url(bucket: &str, key: &str, options: &UrlOptions) -> String {
    match options.get("host").and_then(|h| h.as_str()) {
        Some(host) => format!("{}/{key}", host.trim_end_matches('/')),
        None => format!("{API_BASE}/{bucket}/{key}"),
    }
}

fn signed_jwt(key: &ServiceAccountKey) -> Result<String, anyhow::Error> {
    let engine = &base64::engine::general_purpose::URL_SAFE_NO_PAD;
    let issued_at = chrono::Utc::now().timestamp();

    let header = serde_json::json!({ "alg": "RS256", "typ": "JWT" });
    let claims = serde_json::json!({
        "iss": key.client_email,
        "scope": SCOPE,
        "aud": key.token_uri,
        "iat": issued_at,
        "exp": issued_at + 3600,
    });
    let signing_input = format!(
        "{}.{}",
        engine.encode(serde_json::to_vec(&header)?),
        engine.encode(serde_json::to_vec(&claims)?)
    );

    let signature = rs256(signing_input.as_bytes(), &key.private_key)?;
    Ok(format!("{signing_input}.{}", engine.encode(signature)))
}

fn rs256(message: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::engine::general_purpose::STANDARD.decode(der_b64.trim())?;

    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Invalid RSA key in service account file: {e}"))?;
    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            message,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("RS256 signing failed: {e}"))?;
    Ok(signature)
}
