//! Remote hosting of uploaded source images

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::AssetConfig;
use crate::error::{Error, Result};

/// Publishes a local file and returns a durable URL for it.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn upload(&self, local_path: &Path) -> Result<String>;
}

/// Signed uploads to a Cloudinary-compatible image API.
pub struct CloudinaryStore {
    client: reqwest::Client,
    upload_url: String,
    api_key: String,
    api_secret: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    secure_url: String,
}

impl CloudinaryStore {
    pub fn new(config: &AssetConfig, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Upload(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            upload_url: format!(
                "{}/v1_1/{}/image/upload",
                config.api_base.trim_end_matches('/'),
                config.cloud_name
            ),
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
        })
    }
}

/// Hex SHA-256 over the sorted signed parameters followed by the API secret.
pub fn sign_params(params: &[(&str, &str)], api_secret: &str) -> String {
    let mut sorted = params.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let joined = sorted
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(joined.as_bytes());
    hasher.update(api_secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
impl AssetStore for CloudinaryStore {
    async fn upload(&self, local_path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(local_path).await?;
        let file_name = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let timestamp = time::OffsetDateTime::now_utc().unix_timestamp().to_string();
        let signature = sign_params(&[("timestamp", timestamp.as_str())], &self.api_secret);

        let form = reqwest::multipart::Form::new()
            .part("file", reqwest::multipart::Part::bytes(bytes).file_name(file_name))
            .text("api_key", self.api_key.clone())
            .text("timestamp", timestamp)
            .text("signature", signature)
            .text("signature_algorithm", "sha256");

        let response = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::Upload(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Upload(format!("asset host returned {status}: {body}")));
        }

        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|e| Error::Upload(format!("unexpected upload response: {e}")))?;
        info!(path = %local_path.display(), url = %parsed.secure_url, "uploaded image");
        Ok(parsed.secure_url)
    }
}
