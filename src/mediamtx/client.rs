//! HTTP client for the MediaMTX control API.

use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{AppError, Result};

/// Thin wrapper around `reqwest` mapping MediaMTX's `/v3/*` control
/// endpoints. Non-2xx responses are mapped to error kinds by status:
/// 401 → `Unauthorized`, 404 → `NotFound`, 5xx → `Upstream`.
pub struct MediaMtxClient {
    http: reqwest::Client,
    base_url: String,
}

impl MediaMtxClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("building MediaMTX HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .http
            .get(self.url(path))
            .send()
            .await
            .map_err(map_transport_error)?;
        self.decode(resp).await
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        let resp = self
            .http
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .map_err(map_transport_error)?;
        self.decode::<Value>(resp).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(path))
            .send()
            .await
            .map_err(map_transport_error)?;
        map_status(resp.status())?;
        Ok(())
    }

    async fn decode<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        map_status(resp.status())?;
        let bytes = resp.bytes().await.map_err(map_transport_error)?;
        if bytes.is_empty() {
            return serde_json::from_slice(b"null")
                .map_err(|e| AppError::Upstream(format!("decoding empty body: {e}")));
        }
        serde_json::from_slice(&bytes)
            .map_err(|e| AppError::Upstream(format!("decoding MediaMTX response: {e}")))
    }

    pub async fn get_health(&self) -> Result<Value> {
        debug!("polling MediaMTX health endpoint");
        self.get_json("/v3/config/global/get").await
    }

    pub async fn get_global_config(&self) -> Result<Value> {
        self.get_json("/v3/config/global/get").await
    }

    pub async fn edit_global_config(&self, patch: &Value) -> Result<()> {
        self.post_json("/v3/config/global/edit", patch).await
    }

    pub async fn get_paths(&self) -> Result<Value> {
        self.get_json("/v3/paths/list").await
    }

    pub async fn get_path(&self, name: &str) -> Result<Value> {
        self.get_json(&format!("/v3/paths/get/{name}")).await
    }

    pub async fn add_path(&self, name: &str, source: &str) -> Result<()> {
        let body = serde_json::json!({ "source": source });
        self.post_json(&format!("/v3/config/paths/add/{name}"), &body)
            .await
    }

    pub async fn delete_path(&self, name: &str) -> Result<()> {
        self.delete(&format!("/v3/config/paths/delete/{name}")).await
    }

    /// Supplemental: `/v3/config/paths/*` lets the controller attach
    /// record/playback options beyond the generic `add_path` call.
    pub async fn get_path_conf(&self, name: &str) -> Result<Value> {
        self.get_json(&format!("/v3/config/paths/get/{name}")).await
    }

    pub async fn edit_path_conf(&self, name: &str, patch: &Value) -> Result<()> {
        self.post_json(&format!("/v3/config/paths/patch/{name}"), patch)
            .await
    }
}

fn map_status(status: reqwest::StatusCode) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status.as_u16() {
        401 => Err(AppError::Unauthorized),
        404 => Err(AppError::NotFound("mediamtx resource".to_string())),
        500..=599 => Err(AppError::Upstream(format!("mediamtx status {status}"))),
        _ => Err(AppError::Upstream(format!("mediamtx status {status}"))),
    }
}

fn map_transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::Timeout(format!("mediamtx request: {e}"))
    } else {
        AppError::Upstream(format!("mediamtx transport error: {e}"))
    }
}
