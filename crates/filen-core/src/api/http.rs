//! reqwest implementation of [`Backend`].
//!
//! JSON request/response with a `{status, code, message, data}` envelope,
//! bearer-token authentication, and raw-byte chunk transport. Exact URLs
//! are deployment-specific; this client follows the `/v3` layout.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{instrument, trace};

use crate::error::{Error, Result};
use crate::fs::node::NodeId;

use super::retry::RetryPolicy;
use super::types::{
    AuthInfo, DirectoryListing, Session, UploadFinishRequest, UploadHandle, UserInfo, WireFile,
};
use super::Backend;

/// Timeout for a single HTTP attempt.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(60);
/// Total deadline for one chunk transfer, retries included.
const CHUNK_DEADLINE: Duration = Duration::from_secs(600);

/// Standard response envelope wrapping every JSON endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    status: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<T>,
}

pub struct HttpBackend {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

impl HttpBackend {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ATTEMPT_TIMEOUT)
            .build()
            .map_err(|e| Error::Fatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: None,
            retry: RetryPolicy::default(),
        })
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Map a reqwest transport error. No response was received, so these
    /// are connection-level and safe to retry even for writes.
    fn transport_error(err: &reqwest::Error) -> Error {
        Error::Transient {
            message: err.to_string(),
            connection: err.is_connect() || err.is_timeout() || err.is_request(),
        }
    }

    /// Classify a received HTTP status plus optional server error code.
    fn classify(status: StatusCode, code: Option<&str>, message: Option<&str>) -> Error {
        let detail = || message.map_or_else(|| status.to_string(), ToString::to_string);
        match (status.as_u16(), code) {
            (401 | 403, _) | (_, Some("unauthorized" | "invalid_api_key" | "auth_failed")) => {
                Error::Auth(detail())
            }
            (404, _) | (_, Some("not_found")) => Error::NotFound(detail()),
            (409, _) | (_, Some("conflict" | "exists")) => Error::Conflict(detail()),
            (429, _) => Error::RateLimited { retry_after: None },
            (s, _) if (500..600).contains(&s) => Error::Transient {
                message: detail(),
                connection: false,
            },
            (s, _) if (400..500).contains(&s) => Error::Fatal(detail()),
            _ => Error::Fatal(detail()),
        }
    }

    fn rate_limit_from(resp: &Response) -> Error {
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        Error::RateLimited { retry_after }
    }

    /// Check status and parse the envelope. Errors on a non-success HTTP
    /// status or a `status: false` body; `data` may legitimately be
    /// absent for mutation endpoints.
    async fn parse_envelope<T: DeserializeOwned>(resp: Response) -> Result<Option<T>> {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Self::rate_limit_from(&resp));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let parsed: Option<ApiResponse<serde_json::Value>> = serde_json::from_str(&body).ok();
            let (code, message) = parsed
                .map(|p| (p.code, p.message))
                .unwrap_or((None, Some(body)));
            return Err(Self::classify(status, code.as_deref(), message.as_deref()));
        }

        let envelope: ApiResponse<T> = resp
            .json()
            .await
            .map_err(|e| Error::Fatal(format!("malformed backend response: {e}")))?;
        if !envelope.status {
            return Err(Self::classify(
                status,
                envelope.code.as_deref(),
                envelope.message.as_deref(),
            ));
        }
        Ok(envelope.data)
    }

    /// POST a JSON body and extract the enveloped `data`.
    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        idempotent: bool,
    ) -> Result<T> {
        let url = self.url(path);
        self.retry
            .run(idempotent, || async {
                trace!(%url, "POST");
                let resp = self
                    .authorize(self.http.post(&url))
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| Self::transport_error(&e))?;
                Self::parse_envelope(resp)
                    .await?
                    .ok_or_else(|| Error::Fatal("backend response missing data".into()))
            })
            .await
    }

    /// POST for endpoints whose `data` is absent or irrelevant.
    async fn post_unit<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
        idempotent: bool,
    ) -> Result<()> {
        let url = self.url(path);
        self.retry
            .run(idempotent, || async {
                trace!(%url, "POST");
                let resp = self
                    .authorize(self.http.post(&url))
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| Self::transport_error(&e))?;
                let _ = Self::parse_envelope::<serde_json::Value>(resp).await?;
                Ok(())
            })
            .await
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UuidBody {
    uuid: NodeId,
}

#[async_trait]
impl Backend for HttpBackend {
    #[instrument(level = "debug", skip(self))]
    async fn auth_info(&self, email: &str) -> Result<AuthInfo> {
        self.post_json("/v3/auth/info", &serde_json::json!({ "email": email }), true)
            .await
    }

    #[instrument(level = "debug", skip(self, auth_token))]
    async fn login(&self, email: &str, auth_token: &str) -> Result<Session> {
        self.post_json(
            "/v3/login",
            &serde_json::json!({ "email": email, "authToken": auth_token }),
            true,
        )
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn user_info(&self) -> Result<UserInfo> {
        self.post_json("/v3/user/info", &serde_json::json!({}), true).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_directory(&self, folder: NodeId) -> Result<DirectoryListing> {
        self.post_json("/v3/dir/content", &UuidBody { uuid: folder }, true)
            .await
    }

    #[instrument(level = "debug", skip(self, metadata, name_hashed))]
    async fn create_folder(
        &self,
        parent: NodeId,
        metadata: &str,
        name_hashed: &str,
    ) -> Result<NodeId> {
        #[derive(Deserialize)]
        struct Created {
            uuid: NodeId,
        }
        let created: Created = self
            .post_json(
                "/v3/dir/create",
                &serde_json::json!({
                    "parent": parent,
                    "metadata": metadata,
                    "nameHashed": name_hashed,
                }),
                false,
            )
            .await?;
        Ok(created.uuid)
    }

    #[instrument(level = "debug", skip(self))]
    async fn file_info(&self, file: NodeId) -> Result<WireFile> {
        self.post_json("/v3/file/info", &UuidBody { uuid: file }, true)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn upload_begin(&self, parent: NodeId) -> Result<UploadHandle> {
        self.post_json(
            "/v3/upload/begin",
            &serde_json::json!({ "parent": parent }),
            false,
        )
        .await
    }

    #[instrument(level = "debug", skip(self, ciphertext), fields(len = ciphertext.len()))]
    async fn upload_chunk(
        &self,
        handle: &UploadHandle,
        index: u64,
        ciphertext: Bytes,
    ) -> Result<()> {
        let url = format!(
            "{}?uuid={}&index={index}&uploadKey={}",
            self.url("/v3/upload/chunk"),
            handle.file_uuid,
            handle.upload_key,
        );
        let attempt = || async {
            let resp = self
                .authorize(self.http.post(&url))
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(ciphertext.clone())
                .send()
                .await
                .map_err(|e| Self::transport_error(&e))?;
            let _ = Self::parse_envelope::<serde_json::Value>(resp).await?;
            Ok(())
        };
        // Chunk PUTs are idempotent per (handle, index); the outer deadline
        // converts a wedged transfer into a retryable transient failure.
        tokio::time::timeout(CHUNK_DEADLINE, self.retry.run(true, attempt))
            .await
            .map_err(|_| Error::Transient {
                message: format!("chunk {index} exceeded the 10 minute deadline"),
                connection: false,
            })?
    }

    #[instrument(level = "debug", skip(self, request), fields(uuid = %request.file_uuid))]
    async fn upload_finish(&self, request: &UploadFinishRequest) -> Result<WireFile> {
        self.post_json("/v3/upload/done", request, false).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn download_chunk(
        &self,
        file: NodeId,
        region: &str,
        bucket: &str,
        index: u64,
    ) -> Result<Bytes> {
        let url = format!(
            "{}/{region}/{bucket}/{file}/{index}",
            self.url("/v3/download/chunk")
        );
        let attempt = || async {
            let resp = self
                .authorize(self.http.get(&url))
                .send()
                .await
                .map_err(|e| Self::transport_error(&e))?;
            let status = resp.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(Self::rate_limit_from(&resp));
            }
            if !status.is_success() {
                return Err(Self::classify(status, None, None));
            }
            resp.bytes().await.map_err(|e| Self::transport_error(&e))
        };
        tokio::time::timeout(CHUNK_DEADLINE, self.retry.run(true, attempt))
            .await
            .map_err(|_| Error::Transient {
                message: format!("chunk {index} exceeded the 10 minute deadline"),
                connection: false,
            })?
    }

    #[instrument(level = "debug", skip(self))]
    async fn move_node(&self, node: NodeId, new_parent: NodeId) -> Result<()> {
        self.post_unit(
            "/v3/item/move",
            &serde_json::json!({ "uuid": node, "to": new_parent }),
            false,
        )
        .await
    }

    #[instrument(level = "debug", skip(self, metadata, name_hashed))]
    async fn rename_node(&self, node: NodeId, metadata: &str, name_hashed: &str) -> Result<()> {
        self.post_unit(
            "/v3/item/rename",
            &serde_json::json!({
                "uuid": node,
                "metadata": metadata,
                "nameHashed": name_hashed,
            }),
            false,
        )
        .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn trash_node(&self, node: NodeId) -> Result<()> {
        self.post_unit("/v3/item/trash", &UuidBody { uuid: node }, false)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn restore_node(&self, node: NodeId) -> Result<()> {
        self.post_unit("/v3/item/restore", &UuidBody { uuid: node }, false)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn delete_node(&self, node: NodeId) -> Result<()> {
        self.post_unit("/v3/item/delete", &UuidBody { uuid: node }, false)
            .await
    }

    #[instrument(level = "debug", skip(self))]
    async fn list_trash(&self) -> Result<DirectoryListing> {
        self.post_json("/v3/trash/content", &serde_json::json!({}), true)
            .await
    }
}
