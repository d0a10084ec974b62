//! HTTP client for the Consul session and KV endpoints.
//!
//! Requests carry no client-side timeout: the watch is a blocking query bounded
//! by the `wait` parameter the server honours, and the other calls are expected
//! to answer promptly.

use crate::error::{ConsulError, Result};
use crate::service::{KeyObservation, LockPayload, LockService, SessionId, WatchIndex, WatchRequest};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

/// Response header carrying the blocking-query index
pub const INDEX_HEADER: &str = "X-Consul-Index";

#[derive(Serialize)]
struct SessionCreateBody<'a> {
    #[serde(rename = "Name")]
    name: &'a str,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
struct KvEntry {
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

/// Client for one Consul agent
#[derive(Debug, Clone)]
pub struct ConsulClient {
    client: Client,
    base_url: String,
}

impl ConsulClient {
    /// Creates a client for `server` given as `host:port`
    pub fn new(server: &str) -> Self {
        Self::with_base_url(format!("http://{}", server.trim_end_matches('/')))
    }

    /// Creates a client for an agent at `base_url` (scheme, host and port)
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            client: Client::new(),
            base_url: format!("{}/v1", base_url.trim_end_matches('/')),
        }
    }

    /// The `/v1` root every call is made against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Builds `{base_url}/{segments...}`, percent-encoding every segment
    fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
        params: &[(&str, &str)],
    ) -> Result<Url> {
        let invalid = |message: String| ConsulError::InvalidUrl {
            url: self.base_url.clone(),
            message,
        };
        let mut url = Url::parse(&self.base_url).map_err(|e| invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| invalid("base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(url)
    }

    /// URL of `key` in the KV store. Slashes separate segments, anything else is escaped.
    fn kv_url(&self, key: &str, params: &[(&str, &str)]) -> Result<Url> {
        let segments = std::iter::once("kv").chain(key.trim_matches('/').split('/'));
        self.url(segments, params)
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> Result<Response> {
        trace!("Sending request to {}", url);
        request.send().await.map_err(|source| ConsulError::Transport {
            url: url.to_string(),
            source,
        })
    }

    async fn read_body(url: &Url, response: Response) -> Result<String> {
        response
            .text()
            .await
            .map_err(|source| ConsulError::Transport {
                url: url.to_string(),
                source,
            })
    }

    async fn expect_success(url: &Url, response: Response) -> Result<String> {
        let status = response.status();
        let body = Self::read_body(url, response).await?;
        if !status.is_success() {
            return Err(ConsulError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn parse_bool(url: &Url, body: &str) -> Result<bool> {
        serde_json::from_str::<bool>(body.trim()).map_err(|e| ConsulError::InvalidResponse {
            url: url.to_string(),
            message: format!("expected a boolean body, got '{}': {}", body.trim(), e),
        })
    }
}

#[async_trait]
impl LockService for ConsulClient {
    #[instrument(skip(self))]
    async fn create_session(&self, name: &str) -> Result<SessionId> {
        let url = self.url(["session", "create"], &[])?;
        debug!("Sending session request");
        let response = self
            .send(&url, self.client.put(url.clone()).json(&SessionCreateBody { name }))
            .await?;
        let body = Self::expect_success(&url, response).await?;
        let created: SessionCreateResponse =
            serde_json::from_str(&body).map_err(|e| ConsulError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?;
        Ok(SessionId::new(created.id))
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn destroy_session(&self, session: &SessionId) -> Result<bool> {
        let url = self.url(["session", "destroy", session.as_str()], &[])?;
        let response = self.send(&url, self.client.put(url.clone())).await?;
        debug!("Session destroy gave status of {}", response.status());
        let body = Self::expect_success(&url, response).await?;
        Self::parse_bool(&url, &body)
    }

    #[instrument(skip(self, payload), fields(session = %session))]
    async fn acquire(
        &self,
        key: &str,
        session: &SessionId,
        payload: &LockPayload,
    ) -> Result<bool> {
        let url = self.kv_url(key, &[("acquire", session.as_str())])?;
        let response = self
            .send(&url, self.client.put(url.clone()).json(payload))
            .await?;
        let body = Self::expect_success(&url, response).await?;
        Self::parse_bool(&url, &body)
    }

    #[instrument(skip(self), fields(session = %session))]
    async fn release(&self, key: &str, session: &SessionId) -> Result<bool> {
        let url = self.kv_url(key, &[("release", session.as_str())])?;
        let response = self.send(&url, self.client.put(url.clone())).await?;
        debug!("Release leadership gave status of {}", response.status());
        let body = Self::expect_success(&url, response).await?;
        Self::parse_bool(&url, &body)
    }

    async fn watch(&self, request: WatchRequest<'_>) -> Result<KeyObservation> {
        let url = match request.index {
            Some(index) => self.kv_url(
                request.key,
                &[("wait", request.wait), ("index", index.as_str())],
            )?,
            None => self.kv_url(request.key, &[])?,
        };
        debug!("Starting key monitor request: {}", url);

        let response = self.send(&url, self.client.get(url.clone())).await?;
        let index = response
            .headers()
            .get(INDEX_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(WatchIndex::new);

        // A key that was never written (or was deleted) comes back as 404.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(KeyObservation {
                index,
                holder: None,
            });
        }

        let body = Self::expect_success(&url, response).await?;
        let entries: Vec<KvEntry> = if body.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&body).map_err(|e| ConsulError::InvalidResponse {
                url: url.to_string(),
                message: e.to_string(),
            })?
        };

        let holder = entries
            .into_iter()
            .next()
            .and_then(|entry| entry.session)
            .filter(|session| !session.is_empty())
            .map(SessionId::new);

        Ok(KeyObservation { index, holder })
    }
}
