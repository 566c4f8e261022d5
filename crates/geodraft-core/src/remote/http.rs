//! HTTP store client.

use std::time::Duration;

use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{
    BoxFuture, ContentUpdate, FileContent, FileId, FileMeta, NewShape, RemoteError, RemoteResult,
    RemoteStore, ShapeId, ShapeRecord, ShapeUpdate,
};

/// Default API base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Connection settings for [`HttpStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpStoreConfig {
    pub base_url: String,
    /// Bearer token sent with every request.
    pub token: Option<String>,
    pub timeout: Duration,
}

impl Default for HttpStoreConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
        }
    }
}

impl HttpStoreConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `GEODRAFT_API_URL` and `GEODRAFT_TOKEN`, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("GEODRAFT_API_URL") {
            config.base_url = url;
        }
        config.token = std::env::var("GEODRAFT_TOKEN").ok().filter(|t| !t.is_empty());
        config
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Store backed by the REST API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpStore {
    pub fn new(config: HttpStoreConfig) -> RemoteResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| RemoteError::Other(format!("invalid token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| RemoteError::Other(format!("failed to build client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Response> {
        request.send().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> RemoteError {
        if e.is_timeout() {
            RemoteError::Timeout(self.timeout)
        } else if e.is_decode() {
            RemoteError::Decode(e.to_string())
        } else {
            RemoteError::Network(e.to_string())
        }
    }

    /// Decode a successful response, or map the error status.
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> RemoteResult<T> {
        let status = response.status();
        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| RemoteError::Decode(format!("failed to parse response: {e}")))
        } else {
            Err(self.handle_error_response(response, status).await)
        }
    }

    async fn handle_empty_response(&self, response: Response) -> RemoteResult<()> {
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(self.handle_error_response(response, status).await)
        }
    }

    async fn handle_error_response(&self, response: Response, status: StatusCode) -> RemoteError {
        let message = match response.text().await {
            Ok(body) => match serde_json::from_str::<ErrorBody>(&body) {
                Ok(err) => err.error,
                Err(_) if body.is_empty() => status.to_string(),
                Err(_) => body,
            },
            Err(_) => "unknown error".to_string(),
        };
        log::debug!("store returned {status}: {message}");
        match status {
            StatusCode::NOT_FOUND => RemoteError::NotFound(message),
            _ => RemoteError::Status {
                status: status.as_u16(),
                message,
            },
        }
    }
}

impl RemoteStore for HttpStore {
    fn list_files(&self) -> BoxFuture<'_, RemoteResult<Vec<FileMeta>>> {
        Box::pin(async move {
            let response = self.send(self.client.get(self.url("/files"))).await?;
            self.handle_response(response).await
        })
    }

    fn file_content(&self, id: FileId) -> BoxFuture<'_, RemoteResult<FileContent>> {
        Box::pin(async move {
            let url = self.url(&format!("/files/{id}/content"));
            let response = self.send(self.client.get(url)).await?;
            self.handle_response(response).await
        })
    }

    fn put_file_content(&self, id: FileId, content: String) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&format!("/files/{id}/content"));
            let body = ContentUpdate { content };
            let response = self.send(self.client.put(url).json(&body)).await?;
            self.handle_empty_response(response).await
        })
    }

    fn shapes(&self) -> BoxFuture<'_, RemoteResult<Vec<ShapeRecord>>> {
        Box::pin(async move {
            let response = self.send(self.client.get(self.url("/shapes"))).await?;
            self.handle_response(response).await
        })
    }

    fn shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<ShapeRecord>> {
        Box::pin(async move {
            let url = self.url(&format!("/shape/{id}"));
            let response = self.send(self.client.get(url)).await?;
            self.handle_response(response).await
        })
    }

    fn create_shape(&self, shape: NewShape) -> BoxFuture<'_, RemoteResult<ShapeRecord>> {
        Box::pin(async move {
            let response = self
                .send(self.client.post(self.url("/shapes")).json(&shape))
                .await?;
            self.handle_response(response).await
        })
    }

    fn update_shape(&self, id: ShapeId, update: ShapeUpdate) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&format!("/shapes/{id}"));
            let response = self.send(self.client.put(url).json(&update)).await?;
            self.handle_empty_response(response).await
        })
    }

    fn delete_shape(&self, id: ShapeId) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            let url = self.url(&format!("/shapes/{id}"));
            let response = self.send(self.client.delete(url)).await?;
            self.handle_empty_response(response).await
        })
    }
}
