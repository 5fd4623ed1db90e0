//! HTTP client for the consular REST API.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::{multipart, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::auth::TokenProvider;
use crate::types::{ApiResponse, Page};
use embaixada_common::{Error, Result};

/// Per-request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default page size for listings.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

const USER_AGENT: &str = "Embaixada/0.1";

/// Characters left unescaped in path segments.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// Percent-encode one path segment.
///
/// # Errors
/// - `id` is empty
pub fn segment(id: &str) -> Result<String> {
    if id.is_empty() {
        return Err(Error::InvalidInput("Resource id must not be empty".to_string()));
    }
    Ok(utf8_percent_encode(id, SEGMENT).to_string())
}

/// Outcome fields of an envelope whose `data` is not needed.
#[derive(Debug, Deserialize)]
struct EnvelopeStatus {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

/// Error body returned alongside non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Map a non-success status to the error taxonomy.
///
/// 408 and 429 are transient like transport failures; every other 4xx is a
/// rejection of the request itself.
pub fn classify_status(status: StatusCode, message: &str) -> Error {
    let detail = if message.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, message)
    };

    match status {
        StatusCode::UNAUTHORIZED => Error::Unauthorized(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => Error::Network(detail),
        s if s.is_client_error() => Error::Validation(detail),
        s if s.is_server_error() => Error::Server(detail),
        _ => Error::Server(format!("Unexpected status {}", detail)),
    }
}

/// Authenticated JSON client bound to one API base URL.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
}

impl ApiClient {
    /// Create a client.
    ///
    /// # Errors
    /// - `base_url` is not an absolute http(s) URL
    /// - HTTP client construction failed
    pub fn new(base_url: &str, timeout: Duration, tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("Invalid API URL '{}': {}", base_url, e)))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(Error::Config(format!(
                "API URL must be http or https, got '{}'",
                base_url
            )));
        }

        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            tokens,
        })
    }

    /// Base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve `path` below the base URL, keeping the base path.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined).map_err(|e| Error::InvalidInput(format!("Invalid API path '{}': {}", path, e)))
    }

    /// GET and unwrap the envelope.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let request = self.http.get(self.endpoint(path)?);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// GET with query parameters and unwrap the envelope.
    pub async fn get_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = self.http.get(self.endpoint(path)?).query(query);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// GET one page of a listing.
    pub async fn get_paged<T: DeserializeOwned>(&self, path: &str, page: u32, size: u32) -> Result<Page<T>> {
        self.get_with_query(path, &[("page", page), ("size", size)]).await
    }

    /// POST a JSON body.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.http.post(self.endpoint(path)?).json(body);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// PUT a JSON body.
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.http.put(self.endpoint(path)?).json(body);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// PATCH a JSON body.
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let request = self.http.patch(self.endpoint(path)?).json(body);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// Send a JSON body without decoding the returned resource.
    ///
    /// A 2xx is accepted unless the body is an envelope with `success: false`;
    /// a body that is not an envelope does not fail the call.
    pub async fn send_json<B>(&self, method: reqwest::Method, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        let request = self.http.request(method, self.endpoint(path)?).json(body);
        let response = self.send(request).await?;
        let url = response.url().clone();
        let text = response.text().await.unwrap_or_default();

        match serde_json::from_str::<EnvelopeStatus>(&text) {
            Ok(EnvelopeStatus {
                success: Some(false),
                message,
            }) => Err(Error::Validation(
                message.unwrap_or_else(|| "Request rejected by server".to_string()),
            )),
            Ok(_) => Ok(()),
            Err(_) => {
                debug!("Ignoring non-envelope body from {}", url.path());
                Ok(())
            }
        }
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let request = self.http.delete(self.endpoint(path)?);
        self.send(request).await.map(|_| ())
    }

    /// POST a multipart form.
    pub async fn post_multipart<T: DeserializeOwned>(&self, path: &str, form: multipart::Form) -> Result<T> {
        let request = self.http.post(self.endpoint(path)?).multipart(form);
        self.unwrap_envelope(self.send(request).await?).await
    }

    /// Stream a GET response body into `dest`.
    ///
    /// # Returns
    /// Number of bytes written.
    pub async fn download(&self, path: &str, dest: &Path) -> Result<u64> {
        let request = self.http.get(self.endpoint(path)?);
        let mut response = self.send(request).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| transport_error("download", e))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!("Downloaded {} bytes to {}", written, dest.display());
        Ok(written)
    }

    /// Attach the token, send, and check the status.
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = match self.tokens.access_token().await? {
            Some(token) => request.bearer_auth(token),
            None => request,
        };

        let response = request
            .send()
            .await
            .map_err(|e| transport_error("request", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .unwrap_or(body);

        if status == StatusCode::UNAUTHORIZED {
            warn!("Request to {} rejected as unauthorized", url.path());
            self.tokens.session_expired();
        } else {
            debug!("Request to {} failed with {}", url.path(), status);
        }
        Err(classify_status(status, message.trim()))
    }

    async fn unwrap_envelope<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        let envelope: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))?;

        if !envelope.success {
            return Err(Error::Validation(
                envelope
                    .message
                    .unwrap_or_else(|| "Request rejected by server".to_string()),
            ));
        }
        Ok(envelope.data)
    }
}

fn transport_error(what: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Network(format!("{} timed out: {}", what, e))
    } else {
        Error::Network(format!("{} failed: {}", what, e))
    }
}
