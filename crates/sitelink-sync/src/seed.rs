//! Initial state fetch over HTTP.
//!
//! Collections are seeded once from the REST API so a view has something to
//! show before the first push arrives. Failures never abort the view; they
//! end up in [`CollectionState::seed_error`](crate::CollectionState).

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::channel::BoxFuture;
use crate::credential::CredentialStore;
use crate::error::{SyncError, SyncResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of initial collection state.
pub trait SeedSource: Send + Sync {
    /// Fetch the JSON document at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not JSON.
    fn fetch<'a>(&'a self, path: &'a str) -> BoxFuture<'a, SyncResult<Value>>;
}

/// Fetch `path` from `source` and decode it as a list of `T`.
///
/// # Errors
///
/// Returns the fetch error, or [`SyncError::MalformedPayload`] when the body
/// is not a list of `T`.
pub async fn seed_collection<T: DeserializeOwned>(
    source: &dyn SeedSource,
    path: &str,
) -> SyncResult<Vec<T>> {
    let value = source.fetch(path).await?;
    serde_json::from_value(value).map_err(|e| SyncError::MalformedPayload {
        topic: path.to_string(),
        message: e.to_string(),
    })
}

/// REST API client authenticated with the session credential.
#[derive(Debug, Clone)]
pub struct HttpSeedClient {
    http: reqwest::Client,
    base: Url,
    credentials: CredentialStore,
}

impl HttpSeedClient {
    /// Create a client for the API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is not an absolute http(s) URL or the HTTP
    /// client cannot be built.
    pub fn new(base_url: &str, credentials: CredentialStore) -> SyncResult<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| SyncError::Config(format!("invalid api url '{base_url}': {e}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::Config(format!(
                "api url must use http:// or https://, got {}://",
                base.scheme()
            )));
        }
        // Url::join drops the last segment unless the base ends with '/'
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create http client: {e}")))?;

        Ok(Self {
            http,
            base,
            credentials,
        })
    }

    /// Base URL requests are resolved against.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn resolve(&self, path: &str) -> SyncResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| SyncError::Config(format!("invalid api path '{path}': {e}")))
    }

    async fn get(&self, path: &str) -> SyncResult<Value> {
        let url = self.resolve(path)?;
        debug!(%url, "fetching initial state");

        let mut request = self.http.get(url).header("Accept", "application/json");
        if let Some(credential) = self.credentials.current() {
            request = request.bearer_auth(credential.token());
        }

        let response = request
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("request to {path} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SyncError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("invalid json from {path}: {e}")))
    }
}

impl SeedSource for HttpSeedClient {
    fn fetch<'a>(&'a self, path: &'a str) -> BoxFuture<'a, SyncResult<Value>> {
        Box::pin(self.get(path))
    }
}
