//! HTTP transport.
//!
//! Performs every REST call with cookie auth, bracket-notation query
//! encoding, JSON body handling, pagination wrapping, and typed errors.
//!
//! The `tw-auth` token lives behind a shared handle so the socket path reads
//! the same value and impersonation rotates both atomically.

use std::sync::{Arc, RwLock};

use reqwest::header::{HeaderValue, COOKIE, SET_COOKIE};
use reqwest::{Method, Response};
use serde_json::Value;

use crate::error::HttpError;
use crate::installation::Installation;

/// Shared auth-token cell. `None` until login succeeds.
pub type SharedToken = Arc<RwLock<Option<String>>>;

/// Query parameters, encoded with nested bracket keys
/// (`filter[updatedAfter]=…`, `page[offset]=…`). `None` values are skipped.
#[derive(Debug, Clone, Default)]
pub struct Query(Vec<(String, String)>);

impl Query {
    /// Empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a flat key.
    pub fn push(&mut self, key: &str, value: impl ToString) -> &mut Self {
        self.0.push((key.to_string(), value.to_string()));
        self
    }

    /// Append a flat key, skipping `None`.
    pub fn push_opt(&mut self, key: &str, value: Option<impl ToString>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, value);
        }
        self
    }

    /// Append a nested key, e.g. `nested("filter", "updatedAfter", ts)` →
    /// `filter[updatedAfter]=ts`.
    pub fn nested(&mut self, group: &str, key: &str, value: impl ToString) -> &mut Self {
        self.0.push((format!("{group}[{key}]"), value.to_string()));
        self
    }

    /// Append a nested key, skipping `None`.
    pub fn nested_opt(&mut self, group: &str, key: &str, value: Option<impl ToString>) -> &mut Self {
        if let Some(value) = value {
            self.nested(group, key, value);
        }
        self
    }

    /// True when no parameter was added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encoded pairs.
    #[must_use]
    pub fn pairs(&self) -> &[(String, String)] {
        &self.0
    }
}

/// REST transport bound to one installation.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    installation: Installation,
    token: SharedToken,
}

impl HttpTransport {
    /// Build a transport for the installation. No token is set yet.
    #[must_use]
    pub fn new(installation: Installation) -> Self {
        Self {
            client: reqwest::Client::new(),
            installation,
            token: Arc::new(RwLock::new(None)),
        }
    }

    /// The installation this transport talks to.
    #[must_use]
    pub fn installation(&self) -> &Installation {
        &self.installation
    }

    /// Current `tw-auth` token, if logged in.
    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.token.read().expect("token lock poisoned").clone()
    }

    /// Replace the `tw-auth` token. Rotation is atomic: requests started
    /// after this call observe the new value, in-flight requests keep the
    /// value they cloned.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().expect("token lock poisoned") = Some(token.into());
    }

    /// Handle to the shared token cell, for the socket path.
    #[must_use]
    pub fn shared_token(&self) -> SharedToken {
        Arc::clone(&self.token)
    }

    /// GET a path and parse the JSON body.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::request`].
    pub async fn get(&self, path: &str, query: Query) -> Result<Option<Value>, HttpError> {
        self.request(Method::GET, path, query, None).await
    }

    /// Perform a request and parse the JSON body.
    ///
    /// Resolves to `None` for responses with `Content-Length: 0` or an empty
    /// body.
    ///
    /// # Errors
    ///
    /// - [`HttpError::QueryInPath`] if `path` contains `?` while `query` is
    ///   non-empty
    /// - [`HttpError::Transport`] for network failures
    /// - [`HttpError::Status`] for non-2xx responses (body captured)
    /// - [`HttpError::Body`] for unparseable 2xx bodies
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: Query,
        body: Option<Value>,
    ) -> Result<Option<Value>, HttpError> {
        let url = self.installation.endpoint(path);
        let method_name = method.to_string();
        let response = self.execute(method, path, &query, body).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.ok().filter(|text| !text.is_empty());
            return Err(HttpError::Status {
                method: method_name,
                url,
                status: status.as_u16(),
                status_text: status.canonical_reason().unwrap_or_default().to_string(),
                body,
            });
        }

        if response.content_length() == Some(0) {
            return Ok(None);
        }
        let text = response
            .text()
            .await
            .map_err(|source| HttpError::Transport { url: url.clone(), source })?;
        if text.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text).map(Some).map_err(|source| HttpError::Body { url, source })
    }

    /// Perform a request and hand back the raw response: no status check and
    /// no body parsing. Used where callers need headers (`Set-Cookie`).
    ///
    /// # Errors
    ///
    /// [`HttpError::QueryInPath`] and [`HttpError::Transport`] as for
    /// [`HttpTransport::request`].
    pub async fn request_raw(
        &self,
        method: Method,
        path: &str,
        query: Query,
        body: Option<Value>,
    ) -> Result<Response, HttpError> {
        self.execute(method, path, &query, body).await
    }

    /// GET a list endpoint, injecting `page[offset]` / `page[limit]` only
    /// when provided.
    ///
    /// # Errors
    ///
    /// See [`HttpTransport::request`].
    pub async fn request_list(
        &self,
        path: &str,
        offset: Option<u64>,
        limit: Option<u64>,
        mut query: Query,
    ) -> Result<Option<Value>, HttpError> {
        query.nested_opt("page", "offset", offset);
        query.nested_opt("page", "limit", limit);
        self.request(Method::GET, path, query, None).await
    }

    async fn execute(
        &self,
        method: Method,
        path: &str,
        query: &Query,
        body: Option<Value>,
    ) -> Result<Response, HttpError> {
        if !query.is_empty() && path.contains('?') {
            return Err(HttpError::QueryInPath { path: path.to_string() });
        }

        let url = self.installation.endpoint(path);
        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query.pairs());
        }
        if let Some(token) = self.token() {
            request = request.header(COOKIE, HeaderValue::from_str(&format!("tw-auth={token}"))?);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        request.send().await.map_err(|source| HttpError::Transport { url, source })
    }
}

/// Pull the `tw-auth` value out of a response's `Set-Cookie` headers.
#[must_use]
pub fn extract_auth_cookie(response: &Response) -> Option<String> {
    for header in response.headers().get_all(SET_COOKIE) {
        let Ok(text) = header.to_str() else { continue };
        for part in text.split(';') {
            if let Some(value) = part.trim().strip_prefix("tw-auth=") {
                if !value.is_empty() {
                    return Some(value.to_string());
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_encodes_nested_keys_and_skips_none() {
        let mut query = Query::new();
        query
            .nested("filter", "updatedAfter", "2017-01-01T00:00:00Z")
            .nested_opt("filter", "searchTerm", None::<String>)
            .nested("page", "offset", 20)
            .push("includeUserData", true);

        let pairs = query.pairs();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[0].0, "filter[updatedAfter]");
        assert_eq!(pairs[1], ("page[offset]".to_string(), "20".to_string()));
        assert_eq!(pairs[2], ("includeUserData".to_string(), "true".to_string()));
    }

    #[tokio::test]
    async fn query_plus_query_string_in_path_is_rejected() {
        let transport =
            HttpTransport::new(Installation::new("http://127.0.0.1:1").unwrap());
        let mut query = Query::new();
        query.push("includeAuth", true);

        let err = transport.get("/chat/me.json?includeAuth=true", query).await.unwrap_err();
        assert!(matches!(err, HttpError::QueryInPath { .. }));
    }

    #[test]
    fn token_rotation_is_visible_through_the_shared_handle() {
        let transport = HttpTransport::new(Installation::new("http://x.test").unwrap());
        let shared = transport.shared_token();
        assert!(shared.read().unwrap().is_none());

        transport.set_token("abc123");
        assert_eq!(shared.read().unwrap().as_deref(), Some("abc123"));

        transport.set_token("rotated");
        assert_eq!(transport.token().as_deref(), Some("rotated"));
    }
}
