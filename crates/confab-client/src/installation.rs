//! Installation descriptor, credentials, and socket-server resolution.
//!
//! An [`Installation`] is the immutable descriptor of one tenant endpoint:
//! the base URL plus an optional explicit socket-server override. The
//! override is authoritative when present; hostname inference is only the
//! fallback.

use url::Url;

use crate::error::ClientError;

/// Production socket server, used for `*.teamwork.com` installations.
const PRODUCTION_SOCKET_URL: &str = "wss://sockets.teamwork.com/chat";

/// Development socket template; `{host}` is replaced by the installation
/// hostname.
const DEVELOPMENT_SOCKET_TEMPLATE: &str = "ws://{host}:8181/chat";

/// Magic password that turns a username into an API-key login.
pub const API_KEY_PASSWORD: &str = "club-lemon";

/// Immutable descriptor of the server endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Installation {
    base: Url,
    socket_server: Option<Url>,
}

impl Installation {
    /// Parse a base URL (scheme + host), e.g. `https://digitalcrew.teamwork.com`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Payload`] for unparseable URLs or URLs without
    /// a host.
    pub fn new(base: &str) -> Result<Self, ClientError> {
        let base = Url::parse(base)
            .map_err(|e| ClientError::Payload(format!("invalid installation url {base:?}: {e}")))?;
        if base.host_str().is_none() {
            return Err(ClientError::Payload(format!("installation url {base} has no host")));
        }
        Ok(Self { base, socket_server: None })
    }

    /// Set an explicit socket-server URL, authoritative over inference.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Payload`] for unparseable URLs.
    pub fn with_socket_server(mut self, socket: &str) -> Result<Self, ClientError> {
        let socket = Url::parse(socket)
            .map_err(|e| ClientError::Payload(format!("invalid socket url {socket:?}: {e}")))?;
        self.socket_server = Some(socket);
        Ok(self)
    }

    /// Base URL of the installation.
    #[must_use]
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Hostname of the installation.
    #[must_use]
    pub fn host(&self) -> &str {
        self.base.host_str().unwrap_or_default()
    }

    /// The installation domain as sent during the socket handshake.
    #[must_use]
    pub fn domain(&self) -> String {
        self.base.to_string()
    }

    /// Join a path onto the base URL. The path must be absolute (`/chat/...`).
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }

    /// Resolve the socket server URL.
    ///
    /// Explicit override first; otherwise `teamwork.com` hosts get the
    /// production socket server and anything else the development template
    /// with this installation's hostname substituted.
    #[must_use]
    pub fn socket_url(&self) -> String {
        if let Some(socket) = &self.socket_server {
            return socket.to_string();
        }
        if self.host() == "teamwork.com" || self.host().ends_with(".teamwork.com") {
            return PRODUCTION_SOCKET_URL.to_string();
        }
        DEVELOPMENT_SOCKET_TEMPLATE.replace("{host}", self.host())
    }
}

/// How to authenticate a new session. Consumed once during login.
#[derive(Clone)]
pub enum Credentials {
    /// Username + password login.
    Login {
        /// Account username (usually an email address).
        username: String,
        /// Account password.
        password: String,
    },
    /// API-key login: the key is the username, the password is
    /// [`API_KEY_PASSWORD`].
    ApiKey(String),
    /// Reuse an existing `tw-auth` session token.
    Token(String),
}

impl std::fmt::Debug for Credentials {
    // Secrets stay out of logs.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Login { username, .. } => {
                f.debug_struct("Login").field("username", username).finish_non_exhaustive()
            }
            Self::ApiKey(_) => f.write_str("ApiKey(..)"),
            Self::Token(_) => f.write_str("Token(..)"),
        }
    }
}

/// Everything needed to construct a [`crate::Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Target installation.
    pub installation: Installation,
    /// Login material.
    pub credentials: Credentials,
    /// Socket timing parameters. Defaults match the production protocol.
    pub socket: crate::socket::SocketConfig,
    /// Back-off between reconnect attempts; constant, not exponential.
    pub reconnect_interval: std::time::Duration,
}

impl SessionConfig {
    /// Config with default timings.
    #[must_use]
    pub fn new(installation: Installation, credentials: Credentials) -> Self {
        Self {
            installation,
            credentials,
            socket: crate::socket::SocketConfig::default(),
            reconnect_interval: crate::session::RECONNECT_INTERVAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn production_hosts_use_the_production_socket() {
        let inst = Installation::new("https://digitalcrew.teamwork.com").unwrap();
        assert_eq!(inst.socket_url(), PRODUCTION_SOCKET_URL);
    }

    #[test]
    fn other_hosts_use_the_development_template() {
        let inst = Installation::new("http://chat.example.dev").unwrap();
        assert_eq!(inst.socket_url(), "ws://chat.example.dev:8181/chat");
    }

    #[test]
    fn explicit_override_is_authoritative() {
        let inst = Installation::new("https://digitalcrew.teamwork.com")
            .unwrap()
            .with_socket_server("ws://127.0.0.1:9001/chat")
            .unwrap();
        assert_eq!(inst.socket_url(), "ws://127.0.0.1:9001/chat");
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let inst = Installation::new("https://digitalcrew.teamwork.com/").unwrap();
        assert_eq!(
            inst.endpoint("/chat/me.json"),
            "https://digitalcrew.teamwork.com/chat/me.json"
        );
    }

    #[test]
    fn lookalike_host_is_not_production() {
        let inst = Installation::new("https://nottheteamwork.company").unwrap();
        assert!(inst.socket_url().starts_with("ws://nottheteamwork.company"));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let creds = Credentials::Login { username: "adrianc".into(), password: "hunter2".into() };
        let text = format!("{creds:?}");
        assert!(text.contains("adrianc"));
        assert!(!text.contains("hunter2"));
    }
}
