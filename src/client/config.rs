// ABOUTME: Connection configuration for STOMP sessions with sensible defaults
// ABOUTME: Covers broker address, credentials, extra headers, timeout and TLS options

use crate::protocol::Version;
use std::time::Duration;

/// The STOMP default port.
pub const DEFAULT_PORT: u16 = 61613;

/// How long the whole connect routine (TCP, optional TLS, CONNECT exchange)
/// may take before it is abandoned.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection configuration.
///
/// ```
/// use stomp::ConnectionConfig;
///
/// let config = ConnectionConfig::new("broker.example.com")
///     .with_credentials("user", "secret")
///     .with_header("client-id", "reporting")
///     .secure();
/// assert_eq!(config.port, 61613);
/// ```
#[derive(Debug)]
pub struct ConnectionConfig {
    /// Broker host name. Also used for TLS server-name verification.
    pub host: String,
    /// Broker TCP port (default 61613).
    pub port: u16,
    /// Credentials for the `login`/`passcode` handshake headers.
    pub login: Option<String>,
    pub passcode: Option<String>,
    /// Extra headers appended to the CONNECT frame.
    pub headers: Vec<(String, String)>,
    /// Connect timeout (default 10 seconds).
    pub timeout: Duration,
    /// Use TLS for the connection.
    pub secure: bool,
    /// TLS options, passed through opaquely to the TLS layer. When unset and
    /// `secure` is on, a default connector is used.
    pub ssl_opts: Option<native_tls::TlsConnector>,
    /// Protocol versions offered in `accept-version` (default just 1.2).
    pub versions: Vec<Version>,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>) -> ConnectionConfig {
        ConnectionConfig {
            host: host.into(),
            port: DEFAULT_PORT,
            login: None,
            passcode: None,
            headers: Vec::new(),
            timeout: DEFAULT_CONNECT_TIMEOUT,
            secure: false,
            ssl_opts: None,
            versions: vec![Version::default()],
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        login: impl Into<String>,
        passcode: impl Into<String>,
    ) -> Self {
        self.login = Some(login.into());
        self.passcode = Some(passcode.into());
        self
    }

    /// Appends an extra CONNECT header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Switches the connection to TLS.
    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    /// Switches the connection to TLS with explicit options.
    pub fn secure_with(mut self, connector: native_tls::TlsConnector) -> Self {
        self.secure = true;
        self.ssl_opts = Some(connector);
        self
    }

    /// Replaces the offered protocol versions.
    pub fn with_versions(mut self, versions: impl Into<Vec<Version>>) -> Self {
        let versions = versions.into();
        if !versions.is_empty() {
            self.versions = versions;
        }
        self
    }

    /// The newest version on offer; decides between CONNECT and STOMP as the
    /// handshake command.
    pub fn requested_version(&self) -> Version {
        self.versions.iter().copied().max().unwrap_or_default()
    }

    /// The `accept-version` header value.
    pub fn accept_version_header(&self) -> String {
        let mut versions: Vec<Version> = self.versions.clone();
        versions.sort();
        versions.dedup();
        versions
            .iter()
            .map(Version::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}
