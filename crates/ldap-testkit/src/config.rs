//! Configuration types for the embedded directory server and its clients.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Default TCP port for the embedded directory server.
pub const DEFAULT_PORT: u16 = 10389;

/// Default root DN of the directory tree.
pub const DEFAULT_BASE_DN: &str = "dc=example,dc=com";

/// Default object classes applied to the base entry.
pub const DEFAULT_BASE_OBJECT_CLASSES: &[&str] = &["domain", "top"];

/// Default administrator bind DN.
pub const DEFAULT_ADMIN_DN: &str = "uid=admin,ou=system";

/// Default administrator password.
pub const DEFAULT_ADMIN_PASSWORD: &str = "secret";

/// Default maximum number of connection retries beyond the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt connection timeout in milliseconds.
pub const DEFAULT_ATTEMPT_TIMEOUT_MILLIS: u64 = 5000;

/// Default timeout for individual directory operations in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Reserved schema source name selecting the built-in standard schema.
pub const STANDARD_SCHEMA_NAME: &str = "default";

/// A directory service endpoint. Immutable once a client is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEndpoint {
    host: String,
    port: u16,
}

impl DirectoryEndpoint {
    /// Creates an endpoint from a host name and TCP port.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Endpoint for a server listening on the loopback interface.
    #[must_use]
    pub fn localhost(port: u16) -> Self {
        Self::new("localhost", port)
    }

    /// Host name of the directory server.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// TCP port of the directory server.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Renders the endpoint as an `ldap://` URL.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ldap://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for DirectoryEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Bind credentials, used once at connection time.
///
/// The password is wrapped so that accidental `Debug` output stays redacted.
#[derive(Debug)]
pub struct Credentials {
    bind_dn: String,
    password: SecretString,
}

impl Credentials {
    /// Creates credentials from a bind DN and password.
    #[must_use]
    pub fn new(bind_dn: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            bind_dn: bind_dn.into(),
            password: SecretString::from(password.into()),
        }
    }

    /// The DN to bind as.
    #[must_use]
    pub fn bind_dn(&self) -> &str {
        &self.bind_dn
    }

    /// The bind password.
    #[must_use]
    pub fn password(&self) -> &str {
        self.password.expose_secret()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self::new(self.bind_dn.clone(), self.password.expose_secret().to_owned())
    }
}

/// Retry policy governing connection establishment only.
///
/// `max_retries` counts attempts beyond the first, so the total number of
/// connection attempts is `max_retries + 1` and `max_retries = 0` means a
/// single, non-retried try. Failed attempts are paced so that each
/// attempt-plus-wait cycle takes at least `attempt_timeout`, preventing a
/// tight failure loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of retries beyond the first attempt.
    pub max_retries: u32,

    /// Timeout (and pacing window) for each connection attempt.
    pub attempt_timeout: Duration,
}

impl RetryPolicy {
    /// Creates a retry policy with the default budget.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MILLIS),
        }
    }

    /// Creates a policy that tries exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_retries: 0,
            attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MILLIS),
        }
    }

    /// Sets the maximum number of retries beyond the first attempt.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub const fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Returns true if at least one retry would be attempted.
    #[must_use]
    pub const fn has_retries(&self) -> bool {
        self.max_retries > 0
    }

    /// The wall-clock lower bound spent before giving up when the server
    /// never becomes reachable: `max_retries * attempt_timeout`.
    #[must_use]
    pub fn exhaustion_budget(&self) -> Duration {
        self.attempt_timeout * self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// An LDIF seed-data source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LdifSource {
    /// An LDIF file on the filesystem (relative to the working directory or absolute).
    Path(PathBuf),
    /// LDIF text supplied directly, for seeds embedded in the test itself.
    Inline(String),
}

impl LdifSource {
    /// A filesystem source.
    #[must_use]
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self::Path(path.into())
    }

    /// An inline source.
    #[must_use]
    pub fn inline(ldif: impl Into<String>) -> Self {
        Self::Inline(ldif.into())
    }
}

/// A schema source merged into the server's schema before startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaSource {
    /// The built-in standard schema (selected by the reserved name `default`).
    Standard,
    /// An LDIF schema file on the filesystem.
    Path(PathBuf),
    /// LDIF schema text supplied directly.
    Inline(String),
}

impl SchemaSource {
    /// Resolves a schema source name the way seed configuration files spell
    /// them: the reserved name [`STANDARD_SCHEMA_NAME`] selects the built-in
    /// standard schema, anything else is a filesystem path.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name == STANDARD_SCHEMA_NAME {
            Self::Standard
        } else {
            Self::Path(PathBuf::from(name))
        }
    }
}

/// Declarative configuration for the embedded directory server.
///
/// A test suite typically keeps one of these as its baseline; an individual
/// test that needs different settings clones the baseline and overrides
/// fields with the `with_*` methods. The override always wins, which is the
/// documented precedence between suite-level and test-level configuration.
#[derive(Debug, Clone)]
pub struct DirectoryServerConfig {
    port: u16,
    base_dn: String,
    base_object_classes: Vec<String>,
    base_attributes: Vec<(String, String)>,
    admin: Credentials,
    ldif_sources: Vec<LdifSource>,
    schema_sources: Vec<SchemaSource>,
}

impl DirectoryServerConfig {
    /// Creates a configuration with the stock defaults: port 10389, base DN
    /// `dc=example,dc=com` of object classes `domain` and `top`, and the
    /// `uid=admin,ou=system` administrator account.
    #[must_use]
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            base_dn: DEFAULT_BASE_DN.to_string(),
            base_object_classes: DEFAULT_BASE_OBJECT_CLASSES
                .iter()
                .map(|oc| (*oc).to_string())
                .collect(),
            base_attributes: Vec::new(),
            admin: Credentials::new(DEFAULT_ADMIN_DN, DEFAULT_ADMIN_PASSWORD),
            ldif_sources: Vec::new(),
            schema_sources: Vec::new(),
        }
    }

    /// The TCP port the server will listen on (0 lets the OS pick).
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// The root DN of the directory tree.
    #[must_use]
    pub fn base_dn(&self) -> &str {
        &self.base_dn
    }

    /// Object classes applied to the base entry.
    #[must_use]
    pub fn base_object_classes(&self) -> &[String] {
        &self.base_object_classes
    }

    /// Extra attribute name/value pairs applied to the base entry.
    #[must_use]
    pub fn base_attributes(&self) -> &[(String, String)] {
        &self.base_attributes
    }

    /// The administrator bind credentials.
    #[must_use]
    pub const fn admin(&self) -> &Credentials {
        &self.admin
    }

    /// LDIF seed sources, applied in order after the base entry exists.
    #[must_use]
    pub fn ldif_sources(&self) -> &[LdifSource] {
        &self.ldif_sources
    }

    /// Schema sources, merged in order before the server starts.
    #[must_use]
    pub fn schema_sources(&self) -> &[SchemaSource] {
        &self.schema_sources
    }

    /// Overrides the listening port. Port 0 asks the OS for a free port;
    /// the bound port is then reported by the running server.
    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides the root DN.
    #[must_use]
    pub fn with_base_dn(mut self, base_dn: impl Into<String>) -> Self {
        self.base_dn = base_dn.into();
        self
    }

    /// Overrides the object classes of the base entry.
    #[must_use]
    pub fn with_base_object_classes<I, S>(mut self, object_classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_object_classes = object_classes.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an extra attribute to the base entry.
    #[must_use]
    pub fn with_base_attribute(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.base_attributes.push((name.into(), value.into()));
        self
    }

    /// Overrides the administrator credentials.
    #[must_use]
    pub fn with_admin_credentials(
        mut self,
        bind_dn: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.admin = Credentials::new(bind_dn, password);
        self
    }

    /// Appends an LDIF seed source.
    #[must_use]
    pub fn with_ldif_source(mut self, source: LdifSource) -> Self {
        self.ldif_sources.push(source);
        self
    }

    /// Appends a schema source.
    #[must_use]
    pub fn with_schema_source(mut self, source: SchemaSource) -> Self {
        self.schema_sources.push(source);
        self
    }
}

impl Default for DirectoryServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
