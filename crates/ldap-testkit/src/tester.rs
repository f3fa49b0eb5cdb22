//! Directory client: connection establishment, verification and assertions.
//!
//! [`DirectoryTester`] owns exactly one connection to a directory endpoint.
//! Construction retries within a bounded budget; every verification method
//! performs exactly one lookup round trip, so external mutation of the
//! directory between calls is always observed.

use async_trait::async_trait;
use ldap3::{LdapConnAsync, LdapConnSettings, Scope, SearchEntry, SearchResult};
use std::collections::HashSet;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};
use url::Url;

use crate::config::{
    Credentials, DirectoryEndpoint, RetryPolicy, DEFAULT_OPERATION_TIMEOUT_SECS,
};
use crate::dn::DistinguishedName;
use crate::entry::DirectoryEntry;
use crate::error::{Error, Result};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait DirectorySession: Send {
    async fn bind(&mut self, bind_dn: &str, password: &str) -> Result<()>;
    async fn lookup(&mut self, dn: &str, attributes: &[String])
        -> Result<Option<DirectoryEntry>>;
    async fn close(&mut self) -> Result<()>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub(crate) trait SessionConnector: Send + Sync {
    async fn connect(&self, attempt_timeout: Duration) -> Result<Box<dyn DirectorySession>>;
}

/// A test client bound to one directory endpoint.
///
/// The connection is opened by the `connect*` constructors and released by
/// [`DirectoryTester::disconnect`]; disconnecting twice is a no-op and never
/// reconnects. Verification methods answer boolean predicates; the matching
/// `assert_*` methods turn a false predicate into a descriptive
/// [`Error::Assertion`].
pub struct DirectoryTester {
    endpoint: DirectoryEndpoint,
    session: Option<Box<dyn DirectorySession>>,
}

impl std::fmt::Debug for DirectoryTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryTester")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.session.is_some())
            .finish()
    }
}

impl DirectoryTester {
    /// Connects to `host:port` with the default retry policy.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] once the retry budget is exhausted.
    pub async fn connect(host: impl Into<String>, port: u16) -> Result<Self> {
        Self::connect_with_policy(host, port, RetryPolicy::default()).await
    }

    /// Connects to `host:port`, retrying per `policy`.
    pub async fn connect_with_policy(
        host: impl Into<String>,
        port: u16,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = DirectoryEndpoint::new(host, port);
        let connector = network_connector(&endpoint)?;
        Self::establish(endpoint, policy, None, connector).await
    }

    /// Connects with the default retry policy, then binds with `credentials`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] once the retry budget is exhausted and
    /// [`Error::Authentication`] when the directory rejects the bind; a
    /// rejected bind is permanent and never retried.
    pub async fn connect_and_bind(
        host: impl Into<String>,
        port: u16,
        credentials: &Credentials,
    ) -> Result<Self> {
        Self::connect_and_bind_with_policy(host, port, credentials, RetryPolicy::default()).await
    }

    /// Connects with `policy`, then binds with `credentials`.
    pub async fn connect_and_bind_with_policy(
        host: impl Into<String>,
        port: u16,
        credentials: &Credentials,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let endpoint = DirectoryEndpoint::new(host, port);
        let connector = network_connector(&endpoint)?;
        Self::establish(endpoint, policy, Some(credentials), connector).await
    }

    pub(crate) async fn establish(
        endpoint: DirectoryEndpoint,
        policy: RetryPolicy,
        credentials: Option<&Credentials>,
        connector: Box<dyn SessionConnector>,
    ) -> Result<Self> {
        let mut attempt: u32 = 0;
        let mut session = loop {
            let started = Instant::now();
            match connector.connect(policy.attempt_timeout).await {
                Ok(session) => break session,
                Err(err) => {
                    if attempt >= policy.max_retries {
                        warn!(%endpoint, "giving up after {} connection attempts", attempt + 1);
                        return Err(Error::Connection {
                            endpoint: endpoint.to_string(),
                            message: err.to_string(),
                        });
                    }
                    attempt += 1;
                    debug!(%endpoint, attempt, "connection attempt failed: {err}");
                    // Pace the retries: each attempt-plus-wait cycle takes at
                    // least one full attempt window.
                    let elapsed = started.elapsed();
                    if elapsed < policy.attempt_timeout {
                        sleep(policy.attempt_timeout - elapsed).await;
                    }
                }
            }
        };

        if let Some(credentials) = credentials {
            session
                .bind(credentials.bind_dn(), credentials.password())
                .await?;
        }

        Ok(Self {
            endpoint,
            session: Some(session),
        })
    }

    /// The endpoint this tester was constructed against.
    #[must_use]
    pub fn endpoint(&self) -> &DirectoryEndpoint {
        &self.endpoint
    }

    /// Returns true while the connection is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Verify that an entry identified by `dn` exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidDn`] for a malformed DN (this is a caller bug,
    /// not a "not found") and [`Error::Directory`] for protocol failures.
    pub async fn verify_dn_exists(&mut self, dn: &str) -> Result<bool> {
        let entry = self.lookup(dn, &["1.1".to_string()]).await?;
        Ok(entry.is_some())
    }

    /// Verify that the entry identified by `dn` has an `objectclass` value
    /// matching `objectclass` case-insensitively.
    pub async fn verify_dn_is_a(&mut self, dn: &str, objectclass: &str) -> Result<bool> {
        let entry = self.lookup(dn, &["objectclass".to_string()]).await?;
        Ok(entry.is_some_and(|entry| entry.has_value_ignore_case("objectclass", objectclass)))
    }

    /// Verify that the entry identified by `dn` has at least one value for
    /// `attribute`.
    pub async fn verify_dn_has_attribute(&mut self, dn: &str, attribute: &str) -> Result<bool> {
        let entry = self.lookup(dn, &[attribute.to_string()]).await?;
        Ok(entry.is_some_and(|entry| entry.has_attribute(attribute)))
    }

    /// Verify that the values of `attribute` are exactly `expected` as a set:
    /// extra actual values or missing expected values both yield false.
    pub async fn verify_dn_has_attribute_value(
        &mut self,
        dn: &str,
        attribute: &str,
        expected: &[&str],
    ) -> Result<bool> {
        let Some(entry) = self.lookup(dn, &[attribute.to_string()]).await? else {
            return Ok(false);
        };
        let Some(actual) = entry.value_set(attribute) else {
            return Ok(false);
        };
        let expected: HashSet<&str> = expected.iter().copied().collect();
        Ok(actual == expected)
    }

    /// Assert that an entry identified by `dn` exists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Assertion`] when the entry does not exist;
    /// [`Error::InvalidDn`] propagates unchanged.
    pub async fn assert_dn_exists(&mut self, dn: &str) -> Result<()> {
        if self.verify_dn_exists(dn).await? {
            Ok(())
        } else {
            Err(Error::Assertion(format!("entry for DN {dn} does not exist")))
        }
    }

    /// Assert that the entry identified by `dn` is of type `objectclass`.
    pub async fn assert_dn_is_a(&mut self, dn: &str, objectclass: &str) -> Result<()> {
        if self.verify_dn_is_a(dn, objectclass).await? {
            Ok(())
        } else {
            Err(Error::Assertion(format!(
                "entry for DN {dn} is not of type {objectclass}"
            )))
        }
    }

    /// Assert that the entry identified by `dn` has an attribute named
    /// `attribute`.
    pub async fn assert_dn_has_attribute(&mut self, dn: &str, attribute: &str) -> Result<()> {
        if self.verify_dn_has_attribute(dn, attribute).await? {
            Ok(())
        } else {
            Err(Error::Assertion(format!(
                "entry for DN {dn} does not have attribute {attribute}"
            )))
        }
    }

    /// Assert that the values of `attribute` are exactly `expected` as a set.
    pub async fn assert_dn_has_attribute_value(
        &mut self,
        dn: &str,
        attribute: &str,
        expected: &[&str],
    ) -> Result<()> {
        if self
            .verify_dn_has_attribute_value(dn, attribute, expected)
            .await?
        {
            Ok(())
        } else {
            Err(Error::Assertion(format!(
                "attribute {attribute} of entry for DN {dn} does not match [{}]",
                expected.join(",")
            )))
        }
    }

    /// Disconnects from the directory server. Calling this more than once is
    /// a no-op; no new network operation is attempted.
    pub async fn disconnect(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.close().await {
                debug!("ignoring error while closing directory connection: {err}");
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn with_session(
        endpoint: DirectoryEndpoint,
        session: Box<dyn DirectorySession>,
    ) -> Self {
        Self {
            endpoint,
            session: Some(session),
        }
    }

    async fn lookup(&mut self, dn: &str, attributes: &[String]) -> Result<Option<DirectoryEntry>> {
        // Malformed DNs surface before any round trip.
        DistinguishedName::parse(dn)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| Error::Directory("connection is closed".to_string()))?;
        session.lookup(dn, attributes).await
    }
}

fn network_connector(endpoint: &DirectoryEndpoint) -> Result<Box<dyn SessionConnector>> {
    let url = endpoint.url();
    Url::parse(&url).map_err(|err| Error::Config(format!("invalid endpoint {endpoint}: {err}")))?;
    Ok(Box::new(NetworkConnector { url }))
}

/// Connector backed by `ldap3`.
struct NetworkConnector {
    url: String,
}

#[async_trait]
impl SessionConnector for NetworkConnector {
    async fn connect(&self, attempt_timeout: Duration) -> Result<Box<dyn DirectorySession>> {
        let settings = LdapConnSettings::new().set_conn_timeout(attempt_timeout);
        let (conn, ldap) = timeout(
            attempt_timeout,
            LdapConnAsync::with_settings(settings, &self.url),
        )
        .await
        .map_err(|_| Error::Connection {
            endpoint: self.url.clone(),
            message: "connection attempt timed out".to_string(),
        })?
        .map_err(|err| Error::Connection {
            endpoint: self.url.clone(),
            message: err.to_string(),
        })?;
        ldap3::drive!(conn);
        Ok(Box::new(NetworkSession {
            inner: ldap,
            operation_timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }))
    }
}

/// Live LDAP session backed by `ldap3`.
struct NetworkSession {
    inner: ldap3::Ldap,
    operation_timeout: Duration,
}

#[async_trait]
impl DirectorySession for NetworkSession {
    async fn bind(&mut self, bind_dn: &str, password: &str) -> Result<()> {
        let result = timeout(self.operation_timeout, self.inner.simple_bind(bind_dn, password))
            .await
            .map_err(|_| Error::Directory("bind timed out".to_string()))?
            .map_err(|err| Error::Directory(err.to_string()))?;
        if result.rc != 0 {
            return Err(Error::Authentication {
                bind_dn: bind_dn.to_string(),
                message: format!("result code {}: {}", result.rc, result.text),
            });
        }
        Ok(())
    }

    async fn lookup(
        &mut self,
        dn: &str,
        attributes: &[String],
    ) -> Result<Option<DirectoryEntry>> {
        let attrs: Vec<String> = attributes.to_vec();
        let result = timeout(
            self.operation_timeout,
            self.inner.search(dn, Scope::Base, "(objectClass=*)", attrs),
        )
        .await
        .map_err(|_| Error::Directory("search timed out".to_string()))?
        .map_err(|err| Error::Directory(err.to_string()))?;

        let SearchResult(entries, res) = result;
        match res.rc {
            // success
            0 => Ok(entries
                .into_iter()
                .next()
                .map(|raw| to_directory_entry(SearchEntry::construct(raw)))),
            // noSuchObject
            32 => Ok(None),
            // invalidDNSyntax: a malformed DN slipped past client-side parsing
            34 => Err(Error::InvalidDn(
                crate::dn::DistinguishedNameError::InvalidComponent(dn.to_string()),
            )),
            rc => Err(Error::Directory(format!(
                "search failed with result code {rc}: {}",
                res.text
            ))),
        }
    }

    async fn close(&mut self) -> Result<()> {
        timeout(self.operation_timeout, self.inner.unbind())
            .await
            .map_err(|_| Error::Directory("unbind timed out".to_string()))?
            .map_err(|err| Error::Directory(err.to_string()))
    }
}

fn to_directory_entry(entry: SearchEntry) -> DirectoryEntry {
    let mut out = DirectoryEntry::new(entry.dn);
    for (name, values) in entry.attrs {
        out.add_values(&name, values);
    }
    out
}
