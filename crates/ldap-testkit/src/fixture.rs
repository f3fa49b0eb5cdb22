//! Test lifecycle glue around the embedded directory server.
//!
//! Two shapes are offered. [`DirectoryFixture`] is a guard: the server runs
//! while the guard lives and is torn down when it drops, so a panicking test
//! still releases the port. [`with_directory`] is the scoped form: it starts
//! the server, hands the test body an administrator-bound client, and tears
//! down unconditionally, whether the body succeeds or fails.
//!
//! Configuration precedence is explicit rather than annotation-driven: a
//! suite keeps a baseline [`DirectoryServerConfig`], and a test that needs
//! different settings clones it and overrides fields with the `with_*`
//! builder methods before passing it here. The override wins.

use std::future::Future;

use crate::config::DirectoryServerConfig;
use crate::error::Result;
use crate::server::DirectoryServer;
use crate::tester::DirectoryTester;

/// Guard that keeps an embedded directory server running for a test.
pub struct DirectoryFixture {
    server: DirectoryServer,
}

impl DirectoryFixture {
    /// Starts the directory server described by `config`.
    ///
    /// # Errors
    ///
    /// Propagates the server's startup errors; a test using the fixture fails
    /// before its body runs, the same way a broken seed file would fail a
    /// suite's setup phase.
    pub async fn start(config: DirectoryServerConfig) -> Result<Self> {
        let server = DirectoryServer::start(config).await?;
        Ok(Self { server })
    }

    /// The running server.
    #[must_use]
    pub const fn server(&self) -> &DirectoryServer {
        &self.server
    }

    /// Opens a new administrator-bound [`DirectoryTester`] against the
    /// fixture's server. Each call opens an independent connection.
    ///
    /// # Errors
    ///
    /// Returns the tester's connection/bind errors.
    pub async fn tester(&self) -> Result<DirectoryTester> {
        self.server.connection().await
    }

    /// Tears the server down, waiting for the listener to be released.
    pub async fn shutdown(self) {
        self.server.shutdown().await;
    }
}

/// Runs `body` against a freshly started directory server, tearing the server
/// down afterwards no matter how the body exits.
///
/// The body receives an administrator-bound [`DirectoryTester`] and owns it;
/// its connection closes with it.
///
/// # Errors
///
/// Returns the server's startup errors, the tester's connection errors, or
/// whatever the body returns.
pub async fn with_directory<F, Fut, T>(config: DirectoryServerConfig, body: F) -> Result<T>
where
    F: FnOnce(DirectoryTester) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let fixture = DirectoryFixture::start(config).await?;
    let tester = fixture.tester().await?;
    let result = body(tester).await;
    fixture.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LdifSource, RetryPolicy};
    use crate::error::Error;
    use std::time::Duration;

    const PEOPLE: &str = "\
dn: ou=People,dc=example,dc=com
objectclass: organizationalUnit
objectclass: top
ou: People
";

    fn config() -> DirectoryServerConfig {
        DirectoryServerConfig::new()
            .with_port(0)
            .with_ldif_source(LdifSource::inline(PEOPLE))
    }

    fn one_shot() -> RetryPolicy {
        RetryPolicy::no_retry().with_attempt_timeout(Duration::from_millis(250))
    }

    #[tokio::test]
    async fn scoped_run_tears_down_after_success() {
        let port = with_directory(config(), |mut directory| async move {
            let port = directory.endpoint().port();
            directory.assert_dn_exists("ou=People,dc=example,dc=com").await?;
            Ok(port)
        })
        .await
        .unwrap();

        let err = DirectoryTester::connect_with_policy("localhost", port, one_shot())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn scoped_run_tears_down_after_failure() {
        let result = with_directory(config(), |mut directory| async move {
            directory.assert_dn_exists("ou=Ghost,dc=example,dc=com").await
        })
        .await;
        assert!(matches!(result, Err(Error::Assertion(_))));
    }

    #[tokio::test]
    async fn fixture_guard_supports_multiple_testers() {
        let fixture = DirectoryFixture::start(config()).await.unwrap();
        let port = fixture.server().local_port();

        let mut first = fixture.tester().await.unwrap();
        let mut second = fixture.tester().await.unwrap();
        assert!(first.verify_dn_exists("dc=example,dc=com").await.unwrap());
        assert!(second
            .verify_dn_exists("ou=People,dc=example,dc=com")
            .await
            .unwrap());
        first.disconnect().await;
        second.disconnect().await;

        fixture.shutdown().await;
        let err = DirectoryTester::connect_with_policy("localhost", port, one_shot())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
    }

    #[tokio::test]
    async fn startup_failure_surfaces_before_the_body() {
        let broken = DirectoryServerConfig::new()
            .with_port(0)
            .with_ldif_source(LdifSource::inline("not an ldif record\n"));
        let result = with_directory(broken, |_directory| async move { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Ldif { .. })));
    }
}
