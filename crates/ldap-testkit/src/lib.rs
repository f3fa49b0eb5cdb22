//! Embedded LDAP directory fixtures for tests.
//!
//! This crate starts an in-memory LDAP directory server for the duration of
//! a test, seeds it with entries and custom schema from LDIF sources, and
//! provides a [`DirectoryTester`] client with verification and assertion
//! helpers that query the directory over a real LDAP connection.
//!
//! # Getting started
//!
//! ```no_run
//! use ldap_testkit::{with_directory, DirectoryServerConfig, LdifSource};
//!
//! # async fn run() -> ldap_testkit::Result<()> {
//! let config = DirectoryServerConfig::new()
//!     .with_port(0)
//!     .with_ldif_source(LdifSource::inline(
//!         "dn: ou=People,dc=example,dc=com\n\
//!          objectclass: organizationalUnit\n\
//!          ou: People\n",
//!     ));
//!
//! with_directory(config, |mut directory| async move {
//!     directory.assert_dn_exists("ou=People,dc=example,dc=com").await?;
//!     directory.assert_dn_is_a("dc=example,dc=com", "domain").await?;
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! For finer control, [`DirectoryFixture`] keeps the server alive as a guard
//! and [`DirectoryTester`] can connect to any endpoint with a bounded
//! [`RetryPolicy`], so a test can also point it at a directory it did not
//! start itself.

#![deny(missing_docs)]

mod config;
mod dn;
mod entry;
mod error;
mod fixture;
mod ldif;
mod schema;
mod server;
mod store;
mod tester;

pub use config::{
    Credentials, DirectoryEndpoint, DirectoryServerConfig, LdifSource, RetryPolicy, SchemaSource,
    DEFAULT_ADMIN_DN, DEFAULT_ADMIN_PASSWORD, DEFAULT_ATTEMPT_TIMEOUT_MILLIS, DEFAULT_BASE_DN,
    DEFAULT_BASE_OBJECT_CLASSES, DEFAULT_MAX_RETRIES, DEFAULT_OPERATION_TIMEOUT_SECS,
    DEFAULT_PORT, STANDARD_SCHEMA_NAME,
};
pub use dn::{DistinguishedName, DistinguishedNameError, RelativeDistinguishedName};
pub use entry::{Attribute, DirectoryEntry};
pub use error::{Error, Result};
pub use fixture::{with_directory, DirectoryFixture};
pub use server::DirectoryServer;
pub use tester::DirectoryTester;
