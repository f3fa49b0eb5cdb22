//! Error types for directory test operations.
//!
//! A single error enum covers both halves of the crate: failures while
//! standing up the embedded directory server (configuration, LDIF seed data,
//! schema, listener startup) and failures observed through the directory
//! client (connection, bind, queries, assertions).

use thiserror::Error;

use crate::dn::DistinguishedNameError;

/// Main error type for directory test operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Could not establish a session within the retry budget
    #[error("could not connect to directory server at {endpoint}: {message}")]
    Connection {
        /// Endpoint the client was connecting to
        endpoint: String,
        /// Description of the last connection failure
        message: String,
    },

    /// The directory rejected the bind credentials
    #[error("could not bind to directory server as {bind_dn}: {message}")]
    Authentication {
        /// DN the bind was attempted with
        bind_dn: String,
        /// Description of the bind failure
        message: String,
    },

    /// A caller supplied a malformed distinguished name
    #[error("invalid distinguished name: {0}")]
    InvalidDn(#[from] DistinguishedNameError),

    /// A query-level protocol failure while talking to the directory
    #[error("error communicating with directory server: {0}")]
    Directory(String),

    /// A verification predicate did not hold at assertion time
    #[error("{0}")]
    Assertion(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// An LDIF source could not be parsed or applied
    #[error("LDIF error at line {line}: {message}")]
    Ldif {
        /// Line number within the LDIF source (1-based)
        line: usize,
        /// Description of the problem
        message: String,
    },

    /// A schema source could not be parsed or merged
    #[error("schema error: {0}")]
    Schema(String),

    /// The embedded directory server failed to start
    #[error("directory server startup failed: {0}")]
    Startup(String),
}

/// Specialized result type for directory test operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns a short machine-readable code for the error kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "CONNECTION",
            Self::Authentication { .. } => "AUTHENTICATION",
            Self::InvalidDn(_) => "INVALID_DN",
            Self::Directory(_) => "DIRECTORY",
            Self::Assertion(_) => "ASSERTION",
            Self::Config(_) => "CONFIG",
            Self::Ldif { .. } => "LDIF",
            Self::Schema(_) => "SCHEMA",
            Self::Startup(_) => "STARTUP",
        }
    }

    /// Returns true if the error is fatal to client construction.
    ///
    /// Connection and authentication failures abort setup immediately; there
    /// is no partial or degraded client to hand back.
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::Connection { .. }
                | Self::Authentication { .. }
                | Self::Config(_)
                | Self::Ldif { .. }
                | Self::Schema(_)
                | Self::Startup(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        assert_eq!(
            Error::Connection {
                endpoint: "localhost:10389".to_string(),
                message: "refused".to_string()
            }
            .code(),
            "CONNECTION"
        );
        assert_eq!(
            Error::Authentication {
                bind_dn: "uid=admin,ou=system".to_string(),
                message: "invalid credentials".to_string()
            }
            .code(),
            "AUTHENTICATION"
        );
        assert_eq!(Error::Directory("oops".to_string()).code(), "DIRECTORY");
        assert_eq!(Error::Assertion("nope".to_string()).code(), "ASSERTION");
        assert_eq!(
            Error::Ldif {
                line: 4,
                message: "bad record".to_string()
            }
            .code(),
            "LDIF"
        );
        assert_eq!(Error::Schema("dup".to_string()).code(), "SCHEMA");
        assert_eq!(Error::Startup("port in use".to_string()).code(), "STARTUP");
    }

    #[test]
    fn error_display() {
        let err = Error::Connection {
            endpoint: "localhost:10389".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "could not connect to directory server at localhost:10389: connection refused"
        );

        let err = Error::Ldif {
            line: 12,
            message: "unterminated record".to_string(),
        };
        assert_eq!(err.to_string(), "LDIF error at line 12: unterminated record");
    }

    #[test]
    fn setup_failures() {
        assert!(Error::Startup("port in use".to_string()).is_setup_failure());
        assert!(Error::Connection {
            endpoint: "localhost:10389".to_string(),
            message: "refused".to_string()
        }
        .is_setup_failure());

        assert!(!Error::Assertion("missing entry".to_string()).is_setup_failure());
        assert!(!Error::Directory("oops".to_string()).is_setup_failure());
    }
}
