//! Embedded in-memory LDAP directory server.
//!
//! The server exists to back tests: it is seeded once at startup from the
//! declarative configuration, serves the operations the directory client
//! needs (simple bind, base/one/subtree search, unbind) over a loopback TCP
//! listener, and tears down with its owner. Startup failures (bad seed data,
//! bad schema, port in use) surface before any listener exists.

use std::fs;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use futures::{SinkExt, StreamExt};
use ldap3_proto::proto::{
    LdapFilter, LdapMsg, LdapOp, LdapPartialAttribute, LdapResult, LdapResultCode,
    LdapSearchResultEntry, LdapSearchScope,
};
use ldap3_proto::simple::{
    DisconnectionNotice, SearchRequest, ServerOps, SimpleBindRequest, WhoamiRequest,
};
use ldap3_proto::LdapCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Credentials, DirectoryEndpoint, DirectoryServerConfig, LdifSource};
use crate::dn::DistinguishedName;
use crate::entry::DirectoryEntry;
use crate::error::{Error, Result};
use crate::ldif;
use crate::schema::Schema;
use crate::store::{DirectoryStore, SearchFilter, SearchScope, StoreError};
use crate::tester::DirectoryTester;

/// A running embedded directory server.
///
/// Shuts down when dropped, so teardown happens on every exit path of the
/// owning test, including panics. [`DirectoryServer::shutdown`] additionally
/// waits for the listening socket to be released.
#[derive(Debug)]
pub struct DirectoryServer {
    local_addr: SocketAddr,
    admin: Credentials,
    store: Arc<RwLock<DirectoryStore>>,
    shutdown: CancellationToken,
    accept: Option<tokio::task::JoinHandle<()>>,
}

impl DirectoryServer {
    /// Configures, seeds and starts the directory server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Schema`] / [`Error::Ldif`] / [`Error::Startup`] when
    /// the schema sources, seed data or listener cannot be set up; nothing is
    /// left running in that case.
    pub async fn start(config: DirectoryServerConfig) -> Result<Self> {
        let schema = Schema::from_sources(config.schema_sources())?;
        let mut store = DirectoryStore::new(config.base_dn(), schema)
            .map_err(|err| Error::Startup(format!("invalid base DN: {err}")))?;

        let mut base_attributes: Vec<(String, Vec<String>)> = config
            .base_attributes()
            .iter()
            .map(|(name, value)| (name.clone(), vec![value.clone()]))
            .collect();
        base_attributes.push((
            "objectclass".to_string(),
            config.base_object_classes().to_vec(),
        ));
        store
            .add(config.base_dn(), base_attributes)
            .map_err(|err| Error::Startup(format!("could not create base entry: {err}")))?;

        for source in config.ldif_sources() {
            let text = match source {
                LdifSource::Path(path) => fs::read_to_string(path).map_err(|err| {
                    Error::Startup(format!(
                        "could not read LDIF source {}: {err}",
                        path.display()
                    ))
                })?,
                LdifSource::Inline(text) => text.clone(),
            };
            let records = ldif::parse(&text)?;
            ldif::apply(&mut store, records)?;
        }

        let listener = TcpListener::bind(("127.0.0.1", config.port()))
            .await
            .map_err(|err| {
                Error::Startup(format!("could not bind port {}: {err}", config.port()))
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| Error::Startup(err.to_string()))?;

        let store = Arc::new(RwLock::new(store));
        let shutdown = CancellationToken::new();
        let admin = config.admin().clone();

        let accept = {
            let store = Arc::clone(&store);
            let shutdown = shutdown.clone();
            let admin = admin.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, peer)) => {
                                    debug!(%peer, "directory client connected");
                                    tokio::spawn(serve_connection(
                                        stream,
                                        Arc::clone(&store),
                                        admin.clone(),
                                        shutdown.clone(),
                                    ));
                                }
                                Err(err) => warn!("accept failed: {err}"),
                            }
                        }
                    }
                }
                debug!("directory server accept loop stopped");
            })
        };

        info!(
            port = local_addr.port(),
            base_dn = config.base_dn(),
            "embedded directory server listening"
        );

        Ok(Self {
            local_addr,
            admin,
            store,
            shutdown,
            accept: Some(accept),
        })
    }

    /// The port the server is actually listening on (useful with port 0).
    #[must_use]
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    /// The endpoint clients should connect to.
    #[must_use]
    pub fn endpoint(&self) -> DirectoryEndpoint {
        DirectoryEndpoint::localhost(self.local_addr.port())
    }

    /// The administrator credentials the server was configured with.
    #[must_use]
    pub const fn admin(&self) -> &Credentials {
        &self.admin
    }

    /// Number of entries currently in the directory.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        read_store(&self.store).len()
    }

    /// Opens a [`DirectoryTester`] connected to this server and bound as the
    /// administrator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] / [`Error::Authentication`] when the
    /// connection cannot be established.
    pub async fn connection(&self) -> Result<DirectoryTester> {
        let endpoint = self.endpoint();
        DirectoryTester::connect_and_bind(endpoint.host().to_string(), endpoint.port(), &self.admin)
            .await
    }

    /// Stops the listener and all connection tasks, waiting until the
    /// listening socket is released. Dropping the server without calling this
    /// still tears everything down, just without waiting.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(accept) = self.accept.take() {
            let _ = accept.await;
        }
    }
}

impl Drop for DirectoryServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn read_store(store: &Arc<RwLock<DirectoryStore>>) -> std::sync::RwLockReadGuard<'_, DirectoryStore> {
    match store.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn serve_connection(
    stream: TcpStream,
    store: Arc<RwLock<DirectoryStore>>,
    admin: Credentials,
    shutdown: CancellationToken,
) {
    let (read_half, write_half) = tokio::io::split(stream);
    let mut requests = FramedRead::new(read_half, LdapCodec::default());
    let mut responses = FramedWrite::new(write_half, LdapCodec::default());
    let mut session = Session {
        store,
        admin,
        bound_dn: None,
    };

    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => break,
            message = requests.next() => message,
        };
        let Some(message) = message else { break };
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                warn!("dropping directory connection after codec error: {err}");
                break;
            }
        };
        let op = match ServerOps::try_from(message) {
            Ok(op) => op,
            Err(_) => {
                let _ = responses
                    .send(DisconnectionNotice::gen(
                        LdapResultCode::Other,
                        "unsupported request",
                    ))
                    .await;
                let _ = responses.flush().await;
                break;
            }
        };

        let (replies, disconnect) = match op {
            ServerOps::SimpleBind(request) => (vec![session.bind(&request)], false),
            ServerOps::Search(request) => (session.search(&request), false),
            ServerOps::Whoami(request) => (vec![session.whoami(&request)], false),
            ServerOps::Unbind(_) => {
                debug!("directory client unbound");
                break;
            }
            _ => (
                vec![DisconnectionNotice::gen(
                    LdapResultCode::UnwillingToPerform,
                    "operation not supported by the embedded directory server",
                )],
                true,
            ),
        };

        for reply in replies {
            if responses.send(reply).await.is_err() {
                return;
            }
        }
        if responses.flush().await.is_err() {
            return;
        }
        if disconnect {
            break;
        }
    }
}

/// Per-connection protocol state.
struct Session {
    store: Arc<RwLock<DirectoryStore>>,
    admin: Credentials,
    bound_dn: Option<String>,
}

impl Session {
    fn bind(&mut self, request: &SimpleBindRequest) -> LdapMsg {
        // Anonymous bind.
        if request.dn.is_empty() && request.pw.is_empty() {
            self.bound_dn = None;
            return request.gen_success();
        }

        if dn_equal(&request.dn, self.admin.bind_dn()) && request.pw == self.admin.password() {
            self.bound_dn = Some(request.dn.clone());
            return request.gen_success();
        }

        // Fall back to entries carrying a userPassword attribute.
        let store = read_store(&self.store);
        if let Ok(Some(entry)) = store.get(&request.dn) {
            let accepted = entry
                .values("userPassword")
                .is_some_and(|values| values.iter().any(|value| value == &request.pw));
            if accepted {
                self.bound_dn = Some(request.dn.clone());
                return request.gen_success();
            }
        }

        debug!(dn = %request.dn, "rejected bind");
        request.gen_invalid_cred()
    }

    fn whoami(&self, request: &WhoamiRequest) -> LdapMsg {
        let dn = self.bound_dn.as_deref().unwrap_or("");
        request.gen_success(&format!("dn: {dn}"))
    }

    fn search(&self, request: &SearchRequest) -> Vec<LdapMsg> {
        let scope = match request.scope {
            LdapSearchScope::Base => SearchScope::Base,
            LdapSearchScope::OneLevel => SearchScope::OneLevel,
            LdapSearchScope::Subtree => SearchScope::Subtree,
            _ => {
                return vec![search_done(
                    request.msgid,
                    LdapResultCode::UnwillingToPerform,
                    "unsupported search scope",
                )]
            }
        };
        let filter = match convert_filter(&request.filter) {
            Ok(filter) => filter,
            Err(unsupported) => {
                return vec![search_done(
                    request.msgid,
                    LdapResultCode::UnwillingToPerform,
                    unsupported,
                )]
            }
        };

        let store = read_store(&self.store);
        match store.search(&request.base, scope, &filter, &request.attrs) {
            Ok(entries) => {
                let mut replies: Vec<LdapMsg> = entries
                    .iter()
                    .map(|entry| request.gen_result_entry(to_result_entry(entry)))
                    .collect();
                replies.push(request.gen_success());
                replies
            }
            Err(StoreError::NoSuchEntry(dn)) => vec![search_done(
                request.msgid,
                LdapResultCode::NoSuchObject,
                format!("no such entry: {dn}"),
            )],
            Err(StoreError::InvalidDn(err)) => vec![search_done(
                request.msgid,
                LdapResultCode::InvalidDNSyntax,
                err.to_string(),
            )],
            Err(other) => vec![search_done(
                request.msgid,
                LdapResultCode::Other,
                other.to_string(),
            )],
        }
    }
}

fn dn_equal(left: &str, right: &str) -> bool {
    match (
        DistinguishedName::parse(left),
        DistinguishedName::parse(right),
    ) {
        (Ok(left), Ok(right)) => left.matches(&right),
        _ => left == right,
    }
}

fn search_done(msgid: i32, code: LdapResultCode, message: impl Into<String>) -> LdapMsg {
    LdapMsg {
        msgid,
        op: LdapOp::SearchResultDone(LdapResult {
            code,
            matcheddn: String::new(),
            message: message.into(),
            referral: Vec::new(),
        }),
        ctrl: Vec::new(),
    }
}

fn to_result_entry(entry: &DirectoryEntry) -> LdapSearchResultEntry {
    LdapSearchResultEntry {
        dn: entry.dn().to_string(),
        attributes: entry
            .attributes()
            .map(|attribute| LdapPartialAttribute {
                atype: attribute.name().to_string(),
                vals: attribute
                    .values()
                    .iter()
                    .map(|value| value.as_bytes().to_vec())
                    .collect(),
            })
            .collect(),
    }
}

/// Maps the wire filter onto the subset the store evaluates.
fn convert_filter(filter: &LdapFilter) -> std::result::Result<SearchFilter, String> {
    match filter {
        LdapFilter::Present(attribute) => Ok(SearchFilter::Present(attribute.clone())),
        LdapFilter::Equality(attribute, value) => {
            Ok(SearchFilter::Equality(attribute.clone(), value.clone()))
        }
        LdapFilter::And(filters) => Ok(SearchFilter::And(
            filters
                .iter()
                .map(convert_filter)
                .collect::<std::result::Result<_, _>>()?,
        )),
        LdapFilter::Or(filters) => Ok(SearchFilter::Or(
            filters
                .iter()
                .map(convert_filter)
                .collect::<std::result::Result<_, _>>()?,
        )),
        LdapFilter::Not(inner) => Ok(SearchFilter::Not(Box::new(convert_filter(inner)?))),
        other => Err(format!("unsupported search filter: {other:?}")),
    }
}
