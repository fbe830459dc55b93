//! QUIC server listener.
//!
//! Binds the endpoint, applies the client certificate policy after each
//! handshake and turns every authenticated connection into a terminal
//! session handed to the dispatcher. The accept loop only hands incoming
//! connections off; handshakes run on their own tasks.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use quinn::{IdleTimeout, VarInt};
use rustls::pki_types::CertificateDer;
use tracing::{debug, info, warn};

use termgate_core::constants::{
    CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR, CLOSE_UNAUTHORIZED, IDLE_TIMEOUT, KEEP_ALIVE_INTERVAL, OPEN_TIMEOUT,
    SHUTDOWN_GRACE,
};
use termgate_core::credentials::cert_fingerprint;
use termgate_core::protocol::{Message, MessageReader, MessageWriter, OpenAckPayload, SessionId};
use termgate_core::{CredentialStore, Error, Result};

use crate::dispatcher::{SessionDispatcher, SessionHandler};
use crate::session::{PeerInfo, SessionParams, TerminalSession};

// =============================================================================
// Listener Configuration
// =============================================================================

/// Transport settings for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Bind address for the server.
    pub bind_addr: SocketAddr,
    /// Close connections with no traffic for this long.
    pub idle_timeout: Duration,
    /// Interval between keep-alive packets.
    pub keep_alive_interval: Duration,
    /// Time a client has to open its terminal channel.
    pub open_timeout: Duration,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Self::default()
        }
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], termgate_core::constants::DEFAULT_PORT)),
            idle_timeout: IDLE_TIMEOUT,
            keep_alive_interval: KEEP_ALIVE_INTERVAL,
            open_timeout: OPEN_TIMEOUT,
        }
    }
}

// =============================================================================
// Listener
// =============================================================================

/// QUIC listener accepting certificate-authenticated terminal sessions.
pub struct Listener {
    /// QUIC endpoint.
    endpoint: quinn::Endpoint,
    /// Local address.
    local_addr: SocketAddr,
    /// Server identity and client trust anchor.
    credentials: Arc<CredentialStore>,
    /// Listener configuration.
    config: ListenerConfig,
}

impl Listener {
    /// Bind the QUIC endpoint.
    ///
    /// Fails with `Error::Bind` when the address cannot be bound and with
    /// `Error::Config` when the TLS configuration is unusable.
    pub async fn bind(config: ListenerConfig, credentials: Arc<CredentialStore>) -> Result<Self> {
        let crypto = credentials.server_crypto_config()?;
        let quic_crypto = quinn::crypto::rustls::QuicServerConfig::try_from(crypto).map_err(|e| Error::Config {
            message: format!("TLS configuration unusable for QUIC: {}", e),
        })?;

        let mut transport = quinn::TransportConfig::default();
        transport.keep_alive_interval(Some(config.keep_alive_interval));
        transport.max_idle_timeout(Some(IdleTimeout::try_from(config.idle_timeout).map_err(|e| {
            Error::Config {
                message: format!("invalid idle timeout: {}", e),
            }
        })?));
        // One interactive channel per connection.
        transport.max_concurrent_bidi_streams(VarInt::from_u32(1));
        transport.max_concurrent_uni_streams(VarInt::from_u32(0));

        let mut server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_crypto));
        server_config.transport_config(Arc::new(transport));

        let endpoint = quinn::Endpoint::server(server_config, config.bind_addr).map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;
        let local_addr = endpoint.local_addr().map_err(|source| Error::Bind {
            addr: config.bind_addr,
            source,
        })?;

        debug!(addr = %local_addr, "Endpoint bound");

        Ok(Self {
            endpoint,
            local_addr,
            credentials,
            config,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until `shutdown` resolves or the endpoint closes.
    pub async fn serve<H, S>(self, handler: H, shutdown: S) -> Result<()>
    where
        H: SessionHandler,
        S: Future<Output = ()>,
    {
        info!(
            addr = %self.local_addr,
            idle_timeout_ms = self.config.idle_timeout.as_millis() as u64,
            trust_anchors = self.credentials.anchor_count(),
            "Server starting"
        );

        let dispatcher = Arc::new(SessionDispatcher::new(handler));
        tokio::pin!(shutdown);

        loop {
            let incoming = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                incoming = self.endpoint.accept() => incoming,
            };

            let Some(incoming) = incoming else {
                info!("Endpoint closed");
                break;
            };

            let credentials = Arc::clone(&self.credentials);
            let dispatcher = Arc::clone(&dispatcher);
            let open_timeout = self.config.open_timeout;
            tokio::spawn(async move {
                let remote_addr = incoming.remote_address();
                if let Err(e) = handle_incoming(incoming, credentials, dispatcher, open_timeout).await {
                    debug!(addr = %remote_addr, error = %e, "Connection ended with error");
                }
            });
        }

        self.endpoint.close(VarInt::from_u32(CLOSE_NORMAL), b"server shutdown");
        if tokio::time::timeout(SHUTDOWN_GRACE, dispatcher.wait_idle()).await.is_err() {
            warn!(
                active = dispatcher.active_sessions(),
                "Sessions still running after shutdown grace"
            );
        }
        let _ = tokio::time::timeout(SHUTDOWN_GRACE, self.endpoint.wait_idle()).await;

        info!("Server stopped");
        Ok(())
    }
}

/// Bind `bind_addr:port` with default transport settings and serve until
/// `shutdown` resolves.
pub async fn serve<H, S>(
    bind_addr: IpAddr,
    port: u16,
    credentials: Arc<CredentialStore>,
    handler: H,
    shutdown: S,
) -> Result<()>
where
    H: SessionHandler,
    S: Future<Output = ()>,
{
    let config = ListenerConfig::new(SocketAddr::new(bind_addr, port));
    Listener::bind(config, credentials).await?.serve(handler, shutdown).await
}

// =============================================================================
// Connection Handler
// =============================================================================

async fn handle_incoming<H: SessionHandler>(
    incoming: quinn::Incoming,
    credentials: Arc<CredentialStore>,
    dispatcher: Arc<SessionDispatcher<H>>,
    open_timeout: Duration,
) -> Result<()> {
    let remote_addr = incoming.remote_address();
    let conn = incoming.await.map_err(|e| Error::Transport {
        message: format!("handshake failed: {}", e),
    })?;

    let chain = peer_certificates(&conn);
    if let Err(e) = credentials.verify(&chain) {
        warn!(addr = %remote_addr, error = %e, "Client rejected");
        conn.close(VarInt::from_u32(CLOSE_UNAUTHORIZED), b"");
        return Ok(());
    }

    let peer = PeerInfo {
        remote_addr: Some(remote_addr),
        cert_fingerprint: chain.first().map(|cert| cert_fingerprint(cert)),
    };
    info!(
        addr = %remote_addr,
        fingerprint = peer.cert_fingerprint.as_deref().unwrap_or_default(),
        "Connection authenticated"
    );

    let session = match tokio::time::timeout(open_timeout, open_session(&conn, peer)).await {
        Ok(Ok(session)) => session,
        Ok(Err(e)) => {
            conn.close(VarInt::from_u32(CLOSE_PROTOCOL_ERROR), b"bad open");
            return Err(e);
        }
        Err(_) => {
            conn.close(VarInt::from_u32(CLOSE_PROTOCOL_ERROR), b"open timeout");
            return Err(Error::Timeout);
        }
    };

    let _ = dispatcher.dispatch(session).await;

    // Let the client read the exit status and close first.
    let _ = tokio::time::timeout(SHUTDOWN_GRACE, conn.closed()).await;
    conn.close(VarInt::from_u32(CLOSE_NORMAL), b"session ended");
    Ok(())
}

/// Accept the interactive stream and complete the `Open` exchange.
async fn open_session(conn: &quinn::Connection, peer: PeerInfo) -> Result<TerminalSession> {
    let (send, recv) = conn.accept_bi().await.map_err(|e| Error::Transport {
        message: format!("failed to accept channel: {}", e),
    })?;

    let mut reader = MessageReader::new(recv);
    let mut writer = MessageWriter::new(send);

    let open = match reader.recv().await? {
        Some(Message::Open(open)) => open,
        Some(other) => {
            return Err(Error::Protocol {
                message: format!("expected Open, got {}", other.kind()),
            });
        }
        None => {
            return Err(Error::Protocol {
                message: "channel finished before Open".to_string(),
            });
        }
    };

    let id = SessionId::new();
    writer.send(&Message::OpenAck(OpenAckPayload { session_id: id })).await?;

    Ok(TerminalSession::open(SessionParams::from_open(id, open, peer), reader, writer))
}

/// Certificate chain the client presented, empty when it sent none.
fn peer_certificates(conn: &quinn::Connection) -> Vec<CertificateDer<'static>> {
    conn.peer_identity()
        .and_then(|identity| identity.downcast::<Vec<CertificateDer<'static>>>().ok())
        .map(|chain| *chain)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use termgate_test_utils::TestPki;

    fn localhost() -> ListenerConfig {
        ListenerConfig::new("127.0.0.1:0".parse().unwrap())
    }

    #[tokio::test]
    async fn bind_reports_local_addr() {
        let pki = TestPki::generate();
        let listener = Listener::bind(localhost(), Arc::new(pki.credential_store())).await.unwrap();

        let addr = listener.local_addr();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn bind_conflict_is_fatal() {
        let pki = TestPki::generate();
        let credentials = Arc::new(pki.credential_store());
        let first = Listener::bind(localhost(), Arc::clone(&credentials)).await.unwrap();

        let err = Listener::bind(ListenerConfig::new(first.local_addr()), credentials)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Bind { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let pki = TestPki::generate();
        let listener = Listener::bind(localhost(), Arc::new(pki.credential_store())).await.unwrap();

        let served = tokio::time::timeout(
            Duration::from_secs(5),
            listener.serve(|_session: TerminalSession| async { Ok::<(), Error>(()) }, async {}),
        )
        .await
        .unwrap();
        assert!(served.is_ok());
    }

    #[test]
    fn default_config() {
        let config = ListenerConfig::default();
        assert_eq!(config.bind_addr.port(), 8022);
        assert_eq!(config.idle_timeout, IDLE_TIMEOUT);
        assert!(config.keep_alive_interval < config.idle_timeout);
    }
}
