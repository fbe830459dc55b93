//! Simulated terminal client.
//!
//! Speaks the termgate wire protocol from the client side, either over an
//! in-memory duplex pipe pair or a real QUIC stream.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, DuplexStream};

use rustls::RootCertStore;
use rustls::pki_types::CertificateDer;
use termgate_core::constants::{ALPN, DEFAULT_SERVER_NAME};
use termgate_core::protocol::{Geometry, Message, MessageReader, MessageWriter, OpenPayload, SessionId};
use termgate_core::{Error, Result};

use crate::pki::ClientIdentity;

/// Buffer size of each in-memory pipe direction.
const PIPE_CAPACITY: usize = 64 * 1024;

/// Client end of one interactive channel.
pub struct SimulatedClient<R = DuplexStream, W = DuplexStream> {
    reader: MessageReader<R>,
    writer: MessageWriter<W>,
}

/// Create a connected in-memory channel.
///
/// Returns the client end and the server-side reader and writer, ready to
/// be handed to a session.
pub fn duplex_channel() -> (SimulatedClient, MessageReader<DuplexStream>, MessageWriter<DuplexStream>) {
    let (client_out, server_in) = tokio::io::duplex(PIPE_CAPACITY);
    let (server_out, client_in) = tokio::io::duplex(PIPE_CAPACITY);
    (
        SimulatedClient::new(client_in, client_out),
        MessageReader::new(server_in),
        MessageWriter::new(server_out),
    )
}

impl<R, W> SimulatedClient<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: MessageReader::new(reader),
            writer: MessageWriter::new(writer),
        }
    }

    /// Send `Open` and wait for the server's `OpenAck`.
    pub async fn open(&mut self, term_type: &str, geometry: Geometry) -> Result<SessionId> {
        self.send(&Message::Open(OpenPayload {
            term_type: term_type.to_string(),
            geometry,
            env: Vec::new(),
        }))
        .await?;

        match self.recv().await? {
            Some(Message::OpenAck(ack)) => Ok(ack.session_id),
            Some(other) => Err(Error::Protocol {
                message: format!("expected OpenAck, got {}", other.kind()),
            }),
            None => Err(Error::SessionClosed),
        }
    }

    pub async fn send(&mut self, msg: &Message) -> Result<()> {
        self.writer.send(msg).await
    }

    /// Send terminal input.
    pub async fn send_input(&mut self, data: &[u8]) -> Result<()> {
        self.send(&Message::data(data)).await
    }

    /// Report a new terminal size.
    pub async fn resize(&mut self, geometry: Geometry) -> Result<()> {
        self.send(&Message::Resize(geometry)).await
    }

    /// Send `Eof` and finish the outbound stream.
    pub async fn eof(&mut self) -> Result<()> {
        self.send(&Message::Eof).await?;
        self.finish().await
    }

    /// Finish the outbound stream without an explicit `Eof`.
    pub async fn finish(&mut self) -> Result<()> {
        self.writer.finish().await
    }

    /// Write half a frame and drop the connection.
    pub async fn cut_mid_frame(self) -> Result<()> {
        let mut raw = self.writer.into_inner();
        // Header announces 16 bytes; only 2 follow.
        raw.write_all(&[16, 0, 0, 0, 0xde, 0xad]).await?;
        raw.flush().await?;
        Ok(())
    }

    /// Receive the next server message.
    pub async fn recv(&mut self) -> Result<Option<Message>> {
        self.reader.recv().await
    }

    /// Collect output until the server reports an exit status or ends the
    /// stream.
    pub async fn read_until_exit(&mut self) -> Result<(Vec<u8>, Option<i32>)> {
        let mut output = Vec::new();
        loop {
            match self.recv().await? {
                Some(Message::Data(payload)) => output.extend_from_slice(&payload.data),
                Some(Message::Exit(exit)) => return Ok((output, Some(exit.status))),
                Some(other) => {
                    return Err(Error::Protocol {
                        message: format!("unexpected {} from server", other.kind()),
                    });
                }
                None => return Ok((output, None)),
            }
        }
    }

    /// Read output until `needle` has appeared, returning everything read.
    pub async fn read_output_until(&mut self, needle: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        while !output.windows(needle.len()).any(|w| w == needle) {
            match self.recv().await? {
                Some(Message::Data(payload)) => output.extend_from_slice(&payload.data),
                Some(other) => {
                    return Err(Error::Protocol {
                        message: format!("expected output, got {}", other.kind()),
                    });
                }
                None => return Err(Error::SessionClosed),
            }
        }
        Ok(output)
    }
}

// =============================================================================
// QUIC
// =============================================================================

/// A client endpoint with one established connection.
pub struct QuicTestClient {
    pub endpoint: quinn::Endpoint,
    pub connection: quinn::Connection,
}

impl QuicTestClient {
    /// Open the interactive stream.
    pub async fn open_channel(&self) -> Result<SimulatedClient<quinn::RecvStream, quinn::SendStream>> {
        let (send, recv) = self.connection.open_bi().await.map_err(transport)?;
        Ok(SimulatedClient::new(recv, send))
    }
}

/// Connect to a termgate server over QUIC.
///
/// `server_cert` is trusted directly as the server's root. With `identity`
/// set the client presents that certificate; without it no client
/// certificate is sent.
pub async fn connect_quic(
    server_addr: SocketAddr,
    server_cert: &CertificateDer<'static>,
    identity: Option<&ClientIdentity>,
) -> Result<QuicTestClient> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    roots.add(server_cert.clone()).map_err(transport)?;

    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_protocol_versions(&[&rustls::version::TLS13])
        .map_err(transport)?
        .with_root_certificates(roots);

    let mut crypto = match identity {
        Some(identity) => builder
            .with_client_auth_cert(identity.chain.clone(), identity.key.clone_key())
            .map_err(transport)?,
        None => builder.with_no_client_auth(),
    };
    crypto.alpn_protocols = vec![ALPN.to_vec()];

    let quic_crypto = quinn::crypto::rustls::QuicClientConfig::try_from(crypto).map_err(transport)?;
    let bind_addr: SocketAddr = if server_addr.is_ipv6() {
        (std::net::Ipv6Addr::LOCALHOST, 0).into()
    } else {
        (std::net::Ipv4Addr::LOCALHOST, 0).into()
    };

    let mut endpoint = quinn::Endpoint::client(bind_addr)?;
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_crypto)));

    let connection = endpoint
        .connect(server_addr, DEFAULT_SERVER_NAME)
        .map_err(transport)?
        .await
        .map_err(transport)?;

    Ok(QuicTestClient { endpoint, connection })
}

fn transport(e: impl std::fmt::Display) -> Error {
    Error::Transport { message: e.to_string() }
}
