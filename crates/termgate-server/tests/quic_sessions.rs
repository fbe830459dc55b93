//! End-to-end sessions over a real QUIC endpoint.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use quinn::{ConnectionError, VarInt};
use rustls::pki_types::CertificateDer;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use termgate_core::Error;
use termgate_core::constants::{CLOSE_PROTOCOL_ERROR, CLOSE_UNAUTHORIZED};
use termgate_core::protocol::Geometry;
use termgate_server::{Listener, ListenerConfig, ReadEvent, SessionHandler, TerminalSession, show_terminal};
use termgate_test_utils::{ClientIdentity, QuicTestClient, TestPki, connect_quic};

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct TestServer {
    addr: SocketAddr,
    cert: CertificateDer<'static>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<termgate_core::Result<()>>,
}

impl TestServer {
    async fn start<H: SessionHandler>(pki: &TestPki, handler: H) -> Self {
        Self::start_with(pki, ListenerConfig::new("127.0.0.1:0".parse().unwrap()), handler).await
    }

    async fn start_with<H: SessionHandler>(pki: &TestPki, config: ListenerConfig, handler: H) -> Self {
        termgate_core::logging::init_test_logging();
        let credentials = Arc::new(pki.credential_store());
        let cert = credentials.identity().0[0].clone();
        let listener = Listener::bind(config, credentials).await.unwrap();
        let addr = listener.local_addr();

        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(listener.serve(handler, async move {
            let _ = stop_rx.await;
        }));

        Self { addr, cert, stop, task }
    }

    async fn connect(&self, identity: Option<&ClientIdentity>) -> termgate_core::Result<QuicTestClient> {
        tokio::time::timeout(STEP_TIMEOUT, connect_quic(self.addr, &self.cert, identity))
            .await
            .expect("connect timed out")
    }

    async fn stop(self) {
        let _ = self.stop.send(());
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

#[derive(Debug, PartialEq)]
enum Observed {
    Opened { term_type: String, geometry: Geometry },
    Read(ReadEvent),
}

/// Report everything the session sees until end of input.
async fn record(mut session: TerminalSession, observed: mpsc::UnboundedSender<Observed>) -> termgate_core::Result<()> {
    let _ = observed.send(Observed::Opened {
        term_type: session.term_type().to_string(),
        geometry: session.geometry(),
    });
    loop {
        let event = session.read().await?;
        let done = event == ReadEvent::Eof;
        if let ReadEvent::Resized(geometry) = &event {
            assert_eq!(session.geometry(), *geometry);
        }
        let _ = observed.send(Observed::Read(event));
        if done {
            return Ok(());
        }
    }
}

async fn next(observed: &mut mpsc::UnboundedReceiver<Observed>) -> Observed {
    tokio::time::timeout(STEP_TIMEOUT, observed.recv())
        .await
        .expect("handler made no progress")
        .expect("handler channel closed")
}

fn counting_handler(
    invoked: Arc<AtomicUsize>,
) -> impl Fn(TerminalSession) -> std::future::Ready<termgate_core::Result<()>> + Send + Sync + 'static {
    move |_session: TerminalSession| {
        invoked.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(()))
    }
}

async fn assert_closed_without_session(client: termgate_core::Result<QuicTestClient>) {
    let Ok(client) = client else {
        // Rejected during the TLS handshake.
        return;
    };

    if let Ok(mut channel) = client.open_channel().await {
        let opened = tokio::time::timeout(STEP_TIMEOUT, channel.open("xterm", Geometry::new(80, 24)))
            .await
            .expect("open should fail promptly");
        assert!(opened.is_err());
    }

    tokio::time::timeout(STEP_TIMEOUT, client.connection.closed())
        .await
        .expect("server should close the connection");
}

#[tokio::test]
async fn trusted_client_session_sees_resize_input_and_eof() {
    let pki = TestPki::generate();
    let (observed_tx, mut observed) = mpsc::unbounded_channel();
    let server = TestServer::start(&pki, move |session: TerminalSession| record(session, observed_tx.clone())).await;

    let client = server.connect(Some(&pki.trusted_client("alice"))).await.unwrap();
    let mut channel = client.open_channel().await.unwrap();
    channel.open("xterm-256color", Geometry::new(80, 24)).await.unwrap();

    assert_eq!(
        next(&mut observed).await,
        Observed::Opened {
            term_type: "xterm-256color".to_string(),
            geometry: Geometry::new(80, 24),
        }
    );

    let resized = Geometry::with_pixels(100, 40, 800, 320);
    channel.resize(resized).await.unwrap();
    assert_eq!(next(&mut observed).await, Observed::Read(ReadEvent::Resized(resized)));

    channel.send_input(b"hello\n").await.unwrap();
    assert_eq!(
        next(&mut observed).await,
        Observed::Read(ReadEvent::Data(Bytes::from_static(b"hello\n")))
    );

    channel.eof().await.unwrap();
    assert_eq!(next(&mut observed).await, Observed::Read(ReadEvent::Eof));

    let (output, status) = tokio::time::timeout(STEP_TIMEOUT, channel.read_until_exit())
        .await
        .unwrap()
        .unwrap();
    assert!(output.is_empty());
    assert_eq!(status, Some(0));

    client.connection.close(VarInt::from_u32(0), b"done");
    server.stop().await;
}

#[tokio::test]
async fn show_terminal_end_to_end() {
    let pki = TestPki::generate();
    let server = TestServer::start(&pki, show_terminal).await;

    let client = server.connect(Some(&pki.trusted_client("alice"))).await.unwrap();
    let mut channel = client.open_channel().await.unwrap();
    channel.open("xterm", Geometry::with_pixels(80, 24, 640, 384)).await.unwrap();

    let banner = channel.read_output_until(b"window!\r\n").await.unwrap();
    assert_eq!(
        banner,
        b"Terminal type: xterm, size: 80x24 (640x384 pixels)\r\nTry resizing your window!\r\n"
    );

    channel.resize(Geometry::new(120, 50)).await.unwrap();
    let line = channel.read_output_until(b"\r\n").await.unwrap();
    assert_eq!(line, b"New window size: 120x50\r\n");

    channel.eof().await.unwrap();
    let (_, status) = channel.read_until_exit().await.unwrap();
    assert_eq!(status, Some(0));

    client.connection.close(VarInt::from_u32(0), b"done");
    server.stop().await;
}

#[tokio::test]
async fn concurrent_sessions_are_independent() {
    let pki = TestPki::generate();
    let server = TestServer::start(&pki, show_terminal).await;

    let first = server.connect(Some(&pki.trusted_client("alice"))).await.unwrap();
    let second = server.connect(Some(&pki.trusted_client("bob"))).await.unwrap();
    let mut first_channel = first.open_channel().await.unwrap();
    let mut second_channel = second.open_channel().await.unwrap();
    let first_id = first_channel.open("vt100", Geometry::new(80, 24)).await.unwrap();
    let second_id = second_channel.open("vt220", Geometry::new(132, 43)).await.unwrap();
    assert_ne!(first_id, second_id);

    let banner = second_channel.read_output_until(b"window!\r\n").await.unwrap();
    assert!(banner.starts_with(b"Terminal type: vt220, size: 132x43"));

    // Dropping the first connection must not disturb the second session.
    first.connection.close(VarInt::from_u32(0), b"gone");

    second_channel.resize(Geometry::new(100, 30)).await.unwrap();
    let line = second_channel.read_output_until(b"\r\n").await.unwrap();
    assert_eq!(line, b"New window size: 100x30\r\n");

    second_channel.eof().await.unwrap();
    let (_, status) = second_channel.read_until_exit().await.unwrap();
    assert_eq!(status, Some(0));

    second.connection.close(VarInt::from_u32(0), b"done");
    server.stop().await;
}

#[tokio::test]
async fn untrusted_certificate_never_reaches_handler() {
    let pki = TestPki::generate();
    let invoked = Arc::new(AtomicUsize::new(0));
    let server = TestServer::start(&pki, counting_handler(Arc::clone(&invoked))).await;

    let rogue = TestPki::rogue_client("mallory");
    assert_closed_without_session(server.connect(Some(&rogue)).await).await;

    let foreign = TestPki::generate().trusted_client("eve");
    assert_closed_without_session(server.connect(Some(&foreign)).await).await;

    let expired = pki.expired_client("bob");
    assert_closed_without_session(server.connect(Some(&expired)).await).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    server.stop().await;
}

#[tokio::test]
async fn missing_certificate_is_closed_as_unauthorized() {
    let pki = TestPki::generate();
    let invoked = Arc::new(AtomicUsize::new(0));
    let server = TestServer::start(&pki, counting_handler(Arc::clone(&invoked))).await;

    let client = server.connect(None).await.unwrap();
    let reason = tokio::time::timeout(STEP_TIMEOUT, client.connection.closed())
        .await
        .expect("server should close the connection");

    match reason {
        ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, VarInt::from_u32(CLOSE_UNAUTHORIZED));
        }
        other => panic!("unexpected close reason: {other}"),
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    server.stop().await;
}

#[tokio::test]
async fn silent_client_times_out_before_open() {
    let pki = TestPki::generate();
    let invoked = Arc::new(AtomicUsize::new(0));
    let mut config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
    config.open_timeout = Duration::from_millis(200);
    let server = TestServer::start_with(&pki, config, counting_handler(Arc::clone(&invoked))).await;

    let client = server.connect(Some(&pki.trusted_client("alice"))).await.unwrap();
    let reason = tokio::time::timeout(STEP_TIMEOUT, client.connection.closed())
        .await
        .expect("server should close the connection");

    match reason {
        ConnectionError::ApplicationClosed(close) => {
            assert_eq!(close.error_code, VarInt::from_u32(CLOSE_PROTOCOL_ERROR));
        }
        other => panic!("unexpected close reason: {other}"),
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    server.stop().await;
}

#[tokio::test]
async fn handler_error_reports_failure_status() {
    let pki = TestPki::generate();
    let server = TestServer::start(&pki, |session: TerminalSession| async move {
        session.write_str("refusing\r\n").await?;
        Err::<(), _>(Error::Protocol {
            message: "not today".to_string(),
        })
    })
    .await;

    let client = server.connect(Some(&pki.trusted_client("alice"))).await.unwrap();
    let mut channel = client.open_channel().await.unwrap();
    channel.open("xterm", Geometry::new(80, 24)).await.unwrap();

    let (output, status) = channel.read_until_exit().await.unwrap();
    assert_eq!(output, b"refusing\r\n");
    assert_eq!(status, Some(1));

    client.connection.close(VarInt::from_u32(0), b"done");
    server.stop().await;
}
