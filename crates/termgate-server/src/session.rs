//! Terminal session: one authenticated interactive channel.
//!
//! Input and resize notifications arrive on a single ordered stream. An
//! inbound pump task decodes frames into a bounded queue; `read` pulls from
//! that queue so a resize always surfaces in the position the client sent
//! it. Output goes through a bounded queue drained by a writer task, so a
//! slow peer never stalls resize delivery.

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use termgate_core::constants::{INPUT_QUEUE_CAPACITY, OUTPUT_QUEUE_CAPACITY, SHUTDOWN_GRACE};
use termgate_core::protocol::{ExitPayload, Geometry, Message, MessageReader, MessageWriter, OpenPayload, SessionId};
use termgate_core::{Error, Result};

/// Outcome of a read on the session input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadEvent {
    /// Input bytes from the client.
    Data(Bytes),
    /// The client resized its terminal. The session geometry already holds
    /// this value when the event is returned.
    Resized(Geometry),
    /// The client closed its output half.
    Eof,
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    EofPending,
    Closed,
}

/// Informational details about the connected peer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerInfo {
    /// Remote transport address, when the session runs over a network.
    pub remote_addr: Option<SocketAddr>,
    /// SHA-256 fingerprint of the client's end-entity certificate.
    pub cert_fingerprint: Option<String>,
}

/// Attributes negotiated when the channel was opened.
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub id: SessionId,
    pub term_type: String,
    pub geometry: Geometry,
    pub env: Vec<(String, String)>,
    pub peer: PeerInfo,
}

impl SessionParams {
    /// Build parameters from the client's `Open` request.
    pub fn from_open(id: SessionId, open: OpenPayload, peer: PeerInfo) -> Self {
        Self {
            id,
            term_type: open.term_type,
            geometry: open.geometry,
            env: open.env,
            peer,
        }
    }
}

enum Inbound {
    Data(Bytes),
    Resize(Geometry),
    Eof,
}

enum Outbound {
    Data(Bytes),
    Finish(i32),
}

struct SessionShared {
    /// Session ID (for logging).
    id: SessionId,
    /// Set once the session is closed; never reset.
    closed: watch::Sender<bool>,
    /// Writer task, taken by whoever finishes the session.
    writer_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionShared {
    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Returns true if this call performed the transition.
    fn mark_closed(&self) -> bool {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            debug!(session_id = %self.id, "Session closed");
        }
        !was_closed
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // A dropped sender also means the session is gone.
    let _ = closed.wait_for(|closed| *closed).await;
}

/// A live interactive session handed to a session handler.
pub struct TerminalSession {
    shared: Arc<SessionShared>,
    term_type: String,
    env: Vec<(String, String)>,
    peer: PeerInfo,
    geometry: watch::Sender<Geometry>,
    state: SessionState,
    inbound_rx: mpsc::Receiver<Inbound>,
    /// Bytes held back by `read_line`.
    pending: BytesMut,
    output: SessionOutput,
}

impl TerminalSession {
    /// Start a session over an already-opened channel.
    ///
    /// Spawns the inbound pump and outbound writer tasks, so this must be
    /// called from within a Tokio runtime.
    pub fn open<R, W>(params: SessionParams, reader: MessageReader<R>, writer: MessageWriter<W>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (closed, _) = watch::channel(false);
        let shared = Arc::new(SessionShared {
            id: params.id,
            closed,
            writer_task: Mutex::new(None),
        });

        let (inbound_tx, inbound_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTPUT_QUEUE_CAPACITY);

        tokio::spawn(run_pump(reader, inbound_tx, Arc::clone(&shared)));
        let writer_task = tokio::spawn(run_writer(writer, outbound_rx, Arc::clone(&shared)));
        if let Ok(mut slot) = shared.writer_task.lock() {
            *slot = Some(writer_task);
        }

        debug!(
            session_id = %params.id,
            term_type = %params.term_type,
            geometry = %params.geometry,
            "Session opened"
        );

        let (geometry, _) = watch::channel(params.geometry);
        Self {
            output: SessionOutput {
                shared: Arc::clone(&shared),
                tx: outbound_tx,
            },
            shared,
            term_type: params.term_type,
            env: params.env,
            peer: params.peer,
            geometry,
            state: SessionState::Open,
            inbound_rx,
            pending: BytesMut::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Terminal type requested at open.
    pub fn term_type(&self) -> &str {
        &self.term_type
    }

    /// Environment variables requested at open.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    /// Current terminal geometry.
    pub fn geometry(&self) -> Geometry {
        *self.geometry.borrow()
    }

    pub fn state(&self) -> SessionState {
        if self.shared.is_closed() {
            SessionState::Closed
        } else {
            self.state
        }
    }

    /// Subscribe to geometry changes.
    ///
    /// The receiver observes a new value each time a resize is delivered
    /// through `read` or `read_line`.
    pub fn resize_events(&self) -> watch::Receiver<Geometry> {
        self.geometry.subscribe()
    }

    /// Read the next input event.
    ///
    /// Suspends until input bytes arrive, a resize arrives, the client
    /// closes its output half, or the session closes. Events queued before
    /// the session closed are still returned once; after that every call
    /// fails with `Error::SessionClosed`.
    pub async fn read(&mut self) -> Result<ReadEvent> {
        if !self.pending.is_empty() {
            return Ok(ReadEvent::Data(self.pending.split().freeze()));
        }
        self.next_event().await
    }

    /// Read one line of input, including the trailing `\n`.
    ///
    /// A resize interrupts the read and is returned as-is; the partial line
    /// stays buffered for the next call. At end of input, or when the session
    /// closes, any partial line is returned as `Data` before `Eof` or the
    /// error.
    pub async fn read_line(&mut self) -> Result<ReadEvent> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                return Ok(ReadEvent::Data(self.pending.split_to(pos + 1).freeze()));
            }

            let event = match self.next_event().await {
                Ok(event) => event,
                // A partial line received before the close is still delivered once.
                Err(Error::SessionClosed) if !self.pending.is_empty() => {
                    return Ok(ReadEvent::Data(self.pending.split().freeze()));
                }
                Err(e) => return Err(e),
            };

            match event {
                ReadEvent::Data(bytes) => self.pending.extend_from_slice(&bytes),
                ReadEvent::Eof if !self.pending.is_empty() => {
                    return Ok(ReadEvent::Data(self.pending.split().freeze()));
                }
                other => return Ok(other),
            }
        }
    }

    async fn next_event(&mut self) -> Result<ReadEvent> {
        match self.state {
            SessionState::EofPending if self.shared.is_closed() => return Err(Error::SessionClosed),
            SessionState::EofPending => return Ok(ReadEvent::Eof),
            SessionState::Closed => return Err(Error::SessionClosed),
            SessionState::Open => {}
        }

        match self.inbound_rx.recv().await {
            Some(Inbound::Data(bytes)) => Ok(ReadEvent::Data(bytes)),
            Some(Inbound::Resize(geometry)) => {
                self.geometry.send_replace(geometry);
                trace!(session_id = %self.shared.id, %geometry, "Resize delivered");
                Ok(ReadEvent::Resized(geometry))
            }
            Some(Inbound::Eof) => {
                self.state = SessionState::EofPending;
                Ok(ReadEvent::Eof)
            }
            None => {
                // The pump only stops without queuing Eof when the session closed.
                self.shared.mark_closed();
                self.state = SessionState::Closed;
                Err(Error::SessionClosed)
            }
        }
    }

    /// Queue bytes for the client.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        self.output.write(data).await
    }

    pub async fn write_str(&self, s: &str) -> Result<()> {
        self.output.write_str(s).await
    }

    /// Cloneable output handle, for producing output from another task.
    pub fn output(&self) -> SessionOutput {
        self.output.clone()
    }

    /// Handle that can close or finish this session from outside.
    pub fn closer(&self) -> SessionCloser {
        SessionCloser {
            shared: Arc::clone(&self.shared),
            tx: self.output.tx.clone(),
        }
    }

    /// Close the session, failing pending and future operations.
    pub fn close(&self) {
        self.shared.mark_closed();
    }

    /// Flush queued output, report `status` to the client and end the session.
    pub async fn finish(self, status: i32) {
        self.closer().finish(status).await;
    }
}

impl fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.shared.id)
            .field("term_type", &self.term_type)
            .field("geometry", &self.geometry())
            .field("state", &self.state())
            .finish()
    }
}

/// Cloneable writer for a session's output stream.
#[derive(Clone)]
pub struct SessionOutput {
    shared: Arc<SessionShared>,
    tx: mpsc::Sender<Outbound>,
}

impl SessionOutput {
    /// Queue bytes for the client.
    ///
    /// Suspends only while the outbound queue is full. Fails with
    /// `Error::SessionClosed` once the session is closed.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        if self.shared.is_closed() {
            return Err(Error::SessionClosed);
        }

        let mut closed = self.shared.closed.subscribe();
        tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => Err(Error::SessionClosed),
            sent = self.tx.send(Outbound::Data(data.into())) => sent.map_err(|_| Error::SessionClosed),
        }
    }

    pub async fn write_str(&self, s: &str) -> Result<()> {
        self.write(Bytes::copy_from_slice(s.as_bytes())).await
    }
}

/// Handle used by the dispatcher to end a session it no longer owns.
#[derive(Clone)]
pub struct SessionCloser {
    shared: Arc<SessionShared>,
    tx: mpsc::Sender<Outbound>,
}

impl SessionCloser {
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Close immediately, dropping queued output.
    pub fn close(&self) {
        self.shared.mark_closed();
    }

    /// Flush queued output, send the exit status and finish the stream.
    ///
    /// Bounded by `SHUTDOWN_GRACE`; the session is closed afterwards either
    /// way.
    pub async fn finish(&self, status: i32) {
        if !self.shared.is_closed() {
            let queued = tokio::time::timeout(SHUTDOWN_GRACE, self.tx.send(Outbound::Finish(status))).await;
            if !matches!(queued, Ok(Ok(()))) {
                debug!(session_id = %self.shared.id, "Could not queue exit status");
            }
        }

        let writer_task = self.shared.writer_task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = writer_task {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!(session_id = %self.shared.id, "Output did not drain before shutdown grace");
            }
        }

        self.shared.mark_closed();
    }
}

// =============================================================================
// Background tasks
// =============================================================================

async fn run_pump<R>(mut reader: MessageReader<R>, tx: mpsc::Sender<Inbound>, shared: Arc<SessionShared>)
where
    R: AsyncRead + Unpin,
{
    let mut closed = shared.closed.subscribe();

    loop {
        let received = tokio::select! {
            _ = wait_closed(&mut closed) => break,
            received = reader.recv() => received,
        };

        let (event, last) = match received {
            Ok(Some(Message::Data(payload))) => (Inbound::Data(Bytes::from(payload.data)), false),
            Ok(Some(Message::Resize(geometry))) => {
                debug!(session_id = %shared.id, %geometry, "Resize received");
                (Inbound::Resize(geometry), false)
            }
            Ok(Some(Message::Eof)) | Ok(None) => (Inbound::Eof, true),
            Ok(Some(other)) => {
                warn!(session_id = %shared.id, kind = other.kind(), "Ignoring unexpected message");
                continue;
            }
            Err(e) => {
                debug!(session_id = %shared.id, error = %e, "Session input failed");
                shared.mark_closed();
                break;
            }
        };

        tokio::select! {
            _ = wait_closed(&mut closed) => break,
            sent = tx.send(event) => {
                if sent.is_err() {
                    // Reader side dropped (handler finished).
                    break;
                }
            }
        }

        if last {
            break;
        }
    }

    trace!(session_id = %shared.id, "Input pump stopped");
}

async fn run_writer<W>(mut writer: MessageWriter<W>, mut rx: mpsc::Receiver<Outbound>, shared: Arc<SessionShared>)
where
    W: AsyncWrite + Unpin,
{
    let mut closed = shared.closed.subscribe();

    loop {
        let item = tokio::select! {
            biased;
            _ = wait_closed(&mut closed) => break,
            item = rx.recv() => item,
        };

        match item {
            Some(Outbound::Data(bytes)) => {
                if let Err(e) = writer.send(&Message::data(bytes.to_vec())).await {
                    debug!(session_id = %shared.id, error = %e, "Session output failed");
                    shared.mark_closed();
                    break;
                }
            }
            Some(Outbound::Finish(status)) => {
                if let Err(e) = writer.send(&Message::Exit(ExitPayload { status })).await {
                    debug!(session_id = %shared.id, error = %e, "Failed to send exit status");
                }
                let _ = writer.finish().await;
                break;
            }
            None => {
                let _ = writer.finish().await;
                break;
            }
        }
    }

    trace!(session_id = %shared.id, "Output writer stopped");
}
