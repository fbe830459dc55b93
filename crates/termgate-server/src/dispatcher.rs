//! Session dispatch.
//!
//! Every session runs its handler on a dedicated task. The handler is nested
//! in a second task so a panic surfaces as a `JoinError` here instead of
//! unwinding through the listener.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use termgate_core::Result;

use crate::session::TerminalSession;

/// Exit status reported when the handler returns `Ok`.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit status reported when the handler fails or panics.
pub const EXIT_FAILURE: i32 = 1;

/// Application logic run once per accepted session.
pub trait SessionHandler: Send + Sync + 'static {
    fn handle(&self, session: TerminalSession) -> impl Future<Output = Result<()>> + Send;
}

impl<F, Fut> SessionHandler for F
where
    F: Fn(TerminalSession) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, session: TerminalSession) -> impl Future<Output = Result<()>> + Send {
        (self)(session)
    }
}

/// Runs a handler for each session, isolated from every other session.
pub struct SessionDispatcher<H> {
    handler: Arc<H>,
    /// Number of handlers still running.
    active: Arc<watch::Sender<usize>>,
}

impl<H: SessionHandler> SessionDispatcher<H> {
    pub fn new(handler: H) -> Self {
        let (active, _) = watch::channel(0);
        Self {
            handler: Arc::new(handler),
            active: Arc::new(active),
        }
    }

    /// Run the handler for `session` on its own task.
    ///
    /// The returned handle completes once the handler has returned and the
    /// session has been finished.
    pub fn dispatch(&self, session: TerminalSession) -> JoinHandle<()> {
        let handler = Arc::clone(&self.handler);
        let active = Arc::clone(&self.active);
        let closer = session.closer();
        let session_id = session.id();

        info!(
            %session_id,
            term_type = %session.term_type(),
            geometry = %session.geometry(),
            peer = ?session.peer().remote_addr,
            "Session started"
        );

        active.send_modify(|count| *count += 1);

        tokio::spawn(async move {
            let outcome = tokio::spawn(async move { handler.handle(session).await }).await;

            let status = match outcome {
                Ok(Ok(())) => {
                    debug!(%session_id, "Session handler finished");
                    EXIT_SUCCESS
                }
                Ok(Err(e)) if e.is_session_local() => {
                    debug!(%session_id, error = %e, "Session handler stopped");
                    EXIT_FAILURE
                }
                Ok(Err(e)) => {
                    warn!(%session_id, error = %e, "Session handler failed");
                    EXIT_FAILURE
                }
                Err(e) if e.is_panic() => {
                    error!(%session_id, "Session handler panicked");
                    EXIT_FAILURE
                }
                Err(e) => {
                    warn!(%session_id, error = %e, "Session handler cancelled");
                    EXIT_FAILURE
                }
            };

            closer.finish(status).await;
            active.send_modify(|count| *count -= 1);
            info!(%session_id, status, "Session ended");
        })
    }

    /// Number of handlers currently running.
    pub fn active_sessions(&self) -> usize {
        *self.active.borrow()
    }

    /// Wait until no handler is running.
    pub async fn wait_idle(&self) {
        let mut active = self.active.subscribe();
        let _ = active.wait_for(|count| *count == 0).await;
    }
}
