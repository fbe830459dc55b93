//! termgate-server: certificate-authenticated terminal sessions over QUIC.
//!
//! Provides:
//! - Listener: QUIC endpoint, client certificate policy, session setup
//! - TerminalSession: ordered input with in-band resize notifications
//! - SessionDispatcher: one isolated task per session handler
//! - CLI parsing for the server binary

pub mod cli;
pub mod dispatcher;
pub mod handlers;
pub mod listener;
pub mod session;

pub use cli::{Cli, CliLogFormat};
pub use dispatcher::{EXIT_FAILURE, EXIT_SUCCESS, SessionDispatcher, SessionHandler};
pub use handlers::show_terminal;
pub use listener::{Listener, ListenerConfig, serve};
pub use session::{
    PeerInfo, ReadEvent, SessionCloser, SessionOutput, SessionParams, SessionState, TerminalSession,
};
