//! Built-in session handlers.

use tracing::debug;

use termgate_core::Result;

use crate::session::{ReadEvent, TerminalSession};

/// Report the terminal type and size, then every resize until end of input.
pub async fn show_terminal(mut session: TerminalSession) -> Result<()> {
    session
        .write(format!(
            "Terminal type: {}, size: {}\r\nTry resizing your window!\r\n",
            session.term_type(),
            session.geometry()
        ))
        .await?;

    loop {
        match session.read().await? {
            ReadEvent::Data(bytes) => {
                debug!(session_id = %session.id(), len = bytes.len(), "Ignoring input");
            }
            ReadEvent::Resized(geometry) => {
                session.write(format!("New window size: {}\r\n", geometry)).await?;
            }
            ReadEvent::Eof => return Ok(()),
        }
    }
}
