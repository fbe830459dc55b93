//! Protocol and configuration constants for termgate.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// ALPN identifier for QUIC connections.
pub const ALPN: &[u8] = b"termgate/1";

/// Maximum frame payload size (1 MiB).
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8022;

/// Server name used for the generated self-signed identity certificate.
pub const DEFAULT_SERVER_NAME: &str = "localhost";

// =============================================================================
// Session Constants
// =============================================================================

/// Capacity of the per-session outbound write queue.
pub const OUTPUT_QUEUE_CAPACITY: usize = 256;

/// Capacity of the per-session inbound event queue.
pub const INPUT_QUEUE_CAPACITY: usize = 64;

/// Read chunk size for the inbound frame pump.
pub const READ_CHUNK_SIZE: usize = 8192;

// =============================================================================
// Timing Constants
// =============================================================================

/// QUIC idle timeout.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Keep-alive interval (must stay well below the idle timeout).
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Time a client has to send `Open` after the handshake.
pub const OPEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace period for in-flight connections at shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

// =============================================================================
// Close Codes
// =============================================================================

/// Application close code: normal shutdown.
pub const CLOSE_NORMAL: u32 = 0;

/// Application close code: client certificate rejected.
pub const CLOSE_UNAUTHORIZED: u32 = 1;

/// Application close code: protocol violation before the session opened.
pub const CLOSE_PROTOCOL_ERROR: u32 = 2;
