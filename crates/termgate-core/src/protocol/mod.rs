//! Wire protocol for the interactive channel.
//!
//! This module provides:
//! - Message types and payloads
//! - Length-prefixed bincode codec
//! - Framed reader/writer over async byte streams

mod codec;
mod message;
mod stream;
mod types;

pub use codec::{Codec, FRAME_HEADER_LEN};
pub use message::*;
pub use stream::{MessageReader, MessageWriter};
pub use types::*;
