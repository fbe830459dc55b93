//! termgate-core: shared library for the termgate terminal server.
//!
//! This crate provides:
//! - Protocol message definitions and wire format codec
//! - Credential store (server identity and client trust anchor)
//! - Error taxonomy
//! - Logging setup

pub mod constants;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod protocol;

pub use credentials::CredentialStore;
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
pub use protocol::{Geometry, SessionId};
