//! termgate-test-utils: Test infrastructure for termgate.
//!
//! Provides:
//! - TestPki: freshly generated CA, client and server credentials
//! - SimulatedClient: a protocol-speaking client over in-memory pipes or QUIC
//! - connect_quic: a mutual-TLS QUIC client for end-to-end tests

mod client;
mod pki;

pub use client::{QuicTestClient, SimulatedClient, connect_quic, duplex_channel};
pub use pki::{ClientIdentity, PemFiles, TestPki};
