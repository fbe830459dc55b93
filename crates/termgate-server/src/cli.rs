//! Server CLI implementation.
//!
//! Provides command-line argument parsing for the termgate server.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use termgate_core::constants::{DEFAULT_PORT, KEEP_ALIVE_INTERVAL, OPEN_TIMEOUT};

use crate::listener::ListenerConfig;

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for termgate_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => termgate_core::LogFormat::Text,
            CliLogFormat::Json => termgate_core::LogFormat::Json,
        }
    }
}

/// termgate server - certificate-authenticated terminal sessions over QUIC.
#[derive(Debug, Parser)]
#[command(
    name = "termgate-server",
    version,
    about = "termgate server - certificate-authenticated terminal sessions over QUIC"
)]
pub struct Cli {
    /// Address to listen on
    #[arg(short = 'b', long = "bind", default_value = "0.0.0.0")]
    pub bind_addr: IpAddr,

    /// Port to listen on
    #[arg(short = 'p', long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Server identity private key (PEM format)
    #[arg(short = 'k', long = "key", value_name = "FILE", env = "TERMGATE_KEY")]
    pub key_file: PathBuf,

    /// Server certificate (PEM format); self-signed from the key if omitted
    #[arg(short = 'c', long = "cert", value_name = "FILE", env = "TERMGATE_CERT")]
    pub cert_file: Option<PathBuf>,

    /// Certificate authority that client certificates must chain to (PEM format)
    #[arg(long = "ca", value_name = "FILE", env = "TERMGATE_CA")]
    pub ca_file: PathBuf,

    /// Close connections idle for this long (seconds)
    #[arg(
        long = "idle-timeout-secs",
        default_value = "30",
        value_name = "SECONDS",
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub idle_timeout_secs: u64,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text")]
    pub log_format: CliLogFormat,
}

impl Cli {
    /// Get the socket address to bind to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Listener settings derived from the command line.
    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            bind_addr: self.socket_addr(),
            idle_timeout: self.idle_timeout(),
            keep_alive_interval: KEEP_ALIVE_INTERVAL.min(self.idle_timeout() / 2),
            open_timeout: OPEN_TIMEOUT,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
