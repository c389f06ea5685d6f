//! # Revtun
//!
//! A reverse TCP tunnel: expose a TCP service running inside a private
//! network through a publicly reachable host, without the service having
//! any inbound reachability.
//!
//! Two processes share one engine:
//!
//! - the **listener** runs on the public host and accepts a signaling
//!   connection from the connector,
//! - the **connector** runs next to the private service, dials the listener
//!   and asks it to expose a target.
//!
//! ```text
//! ┌────────┐         ┌─────────────────┐          ┌─────────────────┐
//! │ client │──TCP───▶│ listener        │          │ connector       │
//! └────────┘         │  public port P  │◀──sig───│  dials target   │──TCP──▶ service
//!                    └─────────────────┘          └─────────────────┘
//! ```
//!
//! All client↔service streams are multiplexed over the single signaling
//! connection as length-prefixed control frames; see [`protocol`] for the
//! wire format and [`tunnel`] for the engine.

pub mod config;
pub mod protocol;
pub mod tunnel;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Target port assumed when the connector's `host[:port]` spec has no port.
pub const DEFAULT_TARGET_PORT: u16 = 443;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),
}
