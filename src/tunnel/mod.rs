//! Tunnel engine - signaling and stream multiplexing
//!
//! Both peers run the same [`TunnelEngine`]; which side binds the public
//! port and which side dials the private target is decided by the messages
//! they exchange, not by the types involved.

mod acceptor;
mod engine;
mod link;
mod registry;
mod stream;

pub use acceptor::PublicAcceptor;
pub use engine::TunnelEngine;
pub use link::{ControlLink, LinkRole};
pub use registry::HandleRegistry;
pub use stream::{DataStream, StreamState};

pub use crate::protocol::Handle;

use tokio::io::{AsyncRead, AsyncWrite};

/// Read buffer size for data stream pumps (4 KiB)
pub const DATA_READ_BUFFER: usize = 4096;

/// Reliable ordered byte stream, the only thing the engine asks of a
/// transport. `TcpStream` and tokio's in-memory duplex both qualify.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> ByteStream for T {}

/// Type-erased transport handed to the engine
pub type BoxedByteStream = Box<dyn ByteStream>;
