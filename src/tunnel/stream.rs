//! Data stream - one proxied application connection

use std::io;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::protocol::Message;

use super::engine::TunnelEngine;
use super::link::ControlLink;
use super::{BoxedByteStream, Handle, DATA_READ_BUFFER};

/// Stream lifecycle. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamState {
    /// Created locally, peer handle not yet known
    HalfOpen = 0,
    /// Peer handle installed, read pump running
    Open = 1,
    /// Terminal
    Closed = 2,
}

impl StreamState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => StreamState::HalfOpen,
            1 => StreamState::Open,
            _ => StreamState::Closed,
        }
    }
}

/// One proxied connection: a public client's socket on the listener side,
/// the socket to the private target on the connector side.
///
/// Identified locally by `local_handle`; the counterpart engine knows the
/// same logical stream under `peer_handle`. Immutable after the peer handle
/// is installed, except for `state`.
pub struct DataStream {
    local_handle: Handle,
    peer_handle: OnceLock<Handle>,
    link: Arc<ControlLink>,
    /// Held until the stream opens, then moved into the read pump task
    reader: StdMutex<Option<ReadHalf<BoxedByteStream>>>,
    writer: Mutex<WriteHalf<BoxedByteStream>>,
    state: AtomicU8,
}

impl DataStream {
    pub(crate) fn new(
        local_handle: Handle,
        link: Arc<ControlLink>,
        transport: BoxedByteStream,
    ) -> Arc<Self> {
        let (reader, writer) = tokio::io::split(transport);
        Arc::new(Self {
            local_handle,
            peer_handle: OnceLock::new(),
            link,
            reader: StdMutex::new(Some(reader)),
            writer: Mutex::new(writer),
            state: AtomicU8::new(StreamState::HalfOpen as u8),
        })
    }

    pub fn local_handle(&self) -> Handle {
        self.local_handle
    }

    /// The peer engine's handle for this stream, once the connect exchange
    /// has installed it
    pub fn peer_handle(&self) -> Option<Handle> {
        self.peer_handle.get().copied()
    }

    pub fn state(&self) -> StreamState {
        StreamState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn link(&self) -> &Arc<ControlLink> {
        &self.link
    }

    /// Install the peer handle and start the read pump.
    ///
    /// Returns false if the stream was not half-open; the transition runs
    /// at most once.
    pub(crate) fn open(self: &Arc<Self>, engine: &Arc<TunnelEngine>, peer_handle: Handle) -> bool {
        let transitioned = self
            .state
            .compare_exchange(
                StreamState::HalfOpen as u8,
                StreamState::Open as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if !transitioned {
            return false;
        }

        let _ = self.peer_handle.set(peer_handle);

        let Some(reader) = self.reader.lock().unwrap().take() else {
            return false;
        };

        let stream = Arc::clone(self);
        let engine = Arc::clone(engine);
        tokio::spawn(async move {
            stream.run_pump(engine, reader).await;
        });

        true
    }

    /// Read from the transport and multiplex each chunk onto the control
    /// link as a `TunnelDataIndication` addressed to the peer's handle.
    /// EOF or any transport error closes the stream and notifies the peer.
    async fn run_pump(
        self: Arc<Self>,
        engine: Arc<TunnelEngine>,
        mut reader: ReadHalf<BoxedByteStream>,
    ) {
        let peer_handle = self.peer_handle().unwrap_or(0);
        let mut buf = vec![0u8; DATA_READ_BUFFER];

        loop {
            let n = match reader.read(&mut buf).await {
                Ok(0) => {
                    trace!("stream {} transport EOF", self.local_handle);
                    engine.close_stream(self.local_handle, true).await;
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    debug!("stream {} transport read error: {}", self.local_handle, e);
                    engine.close_stream(self.local_handle, true).await;
                    return;
                }
            };

            // Closed underneath us while the read was in flight; the peer
            // is gone, so the bytes have nowhere to go.
            if self.state() == StreamState::Closed {
                return;
            }

            let msg = Message::TunnelDataIndication {
                peer_handle,
                data: Bytes::copy_from_slice(&buf[..n]),
            };
            if let Err(e) = self.link.send(&msg).await {
                debug!(
                    "stream {} lost its control link ({}), closing",
                    self.local_handle, e
                );
                engine.close_stream(self.local_handle, false).await;
                return;
            }
        }
    }

    /// Write bytes delivered by the peer to the local transport
    pub(crate) async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(data).await
    }

    pub(crate) fn set_closed(&self) {
        self.state.store(StreamState::Closed as u8, Ordering::Release);
    }

    /// Shut the transport down. The read pump, if running, sees EOF or an
    /// error on its next read and finishes on its own.
    pub(crate) async fn shutdown_transport(&self) {
        // Drop the unread half of a stream that never opened
        drop(self.reader.lock().unwrap().take());
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
