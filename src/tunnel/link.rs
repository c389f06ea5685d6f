//! Control link - the single signaling connection between two engines

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;

use tokio::io::{AsyncWriteExt, WriteHalf};
use tokio::sync::Mutex;

use crate::protocol::Message;

use super::{BoxedByteStream, Handle};

/// Which side of the tunnel created this link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    /// Publicly reachable side; accepted the signaling connection
    Listener,
    /// Private side; dialed out and will dial the target
    Connector,
}

/// The signaling connection to the peer engine.
///
/// Every frame the engine emits - replies from dispatch handlers as well as
/// `TunnelDataIndication` frames from all the stream pumps - goes through
/// [`ControlLink::send`], which serializes writes under one mutex. Without
/// that, concurrent pumps would interleave partial frames and corrupt the
/// stream for good.
pub struct ControlLink {
    handle: Handle,
    role: LinkRole,
    writer: Mutex<WriteHalf<BoxedByteStream>>,
    /// Target recorded from `ListenRequest` (listener side) or
    /// `start_tunnel_for` (connector side)
    target: StdMutex<Option<(String, u32)>>,
    /// Public port reported in `ListenResponse`; 0 until known
    tunnel_port: AtomicU32,
}

impl ControlLink {
    pub(crate) fn new(handle: Handle, role: LinkRole, writer: WriteHalf<BoxedByteStream>) -> Self {
        Self {
            handle,
            role,
            writer: Mutex::new(writer),
            target: StdMutex::new(None),
            tunnel_port: AtomicU32::new(0),
        }
    }

    /// Handle of this link in the registry. Never transmitted; frames only
    /// ever carry stream handles.
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn role(&self) -> LinkRole {
        self.role
    }

    /// The `(host, port)` this tunnel exposes, once known
    pub fn target(&self) -> Option<(String, u32)> {
        self.target.lock().unwrap().clone()
    }

    pub(crate) fn set_target(&self, host: String, port: u32) {
        *self.target.lock().unwrap() = Some((host, port));
    }

    /// Public port the listener bound for this tunnel, 0 until the
    /// `ListenResponse` has been seen
    pub fn tunnel_port(&self) -> u32 {
        self.tunnel_port.load(Ordering::Acquire)
    }

    pub(crate) fn set_tunnel_port(&self, port: u32) {
        self.tunnel_port.store(port, Ordering::Release);
    }

    /// Send one frame to the peer. The whole frame goes out in a single
    /// write so the per-link mutex is the only serialization needed.
    pub(crate) async fn send(&self, msg: &Message) -> io::Result<()> {
        let frame = msg.encode();
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await
    }

    /// Shut the write side down. Called once the frame loop has ended;
    /// streams still holding this link will fail their next send and close.
    pub(crate) async fn shutdown(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}
