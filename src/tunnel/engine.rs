//! Tunnel engine - frame loop, message dispatch, role wiring

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, ReadHalf};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::protocol::{Handle, Message, MAX_FRAME_SIZE};

use super::acceptor::PublicAcceptor;
use super::link::{ControlLink, LinkRole};
use super::registry::HandleRegistry;
use super::stream::{DataStream, StreamState};
use super::BoxedByteStream;

/// The signaling-and-multiplexing engine both peers run.
///
/// Owns the [`HandleRegistry`], which in turn owns every live link and
/// stream. All behavior is driven by inbound frames; the only role-specific
/// entry points are [`attach_incoming_control`](Self::attach_incoming_control)
/// (listener), [`dial_control`](Self::dial_control) and
/// [`start_tunnel_for`](Self::start_tunnel_for) (connector).
pub struct TunnelEngine {
    registry: HandleRegistry,
}

impl TunnelEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: HandleRegistry::new(),
        })
    }

    /// Active data streams, for diagnostics
    pub fn stream_count(&self) -> usize {
        self.registry.stream_count()
    }

    /// Active control links, for diagnostics
    pub fn link_count(&self) -> usize {
        self.registry.link_count()
    }

    /// Adopt an accepted signaling connection and start its frame loop
    pub fn attach_incoming_control(self: &Arc<Self>, transport: BoxedByteStream) -> Arc<ControlLink> {
        self.register_link(transport, LinkRole::Listener)
    }

    /// Dial the listener's signaling address and start the frame loop
    pub async fn dial_control(self: &Arc<Self>, address: &str) -> crate::Result<Arc<ControlLink>> {
        let stream = TcpStream::connect(address).await?;
        stream.set_nodelay(true).ok();
        Ok(self.register_link(Box::new(stream), LinkRole::Connector))
    }

    /// Ask the peer to expose `target_host:target_port`. Completion is
    /// asynchronous: the public port arrives in the `ListenResponse` and is
    /// readable from [`ControlLink::tunnel_port`] afterwards.
    pub async fn start_tunnel_for(
        &self,
        link: &ControlLink,
        target_host: &str,
        target_port: u32,
    ) -> crate::Result<()> {
        link.set_target(target_host.to_string(), target_port);
        link.send(&Message::ListenRequest {
            proxy_address: target_host.to_string(),
            proxy_port: target_port,
        })
        .await?;
        Ok(())
    }

    fn register_link(self: &Arc<Self>, transport: BoxedByteStream, role: LinkRole) -> Arc<ControlLink> {
        let handle = self.registry.allocate();
        let (reader, writer) = tokio::io::split(transport);
        let link = Arc::new(ControlLink::new(handle, role, writer));
        self.registry.insert_link(Arc::clone(&link));

        let engine = Arc::clone(self);
        let frame_link = Arc::clone(&link);
        tokio::spawn(async move {
            engine.run_link(frame_link, reader).await;
        });

        link
    }

    /// Per-link frame loop: read one frame, dispatch, repeat. Any transport
    /// error, short read or unparseable frame is terminal for the link.
    async fn run_link(self: Arc<Self>, link: Arc<ControlLink>, mut reader: ReadHalf<BoxedByteStream>) {
        debug!("control link {} up ({:?})", link.handle(), link.role());

        loop {
            let mut len_buf = [0u8; 4];
            if let Err(e) = reader.read_exact(&mut len_buf).await {
                debug!("control link {} closed: {}", link.handle(), e);
                break;
            }

            let payload_len = u32::from_be_bytes(len_buf) as usize;
            if payload_len > MAX_FRAME_SIZE {
                error!(
                    "control link {}: frame of {} bytes exceeds limit, dropping link",
                    link.handle(),
                    payload_len
                );
                break;
            }

            let mut payload = vec![0u8; payload_len];
            if let Err(e) = reader.read_exact(&mut payload).await {
                debug!("control link {} closed mid-frame: {}", link.handle(), e);
                break;
            }

            match Message::decode(Bytes::from(payload)) {
                Ok(msg) => self.dispatch(&link, msg).await,
                Err(e) => {
                    error!(
                        "malformed frame on control link {}: {}, dropping link",
                        link.handle(),
                        e
                    );
                    break;
                }
            }
        }

        self.registry.take_link(link.handle());
        link.shutdown().await;
        debug!("control link {} removed", link.handle());
    }

    async fn dispatch(self: &Arc<Self>, link: &Arc<ControlLink>, msg: Message) {
        match msg {
            Message::ListenRequest {
                proxy_address,
                proxy_port,
            } => self.on_listen_request(link, proxy_address, proxy_port).await,
            Message::ListenResponse { tunnel_port, .. } => {
                self.on_listen_response(link, tunnel_port)
            }
            Message::TunnelConnectRequest {
                data_handle,
                client_address,
                ..
            } => self.on_connect_request(link, data_handle, client_address).await,
            Message::TunnelConnectResponse {
                data_handle,
                proxy_handle,
            } => self.on_connect_response(data_handle, proxy_handle),
            Message::TunnelDataIndication { peer_handle, data } => {
                self.on_data_indication(peer_handle, data).await
            }
            Message::TunnelDisconnectRequest { peer_handle } => {
                self.on_disconnect_request(link, peer_handle).await
            }
            Message::TunnelDisconnectResponse { peer_handle } => {
                self.on_disconnect_response(peer_handle).await
            }
        }
    }

    /// Listener side: bind the public port and report it
    async fn on_listen_request(self: &Arc<Self>, link: &Arc<ControlLink>, host: String, port: u32) {
        link.set_target(host.clone(), port);

        let acceptor = match PublicAcceptor::bind().await {
            Ok(acceptor) => acceptor,
            Err(e) => {
                error!("failed to bind a public port for {}:{}: {}", host, port, e);
                return;
            }
        };
        let tunnel_port = acceptor.port();
        info!("public port {} open for {}:{}", tunnel_port, host, port);

        acceptor.spawn(Arc::clone(self), Arc::clone(link));

        let reply = Message::ListenResponse {
            proxy_address: host,
            proxy_port: port,
            tunnel_address: "0.0.0.0".to_string(),
            tunnel_port: u32::from(tunnel_port),
        };
        if let Err(e) = link.send(&reply).await {
            debug!("control link {} listen response failed: {}", link.handle(), e);
        }
    }

    /// Connector side: remember the public port for reporting
    fn on_listen_response(&self, link: &Arc<ControlLink>, tunnel_port: u32) {
        link.set_tunnel_port(tunnel_port);
        info!("tunnel port is open: {}", tunnel_port);
    }

    /// Connector side: a public client showed up, dial the private target
    async fn on_connect_request(
        self: &Arc<Self>,
        link: &Arc<ControlLink>,
        peer_handle: Handle,
        client_address: String,
    ) {
        let Some((host, port)) = link.target() else {
            warn!("connect request on link {} before any tunnel was started", link.handle());
            self.reply_disconnect(link, peer_handle).await;
            return;
        };
        debug!("client {} wants {}:{}", client_address, host, port);

        let dialed = match u16::try_from(port) {
            Ok(port) => TcpStream::connect((host.as_str(), port)).await,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "target port out of range",
            )),
        };

        let transport = match dialed {
            Ok(stream) => {
                stream.set_nodelay(true).ok();
                stream
            }
            Err(e) => {
                warn!("dial {}:{} failed: {}", host, port, e);
                self.reply_disconnect(link, peer_handle).await;
                return;
            }
        };

        let local_handle = self.registry.allocate();
        let stream = DataStream::new(local_handle, Arc::clone(link), Box::new(transport));
        self.registry.insert_stream(Arc::clone(&stream));
        stream.open(self, peer_handle);

        info!(
            "data stream to {}:{} open, local handle {}, peer handle {}",
            host, port, local_handle, peer_handle
        );

        let reply = Message::TunnelConnectResponse {
            data_handle: peer_handle,
            proxy_handle: local_handle,
        };
        if let Err(e) = link.send(&reply).await {
            debug!("control link {} connect response failed: {}", link.handle(), e);
        }
    }

    /// Listener side: the connector reached the target, pair the handles
    fn on_connect_response(self: &Arc<Self>, local_handle: Handle, peer_handle: Handle) {
        let Some(stream) = self.registry.lookup_stream(local_handle) else {
            trace!("connect response for unknown stream {}", local_handle);
            return;
        };
        if stream.open(self, peer_handle) {
            info!(
                "data stream open, local handle {}, peer handle {}",
                local_handle, peer_handle
            );
        }
    }

    /// Either side: payload bytes for one of our streams
    async fn on_data_indication(&self, local_handle: Handle, data: Bytes) {
        let Some(stream) = self.registry.lookup_stream(local_handle) else {
            trace!("data for unknown stream {}, dropping", local_handle);
            return;
        };

        if stream.state() != StreamState::Open {
            warn!("data for half-open stream {}, dropping", local_handle);
            return;
        }

        if let Err(e) = stream.write(&data).await {
            debug!("stream {} transport write error: {}", local_handle, e);
            self.close_stream(local_handle, true).await;
        }
    }

    /// Either side: the peer tore the stream down; confirm with the peer's
    /// handle for it
    async fn on_disconnect_request(&self, link: &Arc<ControlLink>, local_handle: Handle) {
        debug!("disconnect request for local handle {}", local_handle);

        if let Some(stream) = self.close_stream(local_handle, false).await {
            let reply = Message::TunnelDisconnectResponse {
                peer_handle: stream.peer_handle().unwrap_or(0),
            };
            if let Err(e) = link.send(&reply).await {
                debug!("control link {} disconnect response failed: {}", link.handle(), e);
            }
        }
    }

    /// Either side: teardown confirmed, or a connect request was refused
    async fn on_disconnect_response(&self, local_handle: Handle) {
        debug!("disconnect response for local handle {}", local_handle);
        self.close_stream(local_handle, false).await;
    }

    /// Listener side: a client connection accepted on the public port
    pub(crate) async fn on_incoming(
        self: &Arc<Self>,
        link: &Arc<ControlLink>,
        transport: BoxedByteStream,
        client_address: SocketAddr,
    ) {
        let Some((host, port)) = link.target() else {
            warn!("incoming client on link {} with no recorded target", link.handle());
            return;
        };

        let local_handle = self.registry.allocate();
        let stream = DataStream::new(local_handle, Arc::clone(link), transport);
        self.registry.insert_stream(stream);

        let request = Message::TunnelConnectRequest {
            data_handle: local_handle,
            client_address: client_address.to_string(),
            proxy_address: host,
            proxy_port: port,
        };
        if let Err(e) = link.send(&request).await {
            debug!("control link {} connect request failed: {}", link.handle(), e);
            self.close_stream(local_handle, false).await;
        }
    }

    /// Remove a stream from the registry and tear its transport down.
    ///
    /// The first caller to win the removal owns the teardown and, when
    /// `notify_peer` is set, tells the other engine; later calls are silent
    /// no-ops. Returns the removed stream on the first call.
    pub(crate) async fn close_stream(
        &self,
        local_handle: Handle,
        notify_peer: bool,
    ) -> Option<Arc<DataStream>> {
        let stream = self.registry.take_stream(local_handle)?;
        stream.set_closed();
        debug!(
            "close data stream, local handle {}, peer handle {}",
            local_handle,
            stream.peer_handle().unwrap_or(0)
        );
        stream.shutdown_transport().await;

        if notify_peer {
            let msg = Message::TunnelDisconnectRequest {
                peer_handle: stream.peer_handle().unwrap_or(0),
            };
            if let Err(e) = stream.link().send(&msg).await {
                debug!("disconnect request for stream {} failed: {}", local_handle, e);
            }
        }

        Some(stream)
    }

    async fn reply_disconnect(&self, link: &Arc<ControlLink>, peer_handle: Handle) {
        let reply = Message::TunnelDisconnectResponse { peer_handle };
        if let Err(e) = link.send(&reply).await {
            debug!("control link {} disconnect reply failed: {}", link.handle(), e);
        }
    }
}
