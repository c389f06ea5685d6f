//! Public acceptor - the listener-side ephemeral port

use std::io;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::debug;

use super::engine::TunnelEngine;
use super::link::ControlLink;

/// The transient passive socket a `ListenRequest` opens on the public host.
///
/// External clients connect here; every accepted connection becomes a data
/// stream multiplexed over the control link that requested it.
pub struct PublicAcceptor {
    listener: TcpListener,
    port: u16,
}

impl PublicAcceptor {
    /// Bind an ephemeral port on all interfaces
    pub(crate) async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", 0)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    /// The port the kernel chose, reported back in the `ListenResponse`
    pub fn port(&self) -> u16 {
        self.port
    }

    pub(crate) fn spawn(self, engine: Arc<TunnelEngine>, link: Arc<ControlLink>) {
        tokio::spawn(async move {
            self.run(engine, link).await;
        });
    }

    async fn run(self, engine: Arc<TunnelEngine>, link: Arc<ControlLink>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, client_addr)) => {
                    debug!("public port {} accepted {}", self.port, client_addr);
                    stream.set_nodelay(true).ok();
                    engine
                        .on_incoming(&link, Box::new(stream), client_addr)
                        .await;
                }
                Err(e) => {
                    debug!("public port {} accept loop ended: {}", self.port, e);
                    break;
                }
            }
        }
    }
}
