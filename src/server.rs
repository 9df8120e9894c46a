//! The speed-test server.
//!
//! Three long-lived tasks each own one socket: the offer broadcaster, the
//! TCP accept loop and the UDP request loop. Every accepted connection and
//! every UDP request gets its own task; nothing is shared between transfers
//! besides the UDP socket they send from.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::discovery::{self, Broadcaster};
use crate::error::Result;
use crate::params;
use crate::tcp;
use crate::udp::{self, SendConfig};
use crate::wire::{Message, Offer};

/// Server settings. Ports of 0 pick ephemeral ports, which the offer
/// advertises.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    /// Where offers are sent.
    pub broadcast_addr: SocketAddr,
    pub offer_interval: Duration,
    pub udp: SendConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 0,
            udp_port: 0,
            broadcast_addr: discovery::default_broadcast_addr(),
            offer_interval: params::OFFER_INTERVAL,
            udp: SendConfig::default(),
        }
    }
}

/// A bound server, ready to run.
pub struct Server {
    tcp: TcpListener,
    udp: Arc<UdpSocket>,
    broadcaster: Broadcaster,
    offer: Offer,
    udp_config: SendConfig,
}

impl Server {
    /// Bind all three sockets. This is the only fallible step of a server's
    /// life.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let tcp = TcpListener::bind((config.bind_ip, config.tcp_port)).await?;
        let udp = UdpSocket::bind((config.bind_ip, config.udp_port)).await?;
        let offer = Offer {
            udp_port: udp.local_addr()?.port(),
            tcp_port: tcp.local_addr()?.port(),
        };
        let broadcaster =
            Broadcaster::bind(offer, config.broadcast_addr, config.offer_interval).await?;

        info!(
            udp_port = offer.udp_port,
            tcp_port = offer.tcp_port,
            "server started"
        );
        Ok(Server {
            tcp,
            udp: Arc::new(udp),
            broadcaster,
            offer,
            udp_config: config.udp,
        })
    }

    /// The ports this server advertises.
    pub fn offer(&self) -> Offer {
        self.offer
    }

    /// Serve until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        let broadcast = tokio::spawn(self.broadcaster.run(shutdown.clone()));
        let accept = tokio::spawn(accept_loop(self.tcp, shutdown.clone()));
        dispatch_loop(self.udp, self.udp_config, shutdown).await;

        let _ = broadcast.await;
        let _ = accept.await;
        info!("server stopped");
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tokio::spawn(async move {
                    match tcp::serve_connection(stream).await {
                        Ok(sent) => debug!(%peer, sent, "TCP transfer done"),
                        Err(e) => warn!(%peer, "TCP transfer failed: {e}"),
                    }
                });
            }
            Err(e) => warn!("accept failed: {e}"),
        }
    }
}

async fn dispatch_loop(
    socket: Arc<UdpSocket>,
    config: SendConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = [0u8; params::MAX_DATAGRAM_SIZE];
    loop {
        let received = tokio::select! {
            _ = shutdown.wait_for(|stop| *stop) => break,
            received = socket.recv_from(&mut buf) => received,
        };
        let (n, from) = match received {
            Ok(received) => received,
            Err(e) => {
                // ICMP errors from earlier sends surface here on some platforms.
                debug!("UDP receive failed: {e}");
                continue;
            }
        };

        match Message::decode(&buf[..n]) {
            Ok(Message::Request(request)) => {
                let socket = Arc::clone(&socket);
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        udp::send_segments(&socket, from, request.size, config, shutdown).await
                    {
                        warn!(client = %from, "UDP transfer failed: {e}");
                    }
                });
            }
            Ok(other) => trace!(%from, kind = ?other.message_type(), "ignoring non-request message"),
            Err(e) => trace!(%from, "dropping datagram: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Request;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            broadcast_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 9)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn answers_requests_and_ignores_garbage() {
        let server = Server::bind(local_config()).await.unwrap();
        let udp_port = server.offer().udp_port;
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(server.run(rx));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, udp_port));
        client.send_to(b"\x00\x01\x02", target).await.unwrap();
        client
            .send_to(&Message::Request(Request { size: 1500 }).encode(), target)
            .await
            .unwrap();

        let mut buf = [0u8; params::MAX_DATAGRAM_SIZE];
        let n = client.recv(&mut buf).await.unwrap();
        let Message::Payload(first) = Message::decode(&buf[..n]).unwrap() else {
            panic!("expected a payload");
        };
        assert_eq!(first.total_segments, 2);

        tx.send(true).unwrap();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stops_when_shutdown_sender_drops() {
        let server = Server::bind(local_config()).await.unwrap();
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(server.run(rx));
        drop(tx);

        tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
