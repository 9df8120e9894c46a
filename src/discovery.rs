//! LAN discovery via broadcast offers.
//!
//! A server announces its transfer ports once per [`params::OFFER_INTERVAL`].
//! A client listens on the discovery port and takes the first valid offer.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::params;
use crate::plan::ServerEndpoint;
use crate::wire::{Message, Offer};

/// Default target of offer broadcasts.
pub fn default_broadcast_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::BROADCAST, params::DISCOVERY_PORT))
}

/// Periodically broadcasts one server's [`Offer`].
pub struct Broadcaster {
    socket: UdpSocket,
    offer: Offer,
    target: SocketAddr,
    interval: Duration,
}

impl Broadcaster {
    /// Bind a broadcast-enabled socket. Failing here is a startup error.
    pub async fn bind(offer: Offer, target: SocketAddr, interval: Duration) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        socket.set_broadcast(true)?;
        Ok(Broadcaster {
            socket,
            offer,
            target,
            interval,
        })
    }

    /// Send the offer every interval until `shutdown` flips or its sender
    /// goes away. Send failures are logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let message = Message::Offer(self.offer).encode();
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(target = %self.target, "broadcasting offers");
        loop {
            tokio::select! {
                _ = shutdown.wait_for(|stop| *stop) => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.socket.send_to(&message, self.target).await {
                debug!("offer broadcast failed: {e}");
            }
        }
        debug!("offer broadcasts stopped");
    }
}

/// Bind a fresh listener on the discovery port.
///
/// Address reuse is enabled so several clients on one host can listen at
/// the same time.
pub fn bind_listener(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&SockAddr::from(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))))?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(socket.into())?)
}

/// Wait for the first valid offer on `socket`. Anything else is dropped.
pub async fn wait_for_offer(socket: &UdpSocket) -> Result<ServerEndpoint> {
    let mut buf = [0u8; params::MAX_DATAGRAM_SIZE];
    loop {
        let (n, from) = socket.recv_from(&mut buf).await?;
        match Message::decode(&buf[..n]) {
            Ok(Message::Offer(offer)) => {
                let endpoint = ServerEndpoint::from_offer(from.ip(), offer);
                info!(%endpoint, "received offer");
                return Ok(endpoint);
            }
            Ok(other) => trace!(%from, kind = ?other.message_type(), "ignoring non-offer message"),
            Err(e) => trace!(%from, "dropping datagram: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Request;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn broadcast_loop_is_spawnable() {
        let broadcaster = Broadcaster::bind(
            Offer {
                udp_port: 1,
                tcp_port: 2,
            },
            SocketAddr::from((Ipv4Addr::LOCALHOST, 9)),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        let (_tx, rx) = watch::channel(false);
        assert_send(&broadcaster.run(rx));
    }

    #[tokio::test]
    async fn broadcaster_reaches_listener() {
        let listener = bind_listener(0).unwrap();
        let port = listener.local_addr().unwrap().port();
        let offer = Offer {
            udp_port: 4001,
            tcp_port: 4002,
        };

        let broadcaster = Broadcaster::bind(
            offer,
            SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(broadcaster.run(rx));

        let endpoint = wait_for_offer(&listener).await.unwrap();
        assert_eq!(endpoint.address, Ipv4Addr::LOCALHOST);
        assert_eq!(endpoint.udp_port, 4001);
        assert_eq!(endpoint.tcp_port, 4002);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn foreign_datagrams_are_skipped() {
        let listener = bind_listener(0).unwrap();
        let target = SocketAddr::from((Ipv4Addr::LOCALHOST, listener.local_addr().unwrap().port()));
        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let mut foreign = Message::Offer(Offer {
            udp_port: 1,
            tcp_port: 1,
        })
        .encode()
        .to_vec();
        foreign[0] ^= 0xFF;
        sender.send_to(&foreign, target).await.unwrap();
        sender.send_to(b"hi", target).await.unwrap();
        sender
            .send_to(&Message::Request(Request { size: 5 }).encode(), target)
            .await
            .unwrap();
        sender
            .send_to(
                &Message::Offer(Offer {
                    udp_port: 7,
                    tcp_port: 8,
                })
                .encode(),
                target,
            )
            .await
            .unwrap();

        let endpoint = wait_for_offer(&listener).await.unwrap();
        assert_eq!((endpoint.udp_port, endpoint.tcp_port), (7, 8));
    }
}
