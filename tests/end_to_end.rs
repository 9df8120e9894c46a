//! Loopback tests with a real server and client.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use lanspeed::client::{Client, ClientConfig};
use lanspeed::discovery::Broadcaster;
use lanspeed::emitter::JsonEmitter;
use lanspeed::plan::{FixedPlan, TestPlan};
use lanspeed::server::{Server, ServerConfig};
use lanspeed::summary::{Protocol, summarize};
use lanspeed::tcp;
use lanspeed::udp::ReceiveConfig;
use lanspeed::wire::Offer;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::timeout;

// Each test listens for offers on its own port.
static DISCOVERY_PORT: AtomicU16 = AtomicU16::new(24117);

fn next_discovery_port() -> u16 {
    DISCOVERY_PORT.fetch_add(1, Ordering::SeqCst)
}

fn localhost(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn client_config(discovery_port: u16) -> ClientConfig {
    ClientConfig {
        discovery_port,
        discovery_timeout: Some(Duration::from_secs(5)),
        tcp_timeout: Duration::from_secs(10),
        udp: ReceiveConfig {
            inactivity_window: Duration::from_millis(500),
            max_duration: Duration::from_secs(10),
        },
    }
}

async fn start_server(broadcast_addr: SocketAddr) -> (Offer, watch::Sender<bool>) {
    let server = Server::bind(ServerConfig {
        bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        broadcast_addr,
        offer_interval: Duration::from_millis(100),
        ..Default::default()
    })
    .await
    .unwrap();
    let offer = server.offer();
    let (tx, rx) = watch::channel(false);
    tokio::spawn(server.run(rx));
    (offer, tx)
}

#[tokio::test]
async fn discovered_server_serves_tcp_and_udp() {
    let port = next_discovery_port();
    let (offer, _shutdown) = start_server(localhost(port)).await;

    let client = Client::new(client_config(port));
    let server = client.discover().await.unwrap();
    assert_eq!(server.address, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!((server.udp_port, server.tcp_port), (offer.udp_port, offer.tcp_port));

    let plan = TestPlan::new(2048, 1, 1).unwrap();
    let results = client.run_round(&plan, server).await;
    assert_eq!(results.len(), 2);

    let tcp = &results[0];
    assert_eq!((tcp.id, tcp.protocol), (1, Protocol::Tcp));
    assert_eq!(tcp.bytes_transferred, 2048);
    assert!(tcp.error.is_none());

    let udp = &results[1];
    assert_eq!((udp.id, udp.protocol), (2, Protocol::Udp));
    assert_eq!(udp.segments_expected, 2);
    let pct = summarize(udp).success_pct.unwrap();
    assert!((0.0..=100.0).contains(&pct));
}

/// TCP listener that resets its first connection after a few bytes and
/// serves every other connection normally.
async fn spawn_flaky_tcp() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut accepted = 0;
        while let Ok((mut stream, _)) = listener.accept().await {
            accepted += 1;
            if accepted > 1 {
                tokio::spawn(tcp::serve_connection(stream));
                continue;
            }
            tokio::spawn(async move {
                let mut line = [0u8; 32];
                let _ = stream.read(&mut line).await;
                let _ = stream.write_all(&[0u8; 1000]).await;
                socket2::SockRef::from(&stream)
                    .set_linger(Some(Duration::ZERO))
                    .unwrap();
                drop(stream);
            });
        }
    });
    port
}

#[tokio::test]
async fn reset_connection_does_not_affect_siblings() {
    const SIZE: u64 = 64 * 1024;

    let (real, _server_shutdown) = start_server(localhost(9)).await;
    let flaky_tcp_port = spawn_flaky_tcp().await;

    // Advertise the real UDP port next to the flaky TCP listener.
    let port = next_discovery_port();
    let broadcaster = Broadcaster::bind(
        Offer {
            udp_port: real.udp_port,
            tcp_port: flaky_tcp_port,
        },
        localhost(port),
        Duration::from_millis(100),
    )
    .await
    .unwrap();
    let (_offers_tx, offers_rx) = watch::channel(false);
    tokio::spawn(broadcaster.run(offers_rx));

    let client = Client::new(client_config(port));
    let mut plans = FixedPlan::new(TestPlan::new(SIZE, 3, 3).unwrap(), Some(1));
    let mut out = Vec::new();
    let mut emitter = JsonEmitter::new(&mut out);
    let (_tx, rx) = watch::channel(false);

    timeout(Duration::from_secs(30), client.run(&mut plans, &mut emitter, rx))
        .await
        .unwrap()
        .unwrap();

    let events: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let kinds: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(
        kinds,
        [
            "Discovering",
            "ServerFound",
            "Transfer",
            "Transfer",
            "Transfer",
            "Transfer",
            "Transfer",
            "Transfer",
            "RoundComplete"
        ]
    );

    let transfers: Vec<&serde_json::Value> = events[2..8].iter().map(|e| &e["transfer"]).collect();
    let ids: Vec<u64> = transfers.iter().map(|t| t["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, [1, 2, 3, 4, 5, 6]);

    let (tcp, udp) = transfers.split_at(3);
    let full_tcp = tcp
        .iter()
        .filter(|t| t["bytes"] == SIZE && t["outcome"]["status"] == "complete")
        .count();
    assert_eq!(full_tcp, 2);
    assert_eq!(tcp.iter().filter(|t| t["bytes"].as_u64().unwrap() < SIZE).count(), 1);

    for t in udp {
        assert_eq!(t["protocol"], "udp");
        assert_ne!(t["outcome"]["status"], "failed");
        let pct = t["success_pct"].as_f64().unwrap();
        assert!(pct > 0.0 && pct <= 100.0);
    }

    assert_eq!(events[8]["round"]["transfers"], 6);
}

#[tokio::test]
async fn udp_progress_is_reported_before_results() {
    let port = next_discovery_port();
    let (_offer, _shutdown) = start_server(localhost(port)).await;

    let client = Client::new(client_config(port));
    let mut plans = FixedPlan::new(TestPlan::new(150 * 1024, 0, 1).unwrap(), Some(1));
    let mut out = Vec::new();
    let mut emitter = JsonEmitter::new(&mut out);
    let (_tx, rx) = watch::channel(false);

    timeout(Duration::from_secs(30), client.run(&mut plans, &mut emitter, rx))
        .await
        .unwrap()
        .unwrap();

    let events: Vec<serde_json::Value> = String::from_utf8(out)
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let transfer = events.iter().position(|e| e["type"] == "Transfer").unwrap();
    let received = events[transfer]["transfer"]["bytes"].as_u64().unwrap();

    let progress: Vec<&serde_json::Value> = events[..transfer]
        .iter()
        .filter(|e| e["type"] == "Progress")
        .map(|e| &e["progress"])
        .collect();
    if received >= 100 * 1024 {
        assert_eq!(progress.len(), 1);
        assert_eq!(progress[0]["received"], 100);
        assert_eq!(progress[0]["total"], 150);
        assert_eq!(progress[0]["id"], 1);
    }
    assert!(events[transfer..].iter().all(|e| e["type"] != "Progress"));
}
