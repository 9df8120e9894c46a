//! Segmented UDP transfers.
//!
//! The server answers a [`Request`] by streaming `ceil(size / 1024)`
//! [`Payload`] segments, paced but never acknowledged or retransmitted. The
//! client counts the distinct segments that arrive and declares the transfer
//! over once the server has been silent for the inactivity window.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use serde::Serialize;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval, timeout_at};
use tracing::{debug, trace, warn};

use crate::error::Result;
use crate::params;
use crate::summary::{Protocol, TransferResult};
use crate::wire::{Message, PAYLOAD_HEADER_LEN, Payload, Request};

/// Number of segments a transfer of `size` bytes is split into.
pub fn total_segments(size: u64) -> u64 {
    size.div_ceil(params::SEGMENT_PAYLOAD_SIZE as u64)
}

/// Position and length of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// 0-based segment index.
    pub index: u64,
    /// Data bytes in this segment.
    pub len: usize,
}

/// The segments of a transfer, in send order.
#[derive(Debug, Clone)]
pub struct Segments {
    size: u64,
    next: u64,
    total: u64,
}

impl Segments {
    /// Split `size` bytes into segments.
    pub fn new(size: u64) -> Self {
        Segments {
            size,
            next: 0,
            total: total_segments(size),
        }
    }

    /// Segment count announced in every payload.
    pub fn total(&self) -> u64 {
        self.total
    }
}

impl Iterator for Segments {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.next >= self.total {
            return None;
        }
        let sent = self.next * params::SEGMENT_PAYLOAD_SIZE as u64;
        let remaining = self.size - sent;
        let len = remaining.min(params::SEGMENT_PAYLOAD_SIZE as u64) as usize;
        let segment = Segment {
            index: self.next,
            len,
        };
        self.next += 1;
        Some(segment)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = usize::try_from(self.total - self.next).unwrap_or(usize::MAX);
        (left, Some(left))
    }
}

/// Server-side limits for one UDP transfer.
#[derive(Debug, Clone, Copy)]
pub struct SendConfig {
    /// Delay between two segments.
    pub pacing_interval: Duration,
    /// Time after which an unfinished transfer is abandoned.
    pub deadline: Duration,
}

impl Default for SendConfig {
    fn default() -> Self {
        SendConfig {
            pacing_interval: params::UDP_PACING_INTERVAL,
            deadline: params::UDP_SEND_DEADLINE,
        }
    }
}

/// What the server managed to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendStats {
    pub segments_sent: u64,
    pub bytes_sent: u64,
    /// False when the deadline or shutdown cut the transfer short.
    pub completed: bool,
}

/// Stream `size` bytes to `client` as paced payload segments.
///
/// Stops early, without error, when the deadline passes or `shutdown`
/// flips; a send error ends the transfer with that error.
pub async fn send_segments(
    socket: &UdpSocket,
    client: SocketAddr,
    size: u64,
    config: SendConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<SendStats> {
    let deadline = Instant::now() + config.deadline;
    let mut segments = Segments::new(size);
    let total = segments.total();

    let mut block = vec![0u8; params::SEGMENT_PAYLOAD_SIZE];
    StdRng::from_os_rng().fill_bytes(&mut block);
    let block = Bytes::from(block);

    let mut ticker = interval(config.pacing_interval.max(Duration::from_nanos(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut buf = BytesMut::with_capacity(PAYLOAD_HEADER_LEN + params::SEGMENT_PAYLOAD_SIZE);
    let mut stats = SendStats {
        segments_sent: 0,
        bytes_sent: 0,
        completed: false,
    };

    debug!(%client, size, total, "starting UDP transfer");
    loop {
        if *shutdown.borrow() {
            debug!(%client, "UDP transfer stopped by shutdown");
            break;
        }
        if Instant::now() >= deadline {
            warn!(%client, sent = stats.segments_sent, total, "UDP transfer deadline passed");
            break;
        }
        let Some(segment) = segments.next() else {
            stats.completed = true;
            break;
        };

        ticker.tick().await;

        buf.clear();
        Message::Payload(Payload {
            total_segments: total,
            segment_index: segment.index,
            data: block.slice(..segment.len),
        })
        .encode_into(&mut buf);
        socket.send_to(&buf, client).await?;

        stats.segments_sent += 1;
        stats.bytes_sent += segment.len as u64;
    }

    debug!(%client, sent = stats.segments_sent, total, "UDP transfer done");
    Ok(stats)
}

/// Client-side record of the segments seen so far.
///
/// The segment count of the first payload is pinned as the transfer's total;
/// payloads that disagree with it, or point past it, are stray and ignored.
#[derive(Debug, Default)]
pub struct SegmentCollector {
    seen: HashSet<u64>,
    bytes: u64,
    total_segments: Option<u64>,
    duplicates: u64,
    stray: u64,
}

impl SegmentCollector {
    /// An empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one payload. Returns true if it was a new segment.
    pub fn record(&mut self, payload: &Payload) -> bool {
        let total = *self.total_segments.get_or_insert(payload.total_segments);
        if payload.total_segments != total || payload.segment_index >= total {
            self.stray += 1;
            return false;
        }
        if !self.seen.insert(payload.segment_index) {
            self.duplicates += 1;
            return false;
        }
        self.bytes += payload.data.len() as u64;
        true
    }

    /// Distinct segments received.
    pub fn received(&self) -> u64 {
        self.seen.len() as u64
    }

    /// Pinned segment count, 0 when nothing arrived.
    pub fn expected(&self) -> u64 {
        self.total_segments.unwrap_or(0)
    }

    /// Data bytes of distinct segments.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Payloads dropped as duplicates.
    pub fn duplicates(&self) -> u64 {
        self.duplicates
    }

    /// Payloads dropped because they did not belong to this transfer.
    pub fn stray(&self) -> u64 {
        self.stray
    }

    fn apply(&self, result: &mut TransferResult) {
        result.bytes_transferred = self.bytes;
        result.segments_received = self.received();
        result.segments_expected = self.expected();
    }
}

/// Client-side limits for one UDP transfer.
#[derive(Debug, Clone, Copy)]
pub struct ReceiveConfig {
    /// Silence that ends the transfer.
    pub inactivity_window: Duration,
    /// Hard cap on the whole transfer.
    pub max_duration: Duration,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        ReceiveConfig {
            inactivity_window: params::INACTIVITY_WINDOW,
            max_duration: params::UDP_MAX_TRANSFER,
        }
    }
}

/// Live count of a running UDP transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Transfer id within the round.
    pub id: usize,
    /// Distinct segments so far.
    pub received: u64,
    /// Pinned segment count.
    pub total: u64,
}

/// Request `size` bytes from the server's UDP port and collect what arrives.
///
/// Always returns a result. The end time is the arrival of the last payload,
/// or the moment the loop gave up if none came. A zero size completes at
/// once without touching the network. When `progress` is given, a
/// [`Progress`] is sent every [`params::PROGRESS_EVERY`] distinct segments.
pub async fn run_transfer(
    id: usize,
    server: SocketAddr,
    size: u64,
    config: ReceiveConfig,
    progress: Option<mpsc::Sender<Progress>>,
) -> TransferResult {
    let mut result = TransferResult::begin(id, Protocol::Udp, size);
    if size == 0 {
        return result.finish();
    }

    let mut collector = SegmentCollector::new();
    let received = receive_segments(
        id,
        server,
        size,
        config,
        &mut collector,
        progress.as_ref(),
    )
    .await;
    collector.apply(&mut result);
    if collector.duplicates() > 0 || collector.stray() > 0 {
        debug!(
            id,
            duplicates = collector.duplicates(),
            stray = collector.stray(),
            "ignored payloads"
        );
    }

    match received {
        Ok(Some(last)) => result.finish_at(last.into_std()),
        Ok(None) => result.finish(),
        Err(e) => {
            warn!(id, %server, "UDP transfer failed: {e}");
            result.fail(e)
        }
    }
}

async fn receive_segments(
    id: usize,
    server: SocketAddr,
    size: u64,
    config: ReceiveConfig,
    collector: &mut SegmentCollector,
    progress: Option<&mpsc::Sender<Progress>>,
) -> Result<Option<Instant>> {
    let socket = UdpSocket::bind(unspecified_for(server)).await?;
    socket
        .send_to(&Message::Request(Request { size }).encode(), server)
        .await?;

    let started = Instant::now();
    let deadline = started + config.max_duration;
    let mut last_payload: Option<Instant> = None;
    let mut buf = vec![0u8; params::MAX_DATAGRAM_SIZE];

    loop {
        let quiet_until = (last_payload.unwrap_or(started) + config.inactivity_window).min(deadline);
        let (n, from) = match timeout_at(quiet_until, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => break,
        };

        match Message::decode(&buf[..n]) {
            Ok(Message::Payload(payload)) => {
                last_payload = Some(Instant::now());
                if !collector.record(&payload) {
                    trace!(%from, index = payload.segment_index, "ignoring repeated or stray segment");
                    continue;
                }
                if let Some(tx) = progress
                    && collector.received() % params::PROGRESS_EVERY == 0
                {
                    let update = Progress {
                        id,
                        received: collector.received(),
                        total: collector.expected(),
                    };
                    let _ = tx.send(update).await;
                }
            }
            Ok(other) => trace!(%from, kind = ?other.message_type(), "ignoring non-payload message"),
            Err(e) => trace!(%from, "dropping datagram: {e}"),
        }
    }

    Ok(last_payload)
}

fn unspecified_for(peer: SocketAddr) -> SocketAddr {
    let ip = match peer.ip() {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
