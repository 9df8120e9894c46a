//! Protocol constants and tuning parameters.

use std::time::Duration;

/// Magic cookie that opens every message.
pub const MAGIC_COOKIE: u32 = 0xABCD_DCBA;

/// Well-known UDP port offers are broadcast to.
pub const DISCOVERY_PORT: u16 = 13117;

/// Time between two offer broadcasts.
pub const OFFER_INTERVAL: Duration = Duration::from_secs(1);

/// Data bytes carried by one UDP segment, excluding the header.
pub const SEGMENT_PAYLOAD_SIZE: usize = 1024;

/// Receive buffer for a single datagram. Large enough for a full segment.
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Size of the chunks written on a TCP transfer (8 KiB).
pub const TCP_CHUNK_SIZE: usize = 1 << 13;

/// Longest accepted TCP size line, newline included.
pub const MAX_SIZE_LINE: u64 = 32;

/// Time the server waits for a client's size line.
pub const IO_TIMEOUT: Duration = Duration::from_secs(7);

/// Delay between two segment sends on the server.
pub const UDP_PACING_INTERVAL: Duration = Duration::from_micros(100);

/// Wall-clock limit for the server to send one UDP transfer.
pub const UDP_SEND_DEADLINE: Duration = Duration::from_secs(60);

/// Silence after which a client considers a UDP transfer finished.
pub const INACTIVITY_WINDOW: Duration = Duration::from_secs(2);

/// Upper bound on a client-side UDP transfer.
pub const UDP_MAX_TRANSFER: Duration = Duration::from_secs(90);

/// A UDP progress update is sent every this many distinct segments.
pub const PROGRESS_EVERY: u64 = 100;

/// Upper bound on a client-side TCP transfer.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(90);

/// Largest connection count a single test plan may request.
pub const MAX_CONNECTIONS: usize = 1024;
