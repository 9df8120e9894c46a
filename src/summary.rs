//! Per-transfer results and the report records derived from them.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Transport a transfer ran over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Length-prefixed TCP byte stream.
    Tcp,
    /// Segmented UDP transfer.
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("TCP"),
            Protocol::Udp => f.write_str("UDP"),
        }
    }
}

/// Raw counters of one transfer, filled in by the task that runs it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferResult {
    /// Round-local id; TCP transfers come first.
    pub id: usize,
    /// Transport used.
    pub protocol: Protocol,
    /// Bytes the plan asked for.
    pub requested: u64,
    /// When the transfer started.
    pub start_time: Instant,
    /// When the transfer ended.
    pub end_time: Instant,
    /// Payload bytes received. Duplicated UDP segments are not counted.
    pub bytes_transferred: u64,
    /// Distinct UDP segments received.
    pub segments_received: u64,
    /// Segment count announced by the server, 0 if nothing arrived.
    pub segments_expected: u64,
    /// Transport error that ended the transfer early.
    pub error: Option<String>,
}

impl TransferResult {
    /// Start counting a new transfer now.
    pub fn begin(id: usize, protocol: Protocol, requested: u64) -> Self {
        let now = Instant::now();
        TransferResult {
            id,
            protocol,
            requested,
            start_time: now,
            end_time: now,
            bytes_transferred: 0,
            segments_received: 0,
            segments_expected: 0,
            error: None,
        }
    }

    /// Close the transfer at the current instant.
    pub fn finish(self) -> Self {
        self.finish_at(Instant::now())
    }

    /// Close the transfer at `end_time`.
    pub fn finish_at(mut self, end_time: Instant) -> Self {
        self.end_time = end_time.max(self.start_time);
        self
    }

    /// Close the transfer now, recording what went wrong.
    pub fn fail(mut self, err: impl fmt::Display) -> Self {
        self.error = Some(err.to_string());
        self.finish()
    }

    /// Wall-clock time the transfer took.
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }
}

/// How a transfer ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Outcome {
    /// Everything requested arrived.
    Complete,
    /// The transfer ended before everything arrived.
    Partial,
    /// A transport error ended the transfer.
    Failed {
        /// Error text.
        reason: String,
    },
}

/// Report record for one transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferSummary {
    pub id: usize,
    pub protocol: Protocol,
    pub duration_secs: f64,
    pub bytes: u64,
    pub bits_per_second: f64,
    /// Only set for UDP transfers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_pct: Option<f64>,
    pub outcome: Outcome,
}

/// bytes*8/duration, or 0 for a zero-length interval.
pub fn bits_per_second(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 {
        bytes as f64 * 8.0 / secs
    } else {
        0.0
    }
}

/// Share of expected segments that arrived, in percent.
pub fn success_pct(received: u64, expected: u64) -> f64 {
    if expected == 0 {
        0.0
    } else {
        received as f64 / expected as f64 * 100.0
    }
}

/// Reduce a finished transfer into its report record. Never fails.
pub fn summarize(r: &TransferResult) -> TransferSummary {
    let duration = r.duration();
    let outcome = if let Some(reason) = &r.error {
        Outcome::Failed {
            reason: reason.clone(),
        }
    } else {
        let done = match r.protocol {
            Protocol::Tcp => r.bytes_transferred >= r.requested,
            Protocol::Udp => {
                r.requested == 0
                    || (r.segments_expected > 0 && r.segments_received >= r.segments_expected)
            }
        };
        if done {
            Outcome::Complete
        } else {
            Outcome::Partial
        }
    };

    TransferSummary {
        id: r.id,
        protocol: r.protocol,
        duration_secs: duration.as_secs_f64(),
        bytes: r.bytes_transferred,
        bits_per_second: bits_per_second(r.bytes_transferred, duration),
        success_pct: match r.protocol {
            Protocol::Tcp => None,
            Protocol::Udp => Some(success_pct(r.segments_received, r.segments_expected)),
        },
        outcome,
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{}: {:.2}s, {:.1} bits/s",
            self.protocol, self.id, self.duration_secs, self.bits_per_second
        )?;
        if let Some(pct) = self.success_pct {
            write!(f, ", {pct:.1}% packets")?;
        }
        if let Outcome::Failed { reason } = &self.outcome {
            write!(f, " (failed: {reason})")?;
        }
        Ok(())
    }
}

/// Totals over all transfers of one round.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub server: String,
    pub transfers: usize,
    pub failed: usize,
    pub total_bytes: u64,
    pub duration_secs: f64,
    pub aggregate_bits_per_second: f64,
}

impl RoundSummary {
    /// Aggregate `results` of a round run against `server`. The round spans
    /// from the earliest start to the latest end.
    pub fn from_results(server: impl fmt::Display, results: &[TransferResult]) -> Self {
        let total_bytes = results.iter().map(|r| r.bytes_transferred).sum();
        let duration = match (
            results.iter().map(|r| r.start_time).min(),
            results.iter().map(|r| r.end_time).max(),
        ) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        };

        RoundSummary {
            server: server.to_string(),
            transfers: results.len(),
            failed: results.iter().filter(|r| r.error.is_some()).count(),
            total_bytes,
            duration_secs: duration.as_secs_f64(),
            aggregate_bits_per_second: bits_per_second(total_bytes, duration),
        }
    }
}
