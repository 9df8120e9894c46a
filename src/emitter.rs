//! Output formatting for client events.
//!
//! The [`Emitter`] trait defines callbacks for each stage of a test round.
//! Two implementations are provided:
//! - [`HumanReadableEmitter`]: one line per event on a terminal.
//! - [`JsonEmitter`]: one JSON object per line, suitable for machine consumption.

use std::io::Write;

use serde::Serialize;

use crate::error::Result;
use crate::plan::{ServerEndpoint, TestPlan};
use crate::summary::{RoundSummary, TransferSummary};
use crate::udp::Progress;

#[derive(Serialize)]
#[serde(tag = "type")]
enum Event<'a> {
    Discovering { plan: &'a TestPlan },
    ServerFound { server: &'a ServerEndpoint },
    Progress { progress: &'a Progress },
    Transfer { transfer: &'a TransferSummary },
    RoundComplete { round: &'a RoundSummary },
    Error { error: &'a str },
}

/// Callbacks for client lifecycle events.
pub trait Emitter {
    /// Called when a round starts looking for a server.
    fn on_discovering(&mut self, plan: &TestPlan) -> Result<()>;
    /// Called when discovery picked a server.
    fn on_server_found(&mut self, server: &ServerEndpoint) -> Result<()>;
    /// Called while a UDP transfer is still receiving.
    fn on_progress(&mut self, p: &Progress) -> Result<()>;
    /// Called once per finished transfer, in id order.
    fn on_transfer(&mut self, t: &TransferSummary) -> Result<()>;
    /// Called after all transfers of a round were reported.
    fn on_round_complete(&mut self, round: &RoundSummary) -> Result<()>;
    /// Called for errors that end a round or reject a plan.
    fn on_error(&mut self, err: &str) -> Result<()>;
}

/// Emits human-readable progress and results to a writer.
pub struct HumanReadableEmitter<W: Write> {
    out: W,
}

impl<W: Write> HumanReadableEmitter<W> {
    /// Create a new emitter writing to `out`.
    pub fn new(out: W) -> Self {
        HumanReadableEmitter { out }
    }
}

impl<W: Write> Emitter for HumanReadableEmitter<W> {
    fn on_discovering(&mut self, plan: &TestPlan) -> Result<()> {
        writeln!(
            self.out,
            "Looking for a server ({} bytes, {} TCP, {} UDP)...",
            plan.size(),
            plan.tcp_count(),
            plan.udp_count()
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn on_server_found(&mut self, server: &ServerEndpoint) -> Result<()> {
        writeln!(self.out, "Found server at {server}")?;
        Ok(())
    }

    fn on_progress(&mut self, p: &Progress) -> Result<()> {
        writeln!(
            self.out,
            "UDP #{}: received {}/{} packets",
            p.id, p.received, p.total
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn on_transfer(&mut self, t: &TransferSummary) -> Result<()> {
        writeln!(self.out, "{t}")?;
        Ok(())
    }

    fn on_round_complete(&mut self, round: &RoundSummary) -> Result<()> {
        writeln!(
            self.out,
            "All transfers complete: {} bytes in {:.2}s, {:.1} bits/s aggregate",
            round.total_bytes, round.duration_secs, round.aggregate_bits_per_second
        )?;
        if round.failed > 0 {
            writeln!(self.out, "{} of {} transfers failed", round.failed, round.transfers)?;
        }
        Ok(())
    }

    fn on_error(&mut self, err: &str) -> Result<()> {
        writeln!(self.out, "error: {err}")?;
        Ok(())
    }
}

/// Emits one JSON object per line for each event.
pub struct JsonEmitter<W: Write> {
    out: W,
}

impl<W: Write> JsonEmitter<W> {
    /// Create a new JSON emitter writing to `out`.
    pub fn new(out: W) -> Self {
        JsonEmitter { out }
    }

    fn emit(&mut self, event: &Event) -> Result<()> {
        let json = serde_json::to_string(event)?;
        writeln!(self.out, "{}", json)?;
        Ok(())
    }
}

impl<W: Write> Emitter for JsonEmitter<W> {
    fn on_discovering(&mut self, plan: &TestPlan) -> Result<()> {
        self.emit(&Event::Discovering { plan })
    }

    fn on_server_found(&mut self, server: &ServerEndpoint) -> Result<()> {
        self.emit(&Event::ServerFound { server })
    }

    fn on_progress(&mut self, p: &Progress) -> Result<()> {
        self.emit(&Event::Progress { progress: p })
    }

    fn on_transfer(&mut self, t: &TransferSummary) -> Result<()> {
        self.emit(&Event::Transfer { transfer: t })
    }

    fn on_round_complete(&mut self, round: &RoundSummary) -> Result<()> {
        self.emit(&Event::RoundComplete { round })
    }

    fn on_error(&mut self, err: &str) -> Result<()> {
        self.emit(&Event::Error { error: err })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::summary::{Outcome, Protocol};

    fn udp_summary() -> TransferSummary {
        TransferSummary {
            id: 2,
            protocol: Protocol::Udp,
            duration_secs: 1.5,
            bytes: 2048,
            bits_per_second: 10_922.7,
            success_pct: Some(100.0),
            outcome: Outcome::Complete,
        }
    }

    #[test]
    fn human_readable_transfer_line() {
        let mut buf = Vec::new();
        let mut emitter = HumanReadableEmitter::new(&mut buf);

        emitter.on_transfer(&udp_summary()).unwrap();

        let out = String::from_utf8(buf).unwrap();
        assert_eq!(out, "UDP #2: 1.50s, 10922.7 bits/s, 100.0% packets\n");
    }

    #[test]
    fn json_emitter_valid() {
        let mut buf = Vec::new();
        let mut emitter = JsonEmitter::new(&mut buf);

        emitter.on_transfer(&udp_summary()).unwrap();

        let out = String::from_utf8(buf).unwrap();
        let res = serde_json::from_str::<serde_json::Value>(&out).unwrap();

        assert_eq!(res["type"], "Transfer");
        assert_eq!(res["transfer"]["protocol"], "udp");
        assert_eq!(res["transfer"]["outcome"]["status"], "complete");
        assert_eq!(res["transfer"]["success_pct"], 100.0);
    }

    #[test]
    fn progress_lines() {
        let p = Progress {
            id: 3,
            received: 200,
            total: 977,
        };

        let mut buf = Vec::new();
        HumanReadableEmitter::new(&mut buf).on_progress(&p).unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "UDP #3: received 200/977 packets\n");

        let mut buf = Vec::new();
        JsonEmitter::new(&mut buf).on_progress(&p).unwrap();
        let res: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(res["type"], "Progress");
        assert_eq!(res["progress"]["received"], 200);
        assert_eq!(res["progress"]["total"], 977);
    }

    #[test]
    fn json_server_found() {
        let mut buf = Vec::new();
        let mut emitter = JsonEmitter::new(&mut buf);
        let server = ServerEndpoint {
            address: "192.168.1.4".parse().unwrap(),
            udp_port: 1,
            tcp_port: 2,
        };

        emitter.on_server_found(&server).unwrap();

        let res: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(res["server"]["address"], "192.168.1.4");
        assert_eq!(res["server"]["tcp_port"], 2);
    }
}
