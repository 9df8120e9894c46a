//! Test plans and the server endpoint a round runs against.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};

use serde::Serialize;

use crate::error::{ConfigError, Result};
use crate::params::MAX_CONNECTIONS;
use crate::wire::Offer;

/// What one round measures: `tcp_count` TCP and `udp_count` UDP transfers of
/// `size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TestPlan {
    size: u64,
    tcp_count: usize,
    udp_count: usize,
}

impl TestPlan {
    /// Validate and build a plan.
    ///
    /// The size must be positive and at least one connection must be
    /// requested; a single protocol may be left at zero.
    pub fn new(
        size: u64,
        tcp_count: usize,
        udp_count: usize,
    ) -> std::result::Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::ZeroSize);
        }
        if tcp_count == 0 && udp_count == 0 {
            return Err(ConfigError::NoConnections);
        }
        for (field, count) in [("tcp_count", tcp_count), ("udp_count", udp_count)] {
            if count > MAX_CONNECTIONS {
                return Err(ConfigError::TooManyConnections {
                    field,
                    limit: MAX_CONNECTIONS,
                });
            }
        }
        Ok(TestPlan {
            size,
            tcp_count,
            udp_count,
        })
    }

    /// Build a plan from user-typed text. Negative, fractional and
    /// overflowing numbers are rejected here, before they can reach the wire.
    pub fn parse(
        size: &str,
        tcp_count: &str,
        udp_count: &str,
    ) -> std::result::Result<Self, ConfigError> {
        TestPlan::new(
            parse_field("size", size)?,
            parse_field("tcp_count", tcp_count)?,
            parse_field("udp_count", udp_count)?,
        )
    }

    /// Bytes requested per transfer.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of TCP transfers.
    pub fn tcp_count(&self) -> usize {
        self.tcp_count
    }

    /// Number of UDP transfers.
    pub fn udp_count(&self) -> usize {
        self.udp_count
    }

    /// Total number of transfers in the round.
    pub fn transfers(&self) -> usize {
        self.tcp_count + self.udp_count
    }
}

fn parse_field<T: std::str::FromStr>(
    field: &'static str,
    value: &str,
) -> std::result::Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::NotANumber {
            field,
            value: value.trim().to_string(),
        })
}

/// A server located through discovery. Valid for one round only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerEndpoint {
    /// Address the offer came from.
    pub address: IpAddr,
    /// Advertised UDP transfer port.
    pub udp_port: u16,
    /// Advertised TCP transfer port.
    pub tcp_port: u16,
}

impl ServerEndpoint {
    /// Endpoint described by `offer`, received from `address`.
    pub fn from_offer(address: IpAddr, offer: Offer) -> Self {
        ServerEndpoint {
            address,
            udp_port: offer.udp_port,
            tcp_port: offer.tcp_port,
        }
    }

    /// Where UDP requests go.
    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.udp_port)
    }

    /// Where TCP transfers connect.
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.tcp_port)
    }
}

impl std::fmt::Display for ServerEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (udp {}, tcp {})",
            self.address, self.udp_port, self.tcp_port
        )
    }
}

/// Supplies one test plan per round.
///
/// `Ok(None)` ends the client loop. An `Err` carrying
/// [`crate::error::LanspeedError::Config`] is reported and the source is
/// asked again; any other error stops the client.
pub trait PlanSource {
    /// Produce the next plan.
    fn next_plan(&mut self) -> impl Future<Output = Result<Option<TestPlan>>> + Send;
}

/// Repeats the same plan, forever or for a fixed number of rounds.
#[derive(Debug, Clone)]
pub struct FixedPlan {
    plan: TestPlan,
    remaining: Option<usize>,
}

impl FixedPlan {
    /// Repeat `plan` for `rounds` rounds, or without end when `None`.
    pub fn new(plan: TestPlan, rounds: Option<usize>) -> Self {
        FixedPlan {
            plan,
            remaining: rounds,
        }
    }
}

impl PlanSource for FixedPlan {
    async fn next_plan(&mut self) -> Result<Option<TestPlan>> {
        match &mut self.remaining {
            Some(0) => Ok(None),
            Some(n) => {
                *n -= 1;
                Ok(Some(self.plan))
            }
            None => Ok(Some(self.plan)),
        }
    }
}
