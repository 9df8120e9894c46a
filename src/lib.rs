//! A LAN speed test with broadcast discovery.
//!
//! A [`server::Server`] broadcasts an offer with its TCP and UDP ports once a
//! second. A [`client::Client`] picks up the first offer, then runs a round of
//! concurrent TCP and UDP transfers against that server and reports the
//! throughput of each.
//!
//! # Quick start
//!
//! ```no_run
//! use lanspeed::client::{Client, ClientConfig};
//! use lanspeed::plan::TestPlan;
//! use lanspeed::summary::summarize;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::new(ClientConfig::default());
//! let server = client.discover().await?;
//!
//! let plan = TestPlan::new(1 << 20, 2, 2)?;
//! for result in client.run_round(&plan, server).await {
//!     println!("{}", summarize(&result));
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod discovery;
pub mod emitter;
pub mod error;
pub mod params;
pub mod plan;
pub mod server;
pub mod summary;
pub mod tcp;
pub mod udp;
pub mod wire;
