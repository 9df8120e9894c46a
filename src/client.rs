//! The speed-test client.
//!
//! Each round walks `AwaitingInput → Discovering → Transferring → Reporting`
//! and back. Transfers of a round run as independent tasks; the round ends
//! when every one of them has produced a [`TransferResult`].

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::discovery;
use crate::emitter::Emitter;
use crate::error::{LanspeedError, Result};
use crate::params;
use crate::plan::{PlanSource, ServerEndpoint, TestPlan};
use crate::summary::{Protocol, RoundSummary, TransferResult, summarize};
use crate::tcp;
use crate::udp::{self, Progress, ReceiveConfig};

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Port offers are received on.
    pub discovery_port: u16,
    /// Give up discovery after this long. `None` waits forever.
    pub discovery_timeout: Option<Duration>,
    /// Upper bound on a single TCP transfer.
    pub tcp_timeout: Duration,
    pub udp: ReceiveConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            discovery_port: params::DISCOVERY_PORT,
            discovery_timeout: None,
            tcp_timeout: params::TCP_TIMEOUT,
            udp: ReceiveConfig::default(),
        }
    }
}

/// Where the client loop currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundState {
    /// Waiting for the next test plan.
    AwaitingInput,
    /// Looking for a server to run `plan` against.
    Discovering(TestPlan),
    /// Running `plan` against `server`.
    Transferring(TestPlan, ServerEndpoint),
    /// Handing the finished transfers to the emitter.
    Reporting(ServerEndpoint, Vec<TransferResult>),
    /// The loop is over.
    Shutdown,
}

/// Discovers a server and runs test rounds against it.
pub struct Client {
    config: ClientConfig,
}

impl Client {
    /// Create a client with the given settings.
    pub fn new(config: ClientConfig) -> Self {
        Client { config }
    }

    /// Listen for offers until one valid offer arrives.
    ///
    /// A fresh listener is bound for every call so no stale offers from an
    /// earlier round are picked up.
    pub async fn discover(&self) -> Result<ServerEndpoint> {
        let socket = discovery::bind_listener(self.config.discovery_port)?;
        match self.config.discovery_timeout {
            Some(limit) => Ok(timeout(limit, discovery::wait_for_offer(&socket)).await??),
            None => discovery::wait_for_offer(&socket).await,
        }
    }

    /// Run every transfer of `plan` against `server` concurrently and wait
    /// for all of them.
    ///
    /// TCP transfers get ids `1..=tcp_count`, UDP transfers the ids after
    /// them. The results come back sorted by id, one per transfer, even if a
    /// transfer task panicked.
    pub async fn run_round(&self, plan: &TestPlan, server: ServerEndpoint) -> Vec<TransferResult> {
        self.run_transfers(plan, server, None).await
    }

    async fn run_transfers(
        &self,
        plan: &TestPlan,
        server: ServerEndpoint,
        progress: Option<mpsc::Sender<Progress>>,
    ) -> Vec<TransferResult> {
        let size = plan.size();
        let mut tasks = JoinSet::new();
        let mut launched = HashMap::new();

        for id in 1..=plan.tcp_count() {
            let limit = self.config.tcp_timeout;
            let handle = tasks.spawn(tcp::run_transfer(id, server.tcp_addr(), size, limit));
            launched.insert(handle.id(), (id, Protocol::Tcp));
        }
        for id in plan.tcp_count() + 1..=plan.transfers() {
            let config = self.config.udp;
            let transfer =
                udp::run_transfer(id, server.udp_addr(), size, config, progress.clone());
            let handle = tasks.spawn(transfer);
            launched.insert(handle.id(), (id, Protocol::Udp));
        }
        debug!(transfers = launched.len(), %server, "round started");

        let mut results = Vec::with_capacity(launched.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((_, result)) => results.push(result),
                Err(e) => {
                    warn!("transfer task ended abnormally: {e}");
                    if let Some(&(id, protocol)) = launched.get(&e.id()) {
                        results.push(TransferResult::begin(id, protocol, size).fail(e));
                    }
                }
            }
        }

        results.sort_by_key(|r| r.id);
        results
    }

    /// Drive rounds until `plans` runs dry or `shutdown` flips.
    ///
    /// Shutdown is honoured while waiting for input or a server. Transfers
    /// already running are not interrupted; they end by their own time
    /// limits and the round is reported before the loop stops.
    pub async fn run<P, E>(
        &self,
        plans: &mut P,
        emitter: &mut E,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()>
    where
        P: PlanSource,
        E: Emitter + ?Sized,
    {
        let mut state = RoundState::AwaitingInput;
        loop {
            state = match state {
                RoundState::AwaitingInput => {
                    let next = tokio::select! {
                        _ = shutdown.wait_for(|stop| *stop) => None,
                        next = plans.next_plan() => Some(next),
                    };
                    match next {
                        None | Some(Ok(None)) => RoundState::Shutdown,
                        Some(Ok(Some(plan))) => RoundState::Discovering(plan),
                        Some(Err(LanspeedError::Config(e))) => {
                            emitter.on_error(&e.to_string())?;
                            RoundState::AwaitingInput
                        }
                        Some(Err(e)) => return Err(e),
                    }
                }
                RoundState::Discovering(plan) => {
                    emitter.on_discovering(&plan)?;
                    let found = tokio::select! {
                        _ = shutdown.wait_for(|stop| *stop) => None,
                        found = self.discover() => Some(found),
                    };
                    match found {
                        None => RoundState::Shutdown,
                        Some(Ok(server)) => {
                            emitter.on_server_found(&server)?;
                            RoundState::Transferring(plan, server)
                        }
                        Some(Err(e)) => {
                            warn!("discovery failed: {e}");
                            emitter.on_error(&format!("discovery failed: {e}"))?;
                            RoundState::AwaitingInput
                        }
                    }
                }
                RoundState::Transferring(plan, server) => {
                    let (tx, mut rx) = mpsc::channel(64);
                    let round = self.run_transfers(&plan, server, Some(tx));
                    tokio::pin!(round);
                    let results = loop {
                        tokio::select! {
                            results = &mut round => break results,
                            Some(update) = rx.recv() => emitter.on_progress(&update)?,
                        }
                    };
                    while let Ok(update) = rx.try_recv() {
                        emitter.on_progress(&update)?;
                    }
                    RoundState::Reporting(server, results)
                }
                RoundState::Reporting(server, results) => {
                    for result in &results {
                        emitter.on_transfer(&summarize(result))?;
                    }
                    let round = RoundSummary::from_results(server.address, &results);
                    info!(
                        transfers = round.transfers,
                        failed = round.failed,
                        bytes = round.total_bytes,
                        "round complete"
                    );
                    emitter.on_round_complete(&round)?;
                    RoundState::AwaitingInput
                }
                RoundState::Shutdown => break,
            };
        }
        debug!("client stopped");
        Ok(())
    }
}
