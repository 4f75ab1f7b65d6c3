use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use paxos::{AcceptorClient, Learner, LearnerClient, Proposal, Proposer};
use peerlink::log::{debug, info, trace, warn};
use peerlink::rand::{self, Rng};
use peerlink::tokio;
use peerlink::tokio::sync::watch;
use peerlink::tokio::time::{sleep, timeout};
use thiserror::Error;

use crate::{LeaderClient, LeaderConfig, LeaderService};

/// What this node currently believes about leadership.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LeaderState {
    /// No live leader is known.
    NoLeader,
    /// A peer at this address leads and answered its last ping.
    Following(String),
    /// This node is running an election round.
    Proposing,
    /// This node leads and can still reach an acceptor quorum.
    Leading,
}

/// Refusal to act for the cluster from a non-leader.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ElectionError {
    /// The caller must redirect to whatever `current_leader` returns.
    #[error("this node is not the current leader")]
    NotCurrentLeader,
}

/// Drives one node's view of the election.
///
/// Each tick pulls the newest decision from the learners, then either
/// confirms its own leadership against an acceptor quorum, checks the
/// known leader's pulse, or campaigns. Leadership changes hands by
/// deciding the next election instance; decided instances are never
/// revisited.
pub struct Elector {
    addr: String,
    quorum: usize,
    ping_rate: Duration,
    random_wait: Duration,
    response_wait: Duration,
    proposer: Proposer,
    acceptors: Vec<AcceptorClient>,
    learners: Vec<LearnerClient>,
    peers: HashMap<String, LeaderClient>,
    knowledge: Learner,
    state: watch::Sender<LeaderState>,
}

impl Elector {
    /// Elector for the node described by `config`, over already-built
    /// cluster clients. `peers` maps every other member's address to a
    /// pingable handle on its leader endpoint; `knowledge` is this
    /// node's own durable record of decisions.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &LeaderConfig,
        proposer: Proposer,
        acceptors: Vec<AcceptorClient>,
        learners: Vec<LearnerClient>,
        peers: HashMap<String, LeaderClient>,
        knowledge: Learner,
        state: watch::Sender<LeaderState>,
    ) -> Self {
        Self {
            addr: config.local_addr.clone(),
            quorum: config.quorum(),
            ping_rate: config.ping_rate,
            random_wait: config.random_wait_before_proposing,
            response_wait: config.leader_ping_response_wait,
            proposer,
            acceptors,
            learners,
            peers,
            knowledge,
            state,
        }
    }

    /// Query handle sharing this elector's state.
    pub fn handle(&self) -> LeaderElectionService {
        LeaderElectionService {
            addr: self.addr.clone(),
            state: self.state.subscribe(),
            response_wait: self.response_wait,
        }
    }

    /// Run the election loop until the task is dropped.
    pub async fn run(mut self) {
        loop {
            self.tick().await;
            sleep(self.ping_rate).await;
        }
    }

    async fn tick(&mut self) {
        self.sync_learned().await;
        let leader = match self.knowledge.latest() {
            Ok(latest) => latest.map(|p| p.value),
            Err(e) => {
                warn!("{}: ledger read failed: {}", self.addr, e);
                return;
            }
        };
        match leader {
            Some(addr) if addr == self.addr => {
                if self.quorum_reachable().await {
                    self.set_state(LeaderState::Leading);
                } else {
                    warn!(
                        "{}: cannot reach an acceptor quorum, stepping down",
                        self.addr
                    );
                    self.set_state(LeaderState::NoLeader);
                }
            }
            Some(addr) => {
                if self.leader_alive(&addr).await {
                    self.set_state(LeaderState::Following(addr));
                } else {
                    info!("{}: leader {} is unresponsive", self.addr, addr);
                    self.set_state(LeaderState::NoLeader);
                    self.campaign().await;
                }
            }
            None => {
                self.set_state(LeaderState::NoLeader);
                self.campaign().await;
            }
        }
    }

    /// Pull the newest decision any learner holds into our own record
    /// and raise the proposer's instance floor to match.
    async fn sync_learned(&mut self) {
        let mut deadline = Box::pin(sleep(self.response_wait));
        let mut newest: Option<Proposal> = None;
        {
            let mut pending: FuturesUnordered<_> =
                self.learners.iter().map(|l| l.latest_learned()).collect();
            loop {
                tokio::select! {
                    reply = pending.next() => match reply {
                        Some(Ok(Some(p))) => {
                            if newest.as_ref().map_or(true, |n| n.seq < p.seq) {
                                newest = Some(p);
                            }
                        }
                        Some(Ok(None)) => {}
                        Some(Err(e)) => trace!("{}: learner sync: {}", self.addr, e),
                        None => break,
                    },
                    _ = &mut deadline => break,
                }
            }
        }
        if let Some(p) = newest {
            self.proposer.observe_instance(p.seq);
            if let Err(e) = self.knowledge.record(p.seq, &p.value) {
                warn!("{}: recording synced decision failed: {}", self.addr, e);
            }
        }
    }

    /// A leader that cannot assemble an acceptor quorum could not win a
    /// re-election, so it must not keep claiming the role.
    async fn quorum_reachable(&self) -> bool {
        let mut deadline = Box::pin(sleep(self.response_wait));
        let mut up = 0usize;
        let mut pending: FuturesUnordered<_> =
            self.acceptors.iter().map(|a| a.latest_sequence()).collect();
        while up < self.quorum {
            tokio::select! {
                reply = pending.next() => match reply {
                    Some(Ok(_)) => up += 1,
                    Some(Err(e)) => trace!("{}: acceptor check: {}", self.addr, e),
                    None => break,
                },
                _ = &mut deadline => break,
            }
        }
        up >= self.quorum
    }

    async fn leader_alive(&self, addr: &str) -> bool {
        match self.peers.get(addr) {
            Some(client) => matches!(client.ping().await, Ok(true)),
            None => false,
        }
    }

    /// Stand for election. A random delay lets one of several rival
    /// candidates get ahead; the decision is re-checked after the delay
    /// so a freshly elected leader is followed instead of challenged.
    async fn campaign(&mut self) {
        let bound = self.random_wait.as_millis() as u64;
        if bound > 0 {
            let jitter = rand::thread_rng().gen_range(0..=bound);
            sleep(Duration::from_millis(jitter)).await;
        }
        self.sync_learned().await;
        if let Ok(Some(p)) = self.knowledge.latest() {
            if p.value == self.addr {
                return;
            }
            if self.leader_alive(&p.value).await {
                self.set_state(LeaderState::Following(p.value));
                return;
            }
        }

        self.set_state(LeaderState::Proposing);
        match self.proposer.propose(self.addr.clone()).await {
            Ok(decision) => {
                if let Err(e) = self.knowledge.record(decision.seq, &decision.value) {
                    warn!("{}: recording own decision failed: {}", self.addr, e);
                }
                if decision.value == self.addr {
                    info!("{}: elected leader in instance {}", self.addr, decision.seq);
                    self.set_state(LeaderState::Leading);
                } else {
                    self.set_state(LeaderState::Following(decision.value));
                }
            }
            Err(e) => {
                debug!("{}: election round lost: {}", self.addr, e);
                self.set_state(LeaderState::NoLeader);
            }
        }
    }

    fn set_state(&self, next: LeaderState) {
        let addr = &self.addr;
        self.state.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            info!("{}: {:?} -> {:?}", addr, state, next);
            *state = next;
            true
        });
    }
}

/// Read-side handle onto a running [`Elector`].
#[derive(Clone, Debug)]
pub struct LeaderElectionService {
    addr: String,
    state: watch::Receiver<LeaderState>,
    response_wait: Duration,
}

impl LeaderElectionService {
    /// Address of the node this handle belongs to.
    pub fn local_addr(&self) -> &str {
        &self.addr
    }

    /// This node's current view of the election.
    pub fn state(&self) -> LeaderState {
        self.state.borrow().clone()
    }

    /// Whether this node currently leads.
    pub fn is_leader(&self) -> bool {
        matches!(*self.state.borrow(), LeaderState::Leading)
    }

    /// Guard for leader-only work. Callers act only on `Ok` and redirect
    /// on [`ElectionError::NotCurrentLeader`].
    pub fn ensure_leading(&self) -> Result<(), ElectionError> {
        if self.is_leader() {
            Ok(())
        } else {
            Err(ElectionError::NotCurrentLeader)
        }
    }

    /// The current leader's address, waiting out an in-flight election
    /// for at most the configured response wait.
    pub async fn current_leader(&self) -> Option<String> {
        let mut rx = self.state.clone();
        timeout(self.response_wait, async move {
            loop {
                let known = match &*rx.borrow() {
                    LeaderState::Leading => Some(self.addr.clone()),
                    LeaderState::Following(addr) => Some(addr.clone()),
                    _ => None,
                };
                if known.is_some() {
                    return known;
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        })
        .await
        .ok()
        .flatten()
    }
}

/// Service behind each node's leader endpoint: answers `ping` with
/// whether this node currently leads.
pub struct PingableLeader {
    state: watch::Receiver<LeaderState>,
}

impl PingableLeader {
    /// Endpoint over the elector's state channel.
    pub fn new(state: watch::Receiver<LeaderState>) -> Self {
        Self { state }
    }
}

#[peerlink::async_trait]
impl LeaderService for PingableLeader {
    async fn ping(&mut self) -> peerlink::anyhow::Result<bool> {
        Ok(matches!(*self.state.borrow(), LeaderState::Leading))
    }
}
