use std::collections::HashMap;
use std::sync::Arc;

use paxos::{
    Acceptor, AcceptorClient, AcceptorServer, Learner, LearnerClient, LearnerServer, Ledger,
    LedgerError, Proposer,
};
use peerlink::tokio::sync::watch;
use peerlink::tokio::task::JoinHandle;
use peerlink::{tokio, Network};
use thiserror::Error;

use crate::{
    ConfigError, Elector, LeaderClient, LeaderConfig, LeaderElectionService, LeaderServer,
    LeaderState, PingableLeader,
};

/// Why a node could not be brought up.
#[derive(Debug, Error)]
pub enum AssemblyError {
    /// The configuration fails validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The durable ledger could not be opened or read.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// A running node: its acceptor, learner and leader endpoints plus the
/// local elector, all spawned onto the current runtime.
pub struct LocalServices {
    /// Query handle onto this node's election state.
    pub elector: LeaderElectionService,
    tasks: Vec<JoinHandle<()>>,
}

impl LocalServices {
    /// Stop every task this node spawned. The ledger stays on disk, so
    /// a node assembled over the same directory later picks up where
    /// this one left off.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Assemble and start one cluster node described by `config`.
///
/// Registers the node's three endpoints (`addr/acceptor`, `addr/learner`
/// and `addr/leader`) on the network, wires clients to every member
/// listed in the config, and spawns the elector. Endpoint services are
/// rebuilt from the shared ledger if a handler fails, so a storage
/// hiccup surfaces to callers as a timeout, never as phantom state.
pub fn create(net: &Network, config: LeaderConfig) -> Result<LocalServices, AssemblyError> {
    config.validate()?;
    let ledger = Arc::new(Ledger::open(&config.ledger_dir)?);
    let local = config.local_addr.clone();
    let mut tasks = Vec::new();

    let acc_ledger = ledger.clone();
    tasks.push(tokio::spawn(net.register::<AcceptorServer<Acceptor>, _, _>(
        &format!("{}/acceptor", local),
        move || Acceptor::new(acc_ledger.clone()),
    )));
    let lrn_ledger = ledger.clone();
    tasks.push(tokio::spawn(net.register::<LearnerServer<Learner>, _, _>(
        &format!("{}/learner", local),
        move || Learner::new(lrn_ledger.clone()),
    )));

    let (state_tx, state_rx) = watch::channel(LeaderState::NoLeader);
    tasks.push(tokio::spawn(
        net.register::<LeaderServer<PingableLeader>, _, _>(&format!("{}/leader", local), {
            move || PingableLeader::new(state_rx.clone())
        }),
    ));

    let mut acceptors = Vec::new();
    let mut learners = Vec::new();
    let mut peers = HashMap::new();
    for member in &config.members {
        let mut acceptor: AcceptorClient = net.client(&local, &format!("{}/acceptor", member));
        acceptor.set_timeout(config.leader_ping_response_wait);
        acceptors.push(acceptor);
        let mut learner: LearnerClient = net.client(&local, &format!("{}/learner", member));
        learner.set_timeout(config.leader_ping_response_wait);
        learners.push(learner);
        if *member != local {
            let mut leader: LeaderClient = net.client(&local, &format!("{}/leader", member));
            leader.set_timeout(config.leader_ping_response_wait);
            peers.insert(member.clone(), leader);
        }
    }

    let proposer = Proposer::new(
        config.node_id(),
        config.quorum(),
        acceptors.clone(),
        learners.clone(),
        ledger.clone(),
        config.leader_ping_response_wait,
    )?;
    let knowledge = Learner::new(ledger);
    let elector = Elector::new(
        &config, proposer, acceptors, learners, peers, knowledge, state_tx,
    );
    let handle = elector.handle();
    tasks.push(tokio::spawn(elector.run()));

    Ok(LocalServices {
        elector: handle,
        tasks,
    })
}
