#![deny(missing_docs)]
#![deny(clippy::all)]
//! Paxos-backed leader election.
//!
//! Each node runs an acceptor, a learner and a pingable leader endpoint,
//! plus a local elector that drives the election state machine: follow a
//! live leader, and when none is known, propose itself after a random
//! wait. Leadership is the value of the highest decided election
//! instance, so a new leader is chosen by deciding the next instance,
//! never by rewriting an old one.

peerlink::service! {
    service leader_svc {
        fn ping() -> bool;
    }
}

pub use leader_svc::{
    Client as LeaderClient, Server as LeaderServer, Service as LeaderService,
};

mod assembly;
mod config;
mod election;

#[cfg(test)]
mod tests;

pub use assembly::{create, AssemblyError, LocalServices};
pub use config::{ConfigError, LeaderConfig};
pub use election::{
    ElectionError, Elector, LeaderElectionService, LeaderState, PingableLeader,
};
