#![deny(missing_docs)]
#![deny(clippy::all)]
//! Paxos consensus primitives for leader election.
//!
//! Agreement is reached one election instance at a time: each instance
//! is identified by a sequence number, and within an instance competing
//! proposers are ordered by ballot. A quorum of acceptors decides at
//! most one value per instance; learners record decided values and make
//! the highest-sequence decision queryable.

use serde::{Deserialize, Serialize};

/// A decided `(sequence, value)` pair as tracked by learners.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Election instance the value was decided for.
    pub seq: u64,
    /// Decided value; for leader election, the leader's address.
    pub value: String,
}

/// A value an acceptor has accepted within one instance, tagged with the
/// ballot it was accepted under.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accepted {
    /// Ballot the value was accepted under, see [`ballot_id`].
    pub ballot: u64,
    /// The accepted value.
    pub value: String,
}

/// Reply to a promise request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseReply {
    /// The acceptor promised to ignore lower ballots for this instance.
    Promised {
        /// A value already accepted in this instance, if any; the
        /// proposer must re-propose it instead of its own.
        last_accepted: Option<Accepted>,
    },
    /// A higher ballot was already promised for this instance.
    Rejected {
        /// The ballot standing in the way.
        promised: u64,
    },
}

/// Reply to an accept request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcceptReply {
    /// The `(ballot, value)` pair was durably recorded.
    Accepted,
    /// A higher ballot was promised since; the round is lost.
    Rejected {
        /// The ballot standing in the way.
        promised: u64,
    },
}

/// Pack a proposal round and a node id into one totally ordered ballot.
/// Rounds dominate, node ids break ties, so two proposers can never
/// collide on a ballot.
pub fn ballot_id(round: u32, node: u32) -> u64 {
    (u64::from(round) << 32) | u64::from(node)
}

/// Round component of a packed ballot.
pub fn round_of(ballot: u64) -> u32 {
    (ballot >> 32) as u32
}

peerlink::service! {
    service acceptor_svc {
        fn promise(seq: u64, ballot: u64) -> PromiseReply;
        fn accept(seq: u64, ballot: u64, value: String) -> AcceptReply;
        fn latest_sequence() -> Option<u64>;
    }
}

peerlink::service! {
    service learner_svc {
        fn learn(seq: u64, value: String) -> ();
        fn learned_value(seq: u64) -> Option<String>;
        fn latest_learned() -> Option<Proposal>;
    }
}

pub use acceptor_svc::{
    Client as AcceptorClient, Server as AcceptorServer, Service as AcceptorService,
};

pub use learner_svc::{
    Client as LearnerClient, Server as LearnerServer, Service as LearnerService,
};

mod acceptor;
mod learner;
mod ledger;
mod proposer;


pub use acceptor::Acceptor;
pub use learner::Learner;
pub use ledger::{Batch, Ledger, LedgerError};
pub use proposer::{Decision, ProposeError, Proposer};
