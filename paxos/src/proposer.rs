use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use peerlink::log::{debug, info, warn};
use peerlink::tokio;
use peerlink::tokio::time::sleep;
use thiserror::Error;

use crate::{
    ballot_id, round_of, AcceptReply, AcceptorClient, Ledger, LedgerError, LearnerClient,
    PromiseReply,
};

const ROUND_KEY: &str = "proposer:round";

/// Outcome of a successful round: the instance it was decided in and the
/// decided value, which is not necessarily the value this proposer
/// started with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Election instance the value was decided for.
    pub seq: u64,
    /// The decided value.
    pub value: String,
}

/// Why a round failed. Both kinds are recoverable: the caller decides
/// whether to retry with a fresh, higher ballot.
#[derive(Debug, Error)]
pub enum ProposeError {
    /// Fewer than quorum-many acceptors promised within the deadline.
    #[error("promise quorum not reached: {got} of {needed}")]
    PromiseQuorum {
        /// Promises obtained.
        got: usize,
        /// Quorum size required.
        needed: usize,
    },
    /// Fewer than quorum-many acceptors acknowledged the accept.
    #[error("accept quorum not reached: {got} of {needed}")]
    AcceptQuorum {
        /// Acks obtained.
        got: usize,
        /// Quorum size required.
        needed: usize,
    },
    /// The round counter could not be persisted; proposing with an
    /// unpersisted ballot could replay a sequence after a crash.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Drives single quorum rounds against the full acceptor set.
///
/// Each round is self-contained and safe to abandon: an unconsummated
/// promise left at a minority of acceptors is superseded by any higher
/// ballot later.
pub struct Proposer {
    node_id: u32,
    quorum: usize,
    acceptors: Vec<AcceptorClient>,
    learners: Vec<LearnerClient>,
    ledger: Arc<Ledger>,
    round: u32,
    instance: u64,
    round_wait: Duration,
}

impl Proposer {
    /// Proposer `node_id` over the given cluster view. `quorum` is the
    /// number of matching responses required per phase; `round_wait`
    /// bounds a round's two voting phases together, and the learner
    /// gossip separately. The last used round number is recovered from
    /// the ledger.
    pub fn new(
        node_id: u32,
        quorum: usize,
        acceptors: Vec<AcceptorClient>,
        learners: Vec<LearnerClient>,
        ledger: Arc<Ledger>,
        round_wait: Duration,
    ) -> Result<Self, LedgerError> {
        let round = ledger.get(ROUND_KEY)?.unwrap_or(0);
        Ok(Self {
            node_id,
            quorum,
            acceptors,
            learners,
            ledger,
            round,
            instance: 0,
            round_wait,
        })
    }

    /// Raise the instance floor: the next proposal targets the first
    /// instance above the highest decided one we know of.
    pub fn observe_instance(&mut self, seq: u64) {
        self.instance = self.instance.max(seq);
    }

    /// Raise the ballot round above an externally observed ballot, so
    /// the next attempt can beat it.
    pub fn observe_ballot(&mut self, ballot: u64) {
        self.round = self.round.max(round_of(ballot));
    }

    /// Run one round for `value` in the next undecided instance.
    ///
    /// Promise requests fan out to every acceptor in parallel; with a
    /// quorum of promises (re-proposing any previously accepted value,
    /// per the override rule) the accept phase fans out the same way.
    /// Unreachable acceptors count as non-responses, never as votes.
    /// On success the decision is gossiped to every learner.
    pub async fn propose(&mut self, value: String) -> Result<Decision, ProposeError> {
        let seq = self.instance + 1;
        self.round += 1;
        // Persisted before first use so a restart cannot reuse a ballot.
        self.ledger.put(ROUND_KEY, &self.round)?;
        let ballot = ballot_id(self.round, self.node_id);
        debug!("proposing {:?} in instance {} ballot {:#x}", value, seq, ballot);

        let mut deadline = Box::pin(sleep(self.round_wait));
        let mut promises = 0usize;
        let mut prior: Option<crate::Accepted> = None;
        let mut highest_reject = 0u64;
        {
            let mut pending: FuturesUnordered<_> =
                self.acceptors.iter().map(|c| c.promise(seq, ballot)).collect();
            while promises < self.quorum {
                tokio::select! {
                    reply = pending.next() => match reply {
                        Some(Ok(PromiseReply::Promised { last_accepted })) => {
                            promises += 1;
                            if let Some(p) = last_accepted {
                                if prior.as_ref().map_or(true, |q| q.ballot < p.ballot) {
                                    prior = Some(p);
                                }
                            }
                        }
                        Some(Ok(PromiseReply::Rejected { promised })) => {
                            highest_reject = highest_reject.max(promised);
                        }
                        Some(Err(e)) => debug!("promise({}): {}", seq, e),
                        None => break,
                    },
                    _ = &mut deadline => break,
                }
            }
        }
        // Lost rounds still teach us what to beat next time.
        self.observe_ballot(highest_reject);
        if promises < self.quorum {
            return Err(ProposeError::PromiseQuorum {
                got: promises,
                needed: self.quorum,
            });
        }

        let value = match prior {
            Some(p) => {
                info!(
                    "instance {} already carries a value from ballot {:#x}, re-proposing it",
                    seq, p.ballot
                );
                p.value
            }
            None => value,
        };

        let mut acks = 0usize;
        {
            let mut pending: FuturesUnordered<_> = self
                .acceptors
                .iter()
                .map(|c| c.accept(seq, ballot, value.clone()))
                .collect();
            while acks < self.quorum {
                tokio::select! {
                    reply = pending.next() => match reply {
                        Some(Ok(AcceptReply::Accepted)) => acks += 1,
                        Some(Ok(AcceptReply::Rejected { promised })) => {
                            highest_reject = highest_reject.max(promised);
                        }
                        Some(Err(e)) => debug!("accept({}): {}", seq, e),
                        None => break,
                    },
                    _ = &mut deadline => break,
                }
            }
        }
        self.observe_ballot(highest_reject);
        if acks < self.quorum {
            return Err(ProposeError::AcceptQuorum {
                got: acks,
                needed: self.quorum,
            });
        }

        // Decided. Gossip the outcome so followers learn it without
        // having voted; stragglers catch up through their own polling.
        let mut gossip_deadline = Box::pin(sleep(self.round_wait));
        let mut told = 0usize;
        {
            let mut pending: FuturesUnordered<_> = self
                .learners
                .iter()
                .map(|l| l.learn(seq, value.clone()))
                .collect();
            loop {
                tokio::select! {
                    reply = pending.next() => match reply {
                        Some(Ok(())) => told += 1,
                        Some(Err(e)) => debug!("learn({}): {}", seq, e),
                        None => break,
                    },
                    _ = &mut gossip_deadline => break,
                }
            }
        }
        if told < self.learners.len() {
            warn!(
                "decision for instance {} reached {} of {} learners",
                seq,
                told,
                self.learners.len()
            );
        }
        self.instance = self.instance.max(seq);
        debug!("instance {} decided: {}", seq, value);
        Ok(Decision { seq, value })
    }
}
