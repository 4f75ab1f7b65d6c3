use std::sync::Arc;

use peerlink::anyhow::Result;
use peerlink::log::trace;
use serde::{Deserialize, Serialize};

use crate::{
    AcceptReply, Accepted, AcceptorService, Batch, Ledger, LedgerError, PromiseReply,
};

const LATEST_KEY: &str = "acceptor:latest";

fn state_key(seq: u64) -> String {
    format!("acceptor:state:{:020}", seq)
}

/// Per-instance register: the highest ballot promised and the highest
/// accepted `(ballot, value)` pair.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct InstanceState {
    promised: Option<u64>,
    accepted: Option<Accepted>,
}

/// Acceptor role: durably promises and accepts proposals, one decision
/// at a time per instance.
///
/// Every transition is written to the ledger before the reply leaves the
/// node, so a crashed acceptor comes back still holding its promises. A
/// failed ledger write fails the request; nothing is acknowledged that
/// was not persisted first.
pub struct Acceptor {
    ledger: Arc<Ledger>,
}

impl Acceptor {
    /// Acceptor over the given ledger.
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    fn instance(&self, seq: u64) -> Result<InstanceState, LedgerError> {
        Ok(self.ledger.get(&state_key(seq))?.unwrap_or_default())
    }

    fn store(&self, seq: u64, state: &InstanceState) -> Result<(), LedgerError> {
        let mut batch = Batch::default();
        batch.put(&state_key(seq), state)?;
        let latest: Option<u64> = self.ledger.get(LATEST_KEY)?;
        if latest.map_or(true, |l| l < seq) {
            batch.put(LATEST_KEY, &seq)?;
        }
        self.ledger.write(batch)
    }
}

#[peerlink::async_trait]
impl AcceptorService for Acceptor {
    async fn promise(&mut self, seq: u64, ballot: u64) -> Result<PromiseReply> {
        let mut state = self.instance(seq)?;
        if let Some(promised) = state.promised {
            if promised > ballot {
                trace!("promise({}, {:#x}) rejected by {:#x}", seq, ballot, promised);
                return Ok(PromiseReply::Rejected { promised });
            }
        }
        state.promised = Some(ballot);
        self.store(seq, &state)?;
        Ok(PromiseReply::Promised {
            last_accepted: state.accepted,
        })
    }

    async fn accept(&mut self, seq: u64, ballot: u64, value: String) -> Result<AcceptReply> {
        let mut state = self.instance(seq)?;
        if let Some(promised) = state.promised {
            if promised > ballot {
                trace!("accept({}, {:#x}) rejected by {:#x}", seq, ballot, promised);
                return Ok(AcceptReply::Rejected { promised });
            }
        }
        state.promised = Some(ballot);
        state.accepted = Some(Accepted { ballot, value });
        self.store(seq, &state)?;
        Ok(AcceptReply::Accepted)
    }

    async fn latest_sequence(&mut self) -> Result<Option<u64>> {
        Ok(self.ledger.get(LATEST_KEY)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ballot_id;
    use tempfile::TempDir;

    fn acceptor(dir: &TempDir) -> Acceptor {
        Acceptor::new(Arc::new(Ledger::open(dir.path().join("acceptor")).unwrap()))
    }

    #[tokio::test]
    async fn promise_orders_by_ballot() {
        let dir = TempDir::new().unwrap();
        let mut acc = acceptor(&dir);
        let low = ballot_id(1, 0);
        let high = ballot_id(2, 1);

        assert_eq!(
            acc.promise(1, high).await.unwrap(),
            PromiseReply::Promised { last_accepted: None }
        );
        assert_eq!(
            acc.promise(1, low).await.unwrap(),
            PromiseReply::Rejected { promised: high }
        );
        assert_eq!(
            acc.accept(1, low, "x".into()).await.unwrap(),
            AcceptReply::Rejected { promised: high }
        );
    }

    #[tokio::test]
    async fn promise_and_accept_are_idempotent() {
        let dir = TempDir::new().unwrap();
        let mut acc = acceptor(&dir);
        let b = ballot_id(1, 0);

        let first = acc.promise(1, b).await.unwrap();
        let second = acc.promise(1, b).await.unwrap();
        assert_eq!(first, second);

        assert_eq!(acc.accept(1, b, "x".into()).await.unwrap(), AcceptReply::Accepted);
        assert_eq!(acc.accept(1, b, "x".into()).await.unwrap(), AcceptReply::Accepted);
        assert_eq!(acc.latest_sequence().await.unwrap(), Some(1));
    }

    #[tokio::test]
    async fn promise_reports_prior_accepted_value() {
        let dir = TempDir::new().unwrap();
        let mut acc = acceptor(&dir);
        let b1 = ballot_id(1, 0);
        let b2 = ballot_id(2, 1);

        acc.promise(3, b1).await.unwrap();
        acc.accept(3, b1, "winner".into()).await.unwrap();

        assert_eq!(
            acc.promise(3, b2).await.unwrap(),
            PromiseReply::Promised {
                last_accepted: Some(Accepted {
                    ballot: b1,
                    value: "winner".into()
                })
            }
        );
    }

    #[tokio::test]
    async fn instances_are_independent() {
        let dir = TempDir::new().unwrap();
        let mut acc = acceptor(&dir);
        let high = ballot_id(9, 0);
        let low = ballot_id(1, 1);

        acc.promise(1, high).await.unwrap();
        // A fresh instance is untouched by older promises.
        assert_eq!(
            acc.promise(2, low).await.unwrap(),
            PromiseReply::Promised { last_accepted: None }
        );
        assert_eq!(acc.latest_sequence().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn promises_survive_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("acceptor");
        let high = ballot_id(5, 0);
        {
            let mut acc = Acceptor::new(Arc::new(Ledger::open(&path).unwrap()));
            acc.promise(1, high).await.unwrap();
        }
        let mut acc = Acceptor::new(Arc::new(Ledger::open(&path).unwrap()));
        assert_eq!(
            acc.promise(1, ballot_id(1, 1)).await.unwrap(),
            PromiseReply::Rejected { promised: high }
        );
        assert_eq!(acc.latest_sequence().await.unwrap(), Some(1));
    }
}
