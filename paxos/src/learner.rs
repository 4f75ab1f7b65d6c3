use std::sync::Arc;

use peerlink::anyhow::Result;
use peerlink::log::debug;

use crate::{Batch, Ledger, LedgerError, LearnerService, Proposal};

const LATEST_KEY: &str = "learner:latest";

fn record_key(seq: u64) -> String {
    format!("learner:learned:{:020}", seq)
}

/// Learner role: records quorum-confirmed decisions.
///
/// Decisions may arrive out of band (gossiped by whichever proposer
/// reached quorum first), so a learner can know the outcome of a round
/// it never witnessed. Learned values are immutable; duplicate learns
/// are no-ops.
pub struct Learner {
    ledger: Arc<Ledger>,
}

impl Learner {
    /// Learner over the given ledger.
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    /// Record a decision for `seq`.
    pub fn record(&self, seq: u64, value: &str) -> Result<(), LedgerError> {
        if self.ledger.get::<String>(&record_key(seq))?.is_some() {
            return Ok(());
        }
        let mut batch = Batch::default();
        batch.put(&record_key(seq), &value)?;
        if self.latest()?.map_or(true, |p| p.seq < seq) {
            batch.put(
                LATEST_KEY,
                &Proposal {
                    seq,
                    value: value.to_string(),
                },
            )?;
        }
        self.ledger.write(batch)?;
        debug!("learned {} -> {}", seq, value);
        Ok(())
    }

    /// The decision for one instance, if known.
    pub fn lookup(&self, seq: u64) -> Result<Option<String>, LedgerError> {
        self.ledger.get(&record_key(seq))
    }

    /// The newest decision this learner knows of.
    pub fn latest(&self) -> Result<Option<Proposal>, LedgerError> {
        self.ledger.get(LATEST_KEY)
    }
}

#[peerlink::async_trait]
impl LearnerService for Learner {
    async fn learn(&mut self, seq: u64, value: String) -> Result<()> {
        Ok(self.record(seq, &value)?)
    }

    async fn learned_value(&mut self, seq: u64) -> Result<Option<String>> {
        Ok(self.lookup(seq)?)
    }

    async fn latest_learned(&mut self) -> Result<Option<Proposal>> {
        Ok(self.latest()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn learner(dir: &TempDir) -> Learner {
        Learner::new(Arc::new(Ledger::open(dir.path().join("learner")).unwrap()))
    }

    #[test]
    fn duplicate_learns_record_once() {
        let dir = TempDir::new().unwrap();
        let l = learner(&dir);
        l.record(1, "a").unwrap();
        l.record(1, "a").unwrap();
        assert_eq!(l.lookup(1).unwrap(), Some("a".to_string()));
        assert_eq!(
            l.latest().unwrap(),
            Some(Proposal {
                seq: 1,
                value: "a".into()
            })
        );
    }

    #[test]
    fn latest_never_regresses() {
        let dir = TempDir::new().unwrap();
        let l = learner(&dir);
        l.record(5, "newer").unwrap();
        l.record(2, "older").unwrap();
        assert_eq!(l.lookup(2).unwrap(), Some("older".to_string()));
        assert_eq!(l.latest().unwrap().unwrap().value, "newer");
    }

    #[test]
    fn learned_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("learner");
        {
            let l = Learner::new(Arc::new(Ledger::open(&path).unwrap()));
            l.record(3, "durable").unwrap();
        }
        let l = Learner::new(Arc::new(Ledger::open(&path).unwrap()));
        assert_eq!(l.lookup(3).unwrap(), Some("durable".to_string()));
        assert_eq!(l.latest().unwrap().unwrap().seq, 3);
    }
}
