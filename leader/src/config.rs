use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// A configuration that cannot yield a correct cluster.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The local address is missing from the member list.
    #[error("local address {0} is not a cluster member")]
    LocalNotListed(String),
    /// The same address appears twice in the member list.
    #[error("duplicate cluster member {0}")]
    DuplicateMember(String),
    /// Two such quorums could be disjoint and decide differently.
    #[error("quorum of {quorum} is not a majority of {cluster} members")]
    QuorumTooSmall {
        /// Configured quorum size.
        quorum: usize,
        /// Cluster size.
        cluster: usize,
    },
    /// No such quorum can ever assemble.
    #[error("quorum of {quorum} exceeds the cluster size {cluster}")]
    QuorumTooLarge {
        /// Configured quorum size.
        quorum: usize,
        /// Cluster size.
        cluster: usize,
    },
}

/// Static cluster configuration for one node. The member list must be
/// identical on every node; each node differs only in `local_addr` and
/// `ledger_dir`.
#[derive(Clone, Debug)]
pub struct LeaderConfig {
    /// This node's address. Must appear in `members`.
    pub local_addr: String,
    /// Addresses of every cluster member, the local node included.
    pub members: Vec<String>,
    /// Responses required to decide; must be a majority of `members`.
    /// Leave `None` for the smallest majority, `floor(n / 2) + 1`.
    pub quorum_size: Option<usize>,
    /// How often the elector re-evaluates leadership.
    pub ping_rate: Duration,
    /// Upper bound of the random delay before proposing, so rival
    /// candidates tend not to duel.
    pub random_wait_before_proposing: Duration,
    /// Bound on waiting for a peer to answer, and on how long
    /// `current_leader` blocks for an election to settle.
    pub leader_ping_response_wait: Duration,
    /// Directory of this node's durable ledger.
    pub ledger_dir: PathBuf,
}

impl LeaderConfig {
    /// Reject configurations that break quorum intersection or name an
    /// inconsistent membership.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for member in &self.members {
            if !seen.insert(member) {
                return Err(ConfigError::DuplicateMember(member.clone()));
            }
        }
        if !seen.contains(&self.local_addr) {
            return Err(ConfigError::LocalNotListed(self.local_addr.clone()));
        }
        let quorum = self.quorum();
        if quorum > self.members.len() {
            return Err(ConfigError::QuorumTooLarge {
                quorum,
                cluster: self.members.len(),
            });
        }
        if quorum <= self.members.len() / 2 {
            return Err(ConfigError::QuorumTooSmall {
                quorum,
                cluster: self.members.len(),
            });
        }
        Ok(())
    }

    /// The effective quorum size: the configured override, or the
    /// smallest majority of the member list.
    pub fn quorum(&self) -> usize {
        self.quorum_size
            .unwrap_or_else(|| self.members.len() / 2 + 1)
    }

    /// Stable numeric id of the local node: its position in the sorted
    /// member list. Identical on every node for the same member set.
    pub fn node_id(&self) -> u32 {
        let mut sorted: Vec<_> = self.members.iter().collect();
        sorted.sort();
        sorted
            .iter()
            .position(|m| **m == self.local_addr)
            .unwrap_or(0) as u32
    }
}
