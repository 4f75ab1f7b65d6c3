use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use peerlink::Network;
use tempfile::TempDir;
use tokio::time::sleep;

use crate::{create, AssemblyError, ConfigError, LeaderConfig, LeaderState, LocalServices};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn member_addrs(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("n{}", i)).collect()
}

fn node_config(i: usize, members: &[String], dir: &TempDir) -> LeaderConfig {
    LeaderConfig {
        local_addr: members[i].clone(),
        members: members.to_vec(),
        quorum_size: None,
        ping_rate: Duration::from_millis(50),
        random_wait_before_proposing: Duration::from_millis(100),
        leader_ping_response_wait: Duration::from_millis(300),
        ledger_dir: dir.path().join(format!("n{}", i)),
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(20),
            "timed out waiting for {}",
            what
        );
        sleep(Duration::from_millis(50)).await;
    }
}

struct Cluster {
    nodes: Vec<LocalServices>,
    members: Vec<String>,
    cut: Arc<Mutex<HashSet<String>>>,
    loss: Arc<Mutex<f32>>,
    _dir: TempDir,
}

impl Cluster {
    fn start(n: usize) -> Self {
        let mut net = Network::default();
        let dir = TempDir::new().unwrap();
        let members = member_addrs(n);
        let nodes = (0..n)
            .map(|i| create(&net, node_config(i, &members, &dir)).unwrap())
            .collect();
        let cut = net.cut.clone();
        let loss = net.loss_rate.clone();
        tokio::spawn(async move { net.run().await });
        Self {
            nodes,
            members,
            cut,
            loss,
            _dir: dir,
        }
    }

    fn isolate(&self, host: &str) {
        self.cut.lock().unwrap().insert(host.to_string());
    }

    fn heal(&self, host: &str) {
        self.cut.lock().unwrap().remove(host);
    }

    fn set_loss_rate(&self, rate: f32) {
        *self.loss.lock().unwrap() = rate;
    }

    fn leaders(&self) -> Vec<usize> {
        (0..self.nodes.len())
            .filter(|i| self.nodes[*i].elector.is_leader())
            .collect()
    }

    async fn settled_leader(&self) -> usize {
        wait_for("a single leader the rest follow", || {
            let leaders = self.leaders();
            if leaders.len() != 1 {
                return false;
            }
            let addr = &self.members[leaders[0]];
            (0..self.nodes.len()).filter(|i| *i != leaders[0]).all(|i| {
                self.nodes[i].elector.state() == LeaderState::Following(addr.clone())
            })
        })
        .await;
        self.leaders()[0]
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn elects_exactly_one_leader() {
    init();
    let cluster = Cluster::start(3);
    let leader = cluster.settled_leader().await;
    let addr = cluster.members[leader].clone();

    for node in &cluster.nodes {
        assert_eq!(node.elector.current_leader().await, Some(addr.clone()));
    }
    assert!(cluster.nodes[leader].elector.ensure_leading().is_ok());
    let follower = (leader + 1) % 3;
    assert_eq!(
        cluster.nodes[follower].elector.ensure_leading(),
        Err(crate::ElectionError::NotCurrentLeader)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn partitioned_leader_steps_down_and_majority_reelects() {
    init();
    let cluster = Cluster::start(3);
    let old = cluster.settled_leader().await;
    let old_addr = cluster.members[old].clone();

    cluster.isolate(&old_addr);
    wait_for("the cut-off leader to step down", || {
        !cluster.nodes[old].elector.is_leader()
    })
    .await;
    wait_for("a new leader on the majority side", || {
        cluster.leaders().iter().any(|i| *i != old)
    })
    .await;

    cluster.heal(&old_addr);
    wait_for("the old leader to fall in line", || {
        let leaders = cluster.leaders();
        leaders.len() == 1
            && leaders[0] != old
            && matches!(cluster.nodes[old].elector.state(), LeaderState::Following(_))
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn elects_a_leader_despite_message_loss() {
    init();
    let cluster = Cluster::start(3);
    cluster.set_loss_rate(0.1);
    wait_for("an election to finish on a lossy network", || {
        cluster.leaders().len() == 1
    })
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn five_nodes_survive_losing_a_minority() {
    init();
    let cluster = Cluster::start(5);
    let leader = cluster.settled_leader().await;

    // Cut two non-leaders; the remaining three are still a quorum.
    let gone: Vec<_> = (0..5).filter(|i| *i != leader).take(2).collect();
    for i in &gone {
        cluster.isolate(&cluster.members[*i]);
    }
    sleep(Duration::from_millis(500)).await;
    assert!(cluster.nodes[leader].elector.is_leader());
}

#[tokio::test(flavor = "multi_thread")]
async fn create_rejects_a_non_majority_quorum() {
    init();
    let net = Network::default();
    let dir = TempDir::new().unwrap();
    let members = member_addrs(3);
    let mut cfg = node_config(0, &members, &dir);
    cfg.quorum_size = Some(1);
    match create(&net, cfg) {
        Err(AssemblyError::Config(ConfigError::QuorumTooSmall { quorum: 1, cluster: 3 })) => {}
        other => panic!("expected quorum rejection, got {:?}", other.err()),
    }
}
