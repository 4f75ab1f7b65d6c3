use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
};

use futures::Future;
use log::{info, trace, warn};
use rand::Rng;
use tokio::sync::mpsc::{self, Receiver, Sender};

use crate::{client::Client, server::Server};

/// One request in flight: `from` and `to` are node-scoped service ids
/// (`"addr/role"`); the reply channel goes straight back to the caller.
#[derive(Debug)]
pub struct NetworkPackage {
    /// Service id of the addressee.
    pub to: String,
    /// Service id the request was sent on behalf of.
    pub from: String,
    /// Where the serialized response goes.
    pub reply: Sender<String>,
    /// Serialized request.
    pub data: String,
}

/// The node part of a service id (`"b:1/acceptor"` -> `"b:1"`).
fn host_of(id: &str) -> &str {
    id.splitn(2, '/').next().unwrap_or(id)
}

/// Routes packages between registered service mailboxes. Delivery is
/// best effort: messages to unknown, cut-off or unlucky destinations
/// are dropped and the caller times out.
pub struct Network {
    /// Ingress shared by every client this network mints.
    pub tx: Sender<NetworkPackage>,
    rx: Receiver<NetworkPackage>,
    /// Mailboxes by service id; register loops re-insert on restart.
    pub nodes: Arc<Mutex<HashMap<String, Sender<NetworkPackage>>>>,
    /// Hosts currently cut off; traffic from or to them is dropped.
    pub cut: Arc<Mutex<HashSet<String>>>,
    /// Probability of dropping any single message.
    pub loss_rate: Arc<Mutex<f32>>,
}

impl Network {
    /// An empty network; nothing routes until services register.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel(100);
        Self {
            tx,
            rx,
            nodes: Arc::new(Mutex::new(HashMap::default())),
            cut: Arc::new(Mutex::new(HashSet::default())),
            loss_rate: Arc::new(Mutex::new(0.0)),
        }
    }

    /// Mint a client for `target` calling on behalf of the node `origin`.
    pub fn client<C: Client>(&self, origin: &str, target: &str) -> C {
        C::new(target.to_string(), origin.to_string(), self.tx.clone())
    }

    /// Register a service under `id`. The returned routine runs the
    /// server; if a handler fails, the service is rebuilt from `f` and
    /// re-registered, so durable services recover their state.
    pub fn register<S, F, V>(&self, id: &str, f: F) -> impl Future<Output = ()>
    where
        F: Fn() -> V + Send + 'static,
        S: Server<Service = V> + Send + 'static,
    {
        let mut server = S::from_service(f());
        let id = id.to_string();
        self.nodes
            .lock()
            .unwrap()
            .insert(id.clone(), server.client_chan());
        let nodes = self.nodes.clone();
        async move {
            loop {
                if server.run().await.is_ok() {
                    break;
                }
                info!("{}: server restarting", id);
                server = S::from_service(f());
                nodes.lock().unwrap().insert(id.clone(), server.client_chan());
            }
        }
    }

    /// Cut a host off from the rest of the cluster, both directions.
    pub fn isolate(&self, host: &str) {
        self.cut.lock().unwrap().insert(host.to_string());
    }

    /// Reconnect a previously isolated host.
    pub fn heal(&self, host: &str) {
        self.cut.lock().unwrap().remove(host);
    }

    /// Drop each message independently with the given probability.
    pub fn set_loss_rate(&self, rate: f32) {
        *self.loss_rate.lock().unwrap() = rate;
    }

    fn dropped(&self, p: &NetworkPackage) -> bool {
        {
            let cut = self.cut.lock().unwrap();
            if cut.contains(host_of(&p.from)) || cut.contains(host_of(&p.to)) {
                return true;
            }
        }
        let rate = *self.loss_rate.lock().unwrap();
        rate > 0.0 && rand::thread_rng().gen::<f32>() < rate
    }

    /// Route packages until the network is dropped.
    pub async fn run(&mut self) {
        loop {
            let p = self
                .rx
                .recv()
                .await
                .expect("sender cannot be dropped by itself");
            if self.dropped(&p) {
                trace!("dropped {} -> {}", p.from, p.to);
                continue;
            }
            let node = {
                let nodes = self.nodes.lock().unwrap();
                nodes.get(&p.to).cloned()
            };
            if let Some(chan) = node {
                if chan.send(p).await.is_err() {
                    warn!("send to node failed, dropped");
                }
            } else {
                warn!("node not found: {}", p.to);
            }
        }
    }
}

impl Default for Network {
    fn default() -> Self {
        Self::new()
    }
}
