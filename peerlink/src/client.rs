use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::network::NetworkPackage;

/// Default bound on a single remote call.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Constructor seam for generated clients, so [`crate::Network::client`]
/// can mint a typed client for any service.
pub trait Client {
    /// Client calling `target` on behalf of the node `origin`. The
    /// origin matters: traffic from a partitioned node is dropped in
    /// both directions.
    fn new(target: String, origin: String, net_tx: Sender<NetworkPackage>) -> Self;
}
