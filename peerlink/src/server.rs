use anyhow::Result;
use tokio::sync::mpsc::Sender;

use crate::network::NetworkPackage;

/// Mailbox-driven server half of a generated service.
///
/// `run` processes requests until a handler fails; the network's
/// register loop then rebuilds the whole server from its service
/// factory, so durable services come back with reloaded state.
#[async_trait::async_trait]
pub trait Server {
    /// The service type the server dispatches into.
    type Service;

    /// Wrap a service instance with a fresh mailbox.
    fn from_service(svc: Self::Service) -> Self;

    /// Sender side of the mailbox, handed to the router.
    fn client_chan(&self) -> Sender<NetworkPackage>;

    /// Receive and dispatch one request.
    async fn handle(&mut self) -> Result<()>;

    /// Serve until a handler fails.
    async fn run(&mut self) -> Result<()> {
        loop {
            self.handle().await?;
        }
    }
}
