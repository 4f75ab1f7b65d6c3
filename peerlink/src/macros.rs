/// Define an RPC service: generates a module holding the `Request`
/// enum, a typed `Client` with one async method per operation, the
/// `Service` trait to implement, and the mailbox `Server` that
/// dispatches into it.
///
/// ```ignore
/// peerlink::service! {
///     service echo_svc {
///         fn echo(msg: String) -> String;
///     }
/// }
/// ```
#[macro_export]
macro_rules! service {
    () => {
        compile_error!("empty service is not allowed");
    };
    (
        $(#[$service_attr:meta])*
        service $svc_name:ident {
            $(
                $(#[$method_attr:meta])*
                fn $method_name:ident($($arg_id:ident: $arg_ty:ty),*) -> $output:ty;
            )*
        }
    ) => {
        #[allow(missing_docs)]
        $(#[$service_attr])*
        pub mod $svc_name {
            use super::*;

            use $crate::network::NetworkPackage;
            use $crate::{client, server};

            use $crate::tokio::sync::mpsc::{self, Receiver, Sender};
            use $crate::serde_json;
            use $crate::serde::{Deserialize, Serialize};
            use $crate::anyhow::{anyhow, Result};
            use $crate::async_trait;
            use $crate::log::trace;

            #[derive(Debug, Deserialize, Serialize)]
            pub enum Request {
                $(
                    #[allow(non_camel_case_types)]
                    $method_name { $($arg_id: $arg_ty),* }
                ),*
            }

            mod response {
                use super::*;
                $(
                    #[derive(Deserialize, Serialize)]
                    #[allow(non_camel_case_types)]
                    pub struct $method_name {
                        pub data: $output
                    }
                )*
            }

            #[async_trait]
            pub trait Service: Send + 'static {
                $(
                    $(#[$method_attr])*
                    async fn $method_name(&mut self, $($arg_id: $arg_ty),*) -> Result<$output>;
                )*
            }

            #[derive(Debug, Clone)]
            pub struct Client {
                target: String,
                origin: String,
                timeout: ::std::time::Duration,
                tx: Sender<NetworkPackage>,
            }

            impl Client {
                $(
                    pub async fn $method_name(&self, $($arg_id: $arg_ty),*) -> Result<$output> {
                        let req = Request::$method_name { $($arg_id),* };
                        let resp = self.call(serde_json::to_string(&req)?).await?;
                        let resp: response::$method_name = serde_json::from_str(&resp)?;
                        Ok(resp.data)
                    }
                )*

                /// Bound every call made through this client.
                pub fn set_timeout(&mut self, timeout: ::std::time::Duration) {
                    self.timeout = timeout;
                }

                pub async fn call(&self, req: String) -> Result<String> {
                    let (tx, mut rx) = mpsc::channel(8);
                    self.tx
                        .send(NetworkPackage {
                            to: self.target.clone(),
                            from: self.origin.clone(),
                            reply: tx,
                            data: req.clone(),
                        })
                        .await
                        .map_err(|_| anyhow!("network is down"))?;
                    match $crate::tokio::time::timeout(self.timeout, rx.recv()).await {
                        Ok(Some(resp)) => {
                            trace!("req: {}, resp: {}", req, &resp);
                            Ok(resp)
                        }
                        Ok(None) => Err(anyhow!("{}: connection closed", self.target)),
                        Err(_) => Err(anyhow!(
                            "{}: no reply within {:?}",
                            self.target,
                            self.timeout
                        )),
                    }
                }
            }

            impl client::Client for Client {
                fn new(target: String, origin: String, net_tx: Sender<NetworkPackage>) -> Self {
                    Self {
                        target,
                        origin,
                        timeout: client::DEFAULT_TIMEOUT,
                        tx: net_tx,
                    }
                }
            }

            #[derive(Debug)]
            pub struct Server<T: Service + Send> {
                svc: T,
                tx: Sender<NetworkPackage>,
                rx: Receiver<NetworkPackage>,
            }

            #[async_trait]
            impl<T: Service + Send> server::Server for Server<T> {
                type Service = T;

                fn from_service(svc: Self::Service) -> Self {
                    let (tx, rx) = mpsc::channel(100);
                    Self { svc, tx, rx }
                }

                fn client_chan(&self) -> Sender<NetworkPackage> {
                    self.tx.clone()
                }

                async fn handle(&mut self) -> Result<()> {
                    match self.rx.recv().await {
                        Some(NetworkPackage { reply, data, .. }) => {
                            trace!("handle recv: {}", &data);
                            let req: Request = serde_json::from_str(&data)?;
                            match req {
                                $(
                                    Request::$method_name { $($arg_id),* } => {
                                        let data = self.svc.$method_name($($arg_id),*).await?;
                                        let resp = response::$method_name { data };
                                        let resp = serde_json::to_string(&resp)?;
                                        trace!("handle send: {}", &resp);
                                        // A caller that gave up is not our problem.
                                        let _ = reply.send(resp).await;
                                        Ok(())
                                    }
                                )*
                            }
                        }
                        None => Err(anyhow!("request channel closed")),
                    }
                }
            }
        }
    };
}
