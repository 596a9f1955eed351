use std::{future::Future, net::SocketAddr};

use anyhow::Result;
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    adapter::serve_connection,
    config::HubConfig,
    hub::{Hub, HubHandle},
};

pub struct Server {
    listener: TcpListener,
    hub: HubHandle,
    hub_task: JoinHandle<()>,
}

impl Server {
    /// Binds nothing itself; spawns the hub's control loop, so it must be
    /// called from within a Tokio runtime.
    pub fn new(listener: TcpListener, config: HubConfig) -> Self {
        let (hub, hub_task) = Hub::spawn(config);
        Self {
            listener,
            hub,
            hub_task,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server {
            listener,
            hub,
            hub_task,
        } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    handle_accept_result(accept_result, &hub);
                }
            }
        }

        hub.shutdown();
        if let Err(err) = hub_task.await {
            warn!(error = ?err, "hub task ended abnormally");
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
            }
        })
        .await
    }
}

fn handle_accept_result(result: std::io::Result<(TcpStream, SocketAddr)>, hub: &HubHandle) {
    match result {
        Ok((stream, peer)) => spawn_connection(stream, peer, hub),
        Err(err) => warn!(error = ?err, "failed to accept connection"),
    }
}

fn spawn_connection(stream: TcpStream, peer: SocketAddr, hub: &HubHandle) {
    let hub = hub.clone();
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        if let Err(err) = serve_connection(hub, BufReader::new(reader), writer).await {
            warn!(peer = %peer, error = ?err, "connection closed with error");
        }
    });
}
