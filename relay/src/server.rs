//! Two-listener relay server

use std::future::{Future, IntoFuture};

use burrow_shared::Result;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::{client_api, external, CorrelationStore, RelayConfig, RelayState};

pub struct RelayServer {
    state: RelayState,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            state: RelayState::new(config),
        })
    }

    pub fn store(&self) -> &CorrelationStore {
        &self.state.store
    }

    /// Bind both configured addresses and serve until `shutdown` resolves.
    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let client = TcpListener::bind(&self.state.config.client_addr).await?;
        let external = TcpListener::bind(&self.state.config.external_addr).await?;
        self.serve(client, external, shutdown).await
    }

    /// Serve on already-bound listeners until `shutdown` resolves.
    pub async fn serve<F>(self, client: TcpListener, external: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(
            client_addr = %client.local_addr()?,
            external_addr = %external.local_addr()?,
            "Burrow relay listening"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        tokio::spawn(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        });

        let client_app = client_api::router(self.state.clone());
        let external_app = external::router(self.state);

        tokio::try_join!(
            axum::serve(client, client_app)
                .with_graceful_shutdown(stopped(stop_rx.clone()))
                .into_future(),
            axum::serve(external, external_app)
                .with_graceful_shutdown(stopped(stop_rx))
                .into_future(),
        )?;

        info!("Burrow relay stopped");
        Ok(())
    }
}

async fn stopped(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
