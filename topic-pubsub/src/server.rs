use std::{future::Future, net::SocketAddr, sync::Arc};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    registry::Registry,
    router::Router,
    session::{Session, SessionOutcome},
};

pub struct Server {
    listener: TcpListener,
    router: Router,
}

impl Server {
    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            router: Router::new(Arc::new(Registry::new())),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(self.router.registry())
    }

    /// Accepts connections until `shutdown` resolves. Sessions already
    /// running are left to finish on their own; a failed accept is logged
    /// and the loop keeps listening.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Server { listener, router } = self;
        tokio::pin!(shutdown);

        loop {
            let (stream, peer) = select! {
                biased;
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok(connection) => connection,
                    Err(error) => {
                        warn!(%error, "failed to accept connection");
                        continue;
                    }
                },
            };
            spawn_session(stream, peer, &router);
        }

        let active = router.registry().len().await;
        info!(active, "stopped accepting connections");
        Ok(())
    }

    /// Runs until the process is interrupted. Without a signal handler the
    /// server keeps running rather than stopping at once.
    pub async fn run_until_interrupted(self) -> Result<()> {
        self.run_until(async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(%error, "cannot listen for interrupts");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn spawn_session(stream: TcpStream, peer: SocketAddr, router: &Router) {
    let id = router.registry().next_id();
    info!(client_id = id, %peer, "handling new connection");

    let session = Session::new(stream, id, peer, router.clone());
    tokio::spawn(async move {
        match session.run().await {
            SessionOutcome::Rejected(error) => debug!(client_id = id, %error, "session rejected"),
            SessionOutcome::Closed(termination) => {
                debug!(client_id = id, ?termination, "session closed")
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        sync::oneshot,
        time::timeout,
    };

    use super::*;

    #[tokio::test]
    async fn stops_accepting_after_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let server = Server::new(listener);
        let addr = server.local_addr().expect("local addr");
        let registry = server.registry();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run_until(async move {
            let _ = shutdown_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream.write_all(b"SUBSCRIBER:NEWS\n").await.expect("handshake");
        timeout(Duration::from_secs(1), async {
            while registry.len().await == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("client registered");

        let _ = shutdown_tx.send(());
        handle.await.expect("join").expect("server result");

        // Sessions outlive the accept loop.
        assert_eq!(registry.len().await, 1);
        stream.write_all(b"terminate\n").await.expect("terminate");
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let read = timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("closed in time")
            .expect("read");
        assert_eq!(read, 0);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn ready_shutdown_wins_over_pending_accepts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let server = Server::new(listener);
        let addr = server.local_addr().expect("local addr");

        timeout(Duration::from_secs(1), server.run_until(std::future::ready(())))
            .await
            .expect("returned in time")
            .expect("server result");

        assert!(TcpStream::connect(addr).await.is_err());
    }
}
