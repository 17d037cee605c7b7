//! Client listener with backpressure.
//!
//! # Responsibilities
//! - Bind to the configured client address
//! - Accept incoming TCP connections while enforcing `max_connections`
//! - Register every accepted connection with the connection supervisor
//! - Hand the stream to the `ConnectionHandler` collaborator
//! - Stop accepting as soon as the supervision root asks it to

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ListenerConfig;
use crate::lifecycle::sequencer::SubsystemError;
use crate::lifecycle::supervisor::{ChildContext, ChildSpec, RestartPolicy};
use crate::net::connection::{ConnectionSupervisor, TerminateSignal};
use crate::resilience::backoff::RestartBackoff;

/// Name the accept loop is supervised under.
pub const LISTENER_CHILD: &str = "c2s_listener";

/// Pause after consecutive accept failures (fd exhaustion and the like).
const ACCEPT_BACKOFF: RestartBackoff = RestartBackoff::new(Duration::from_millis(10), Duration::from_secs(1));

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid listener address `{address}`: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("failed to bind {address}: {source}")]
    Bind { address: SocketAddr, source: io::Error },
}

/// Serves one accepted client connection.
///
/// Implementations must return once `terminate` resolves.
pub trait ConnectionHandler: Send + Sync + 'static {
    fn handle(&self, stream: TcpStream, peer: SocketAddr, terminate: TerminateSignal) -> BoxFuture<'static, io::Result<()>>;
}

/// Reads and throws away client bytes until the peer hangs up or termination is requested.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiscardHandler;

impl ConnectionHandler for DiscardHandler {
    fn handle(&self, mut stream: TcpStream, _peer: SocketAddr, mut terminate: TerminateSignal) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let mut buf = [0u8; 1024];
            loop {
                tokio::select! {
                    _ = terminate.recv() => return Ok(()),
                    read = stream.read(&mut buf) => {
                        if read? == 0 {
                            return Ok(());
                        }
                    }
                }
            }
        })
    }
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, accepting waits until a slot frees up.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let address: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|source| ListenerError::Address {
                address: config.bind_address.clone(),
                source,
            })?;

        let inner = TcpListener::bind(address)
            .await
            .map_err(|source| ListenerError::Bind { address, source })?;

        tracing::info!(
            address = %inner.local_addr().unwrap_or(address),
            max_connections = config.max_connections,
            "Client listener bound"
        );

        Ok(Self {
            inner,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }

    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Wait for a free slot, then for a connection.
    async fn accept(&self) -> io::Result<(TcpStream, SocketAddr, OwnedSemaphorePermit)> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::other("connection limit semaphore closed"))?;
        let (stream, peer) = self.inner.accept().await?;
        tracing::debug!(
            peer_addr = %peer,
            available_permits = self.connection_limit.available_permits(),
            "Connection accepted"
        );
        Ok((stream, peer, permit))
    }

    /// Supervised accept loop over this listener.
    pub fn child_spec(
        self: Arc<Self>,
        connections: ConnectionSupervisor,
        handler: Arc<dyn ConnectionHandler>,
    ) -> ChildSpec {
        ChildSpec::new(LISTENER_CHILD, RestartPolicy::Transient, move |ctx| {
            accept_loop(ctx, self.clone(), connections.clone(), handler.clone())
        })
    }
}

async fn accept_loop(
    mut ctx: ChildContext,
    listener: Arc<Listener>,
    connections: ConnectionSupervisor,
    handler: Arc<dyn ConnectionHandler>,
) -> Result<(), SubsystemError> {
    let mut failures = 0u32;
    loop {
        let accepted = tokio::select! {
            _ = ctx.stopped() => {
                tracing::info!("Client listener closed");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        let (stream, peer, permit) = match accepted {
            Ok(accepted) => {
                failures = 0;
                accepted
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = ACCEPT_BACKOFF.delay(failures);
                tracing::warn!(error = %e, failures, delay_ms = delay.as_millis() as u64, "Failed to accept connection");
                tokio::select! {
                    _ = ctx.stopped() => {
                        tracing::info!("Client listener closed");
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }
        };

        let (guard, terminate) = connections.register(Some(peer));
        let connection_id = guard.id();
        let serve = handler.handle(stream, peer, terminate);
        let task = tokio::spawn(async move {
            if let Err(e) = serve.await {
                tracing::debug!(connection_id = %connection_id, error = %e, "Connection ended with error");
            }
            drop(guard);
            drop(permit);
        });
        connections.attach(connection_id, task.abort_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::supervisor::SupervisionRoot;
    use std::time::Duration;

    fn config(max_connections: usize) -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_connections,
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..100 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn rejects_unparseable_address() {
        let err = Listener::bind(&ListenerConfig {
            bind_address: "localhost".to_string(),
            max_connections: 1,
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ListenerError::Address { .. }));
    }

    #[test]
    fn accept_failures_back_off_up_to_a_second() {
        let first = ACCEPT_BACKOFF.delay(1);
        assert!(first >= Duration::from_millis(10));
        assert!(ACCEPT_BACKOFF.delay(4) >= Duration::from_millis(80));
        assert!(ACCEPT_BACKOFF.delay(4) > first);

        let ceiling = ACCEPT_BACKOFF.delay(u32::MAX);
        assert!(ceiling >= Duration::from_secs(1));
        assert!(ceiling < Duration::from_millis(1_100));
    }

    #[tokio::test]
    async fn handler_tasks_are_attached_for_abort() {
        struct Stubborn;
        impl ConnectionHandler for Stubborn {
            fn handle(&self, _stream: TcpStream, _peer: SocketAddr, _terminate: TerminateSignal) -> BoxFuture<'static, io::Result<()>> {
                Box::pin(std::future::pending())
            }
        }

        let listener = Arc::new(Listener::bind(&config(4)).await.unwrap());
        let addr = listener.local_addr().unwrap();
        let connections = ConnectionSupervisor::new();
        let root = SupervisionRoot::new(Default::default(), Duration::from_secs(1));
        root.start_child(listener.clone().child_spec(connections.clone(), Arc::new(Stubborn)))
            .unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        eventually(|| connections.active_count() == 1).await;
        for handle in connections.live() {
            handle.signal_terminate();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(connections.active_count(), 1);

        assert_eq!(connections.abort_all(), 1);
        eventually(|| listener.available_permits() == 4).await;

        root.terminate_child(LISTENER_CHILD).await.unwrap();
    }

    #[tokio::test]
    async fn accepted_connections_are_supervised_until_terminated() {
        let listener = Arc::new(Listener::bind(&config(8)).await.unwrap());
        let addr = listener.local_addr().unwrap();
        let connections = ConnectionSupervisor::new();
        let root = SupervisionRoot::new(Default::default(), Duration::from_secs(1));
        root.start_child(listener.clone().child_spec(connections.clone(), Arc::new(DiscardHandler)))
            .unwrap();

        let _client = TcpStream::connect(addr).await.unwrap();
        eventually(|| connections.active_count() == 1).await;
        assert_eq!(listener.available_permits(), 7);

        for handle in connections.live() {
            assert!(handle.signal_terminate());
        }
        eventually(|| connections.active_count() == 0).await;
        eventually(|| listener.available_permits() == 8).await;

        root.terminate_child(LISTENER_CHILD).await.unwrap();
        assert!(!root.is_alive(LISTENER_CHILD));
    }
}
