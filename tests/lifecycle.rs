//! End-to-end lifecycle tests.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use xmppd::lifecycle::anchor::ANCHOR_NAME;
use xmppd::lifecycle::{ServiceBuilder, ServiceState, StartMode, StartupError};
use xmppd::modules::ModuleKey;
use xmppd::net::connection::TerminateSignal;
use xmppd::net::listener::ConnectionHandler;
use xmppd::subsystems;

mod common;

#[tokio::test]
async fn test_three_hosts_one_failing_module() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = common::test_config(tmp.path());
    config.hosts = common::hosts(&["a.example", "b.example", "c.example"], &["mod_ping", "mod_roster"]);

    let framework = common::FlakyFramework::new(vec![ModuleKey::new("b.example", "mod_roster")]);
    let service = ServiceBuilder::new(common::store(config), framework.clone())
        .start(StartMode::Normal)
        .await
        .expect("startup must not fail because of a module");

    assert_eq!(service.state(), ServiceState::Running);
    assert_eq!(framework.catalog.active_count(), 5);
    assert_eq!(service.context().modules.running().len(), 5);
    assert!(!framework
        .catalog
        .active()
        .contains(&ModuleKey::new("b.example", "mod_roster")));
    assert_eq!(framework.starts.lock().unwrap().len(), 6);

    service.stop().await;
}

#[tokio::test]
async fn test_full_lifecycle_with_pid_file_and_client() {
    let tmp = tempfile::tempdir().unwrap();
    let pid_path = tmp.path().join("xmppd.pid");
    let mut config = common::test_config(&tmp.path().join("data"));
    config.pid_file = Some(pid_path.clone());
    config.hosts = common::hosts(&["a.example"], &["mod_ping"]);
    let store = common::store(config);

    let framework = common::FlakyFramework::new(Vec::new());
    let builder = ServiceBuilder::new(store.clone(), framework.clone());
    let steps = subsystems::builtin_steps(builder.context(), std::sync::Arc::new(Default::default()), None);
    let children = subsystems::builtin_children(builder.context());
    let builder = children.into_iter().fold(builder.steps(steps), ServiceBuilder::child);

    let mut service = builder.start(StartMode::Normal).await.unwrap();
    assert_eq!(
        std::fs::read_to_string(&pid_path).unwrap(),
        format!("{}\n", std::process::id())
    );
    assert!(tmp.path().join("data").is_dir());
    let root = service.root().root().clone();
    assert!(root.is_alive(ANCHOR_NAME));
    assert!(root.is_alive(subsystems::DATA_BACKEND_CHILD));
    assert!(root.is_alive(subsystems::AUTHENTICATION_CHILD));
    assert!(root.is_alive(subsystems::TLS_HANDSHAKE_CHILD));

    // A connected client is told to go away during the drain.
    let mut client = TcpStream::connect(service.listener_addr().unwrap()).await.unwrap();
    let connections = service.context().connections.clone();
    common::eventually(|| {
        let connections = connections.clone();
        async move { connections.active_count() == 1 }
    })
    .await;

    let report = service.prepare_stop().await.unwrap();
    assert_eq!(report.drain.captured, 1);
    assert_eq!(report.drain.remaining, 0);
    assert_eq!(service.state(), ServiceState::Stopping);
    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf)).await.unwrap();
    assert_eq!(read.unwrap(), 0, "server side should have closed the stream");

    let stop = service.stop().await;
    assert!(stop.is_clean());
    assert!(!pid_path.exists());
    assert!(root.children().is_empty());
    assert_eq!(framework.catalog.active_count(), 0);
}

#[tokio::test]
async fn test_listener_bind_failure_rolls_back() {
    let tmp = tempfile::tempdir().unwrap();
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let pid_path = tmp.path().join("xmppd.pid");
    let mut config = common::test_config(tmp.path());
    config.pid_file = Some(pid_path.clone());
    config.listener.bind_address = occupied.local_addr().unwrap().to_string();
    config.hosts = common::hosts(&["a.example"], &["mod_ping"]);

    let framework = common::FlakyFramework::new(Vec::new());
    let builder = ServiceBuilder::new(common::store(config), framework.clone());
    let state = builder.context().state.clone();

    let err = builder.start(StartMode::Normal).await.unwrap_err();
    assert!(matches!(err, StartupError::Listener(_)));
    assert_eq!(state.get(), ServiceState::FailedStart);
    assert_eq!(framework.catalog.active_count(), 0);
    assert!(!pid_path.exists());
}

#[tokio::test]
async fn test_unsupported_mode_leaves_running_service_alone() {
    let tmp = tempfile::tempdir().unwrap();
    let framework = common::FlakyFramework::new(Vec::new());
    let builder = ServiceBuilder::new(common::store(common::test_config(tmp.path())), framework.clone());
    let context = builder.context().clone();
    let service = builder.start(StartMode::Normal).await.unwrap();

    let again = ServiceBuilder::new(context.store.clone(), framework);
    assert!(again.start(StartMode::Failover).await.is_err());
    assert_eq!(context.state.get(), ServiceState::Running);

    service.stop().await;
    assert_eq!(context.state.get(), ServiceState::Stopped);
}

/// Holds the stream open and never looks at the terminate request.
struct DeafHandler;

impl ConnectionHandler for DeafHandler {
    fn handle(&self, stream: TcpStream, _peer: SocketAddr, _terminate: TerminateSignal) -> BoxFuture<'static, io::Result<()>> {
        Box::pin(async move {
            let _stream = stream;
            std::future::pending::<io::Result<()>>().await
        })
    }
}

#[tokio::test]
async fn test_stop_aborts_handlers_that_ignore_the_drain() {
    let tmp = tempfile::tempdir().unwrap();
    let framework = common::FlakyFramework::new(Vec::new());
    let service = ServiceBuilder::new(common::store(common::test_config(tmp.path())), framework)
        .connection_handler(Arc::new(DeafHandler))
        .start(StartMode::Normal)
        .await
        .unwrap();

    let mut client = TcpStream::connect(service.listener_addr().unwrap()).await.unwrap();
    let connections = service.context().connections.clone();
    common::eventually(|| {
        let connections = connections.clone();
        async move { connections.active_count() == 1 }
    })
    .await;

    service.stop().await;
    assert_eq!(connections.active_count(), 0);

    let mut buf = [0u8; 1];
    let read = tokio::time::timeout(Duration::from_secs(1), client.read(&mut buf)).await.unwrap();
    assert_eq!(read.unwrap(), 0, "aborted handler should have released the stream");
}
