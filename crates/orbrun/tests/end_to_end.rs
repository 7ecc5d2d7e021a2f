//! End-to-end tests: a client and a server endpoint joined by the loopback
//! transport, driven through typed proxies.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use orbrun::CallContext;
use orbrun::Client;
use orbrun::ClientConfig;
use orbrun::ClientError;
use orbrun::Fault;
use orbrun::Interface;
use orbrun::ObjectId;
use orbrun::ObjectProxy;
use orbrun::ObjectRef;
use orbrun::Server;
use orbrun::ServerConfig;
use orbrun::Status;
use orbrun::auth::ApiKeyAuth;
use orbrun::cancel::TokenState;
use orbrun::client;
use orbrun::loopback::LoopbackTransport;
use orbrun::transport;
use orbrun::transport::Transport;
use tokio::sync::oneshot;

// ============================================================================
//  SERVER-SIDE TYPES
// ============================================================================

struct Counter {
    value: AtomicU64,
}

struct Worker {
    steps: AtomicU64,
}

fn counter_interface() -> Interface<Counter> {
    Interface::new("Counter")
        .method("increment", |c: &Counter, (): (), _: &CallContext| {
            Ok(c.value.fetch_add(1, Ordering::SeqCst) + 1)
        })
        .method("get", |c: &Counter, (): (), _: &CallContext| Ok(c.value.load(Ordering::SeqCst)))
        .method(
            "absorb",
            |c: &Counter, (other,): (ObjectRef<Counter>,), _: &CallContext| {
                let other = other.get().ok_or_else(|| Fault::new("unresolved handle"))?;
                let taken = other.value.swap(0, Ordering::SeqCst);
                Ok(c.value.fetch_add(taken, Ordering::SeqCst) + taken)
            },
        )
        .contents(|c: &Counter| c.value.load(Ordering::SeqCst))
}

fn worker_interface() -> Interface<Worker> {
    Interface::new("Worker").method("spin", |w: &Worker, (limit,): (u64,), cx: &CallContext| {
        for _ in 0..limit {
            if cx.must_cancel() {
                return Err(Fault::cancelled());
            }
            w.steps.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(w.steps.load(Ordering::SeqCst))
    })
}

fn server(config: ServerConfig) -> Arc<Server> {
    let server = Server::new(config);
    server.register_type(counter_interface(), || Ok(Counter { value: AtomicU64::new(0) }));
    server.register_type(worker_interface(), || Ok(Worker { steps: AtomicU64::new(0) }));
    server
}

fn connect(server: &Arc<Server>, config: ClientConfig) -> Arc<Client> {
    Client::new(Arc::new(LoopbackTransport::new(server.clone())), config)
}

// ============================================================================
//  CLIENT-SIDE STUBS
// ============================================================================

/// What a generated stub for the Counter interface looks like.
struct CounterProxy(ObjectProxy<Counter>);

impl CounterProxy {
    async fn make(client: &Arc<Client>) -> client::Result<Self> {
        Ok(Self(client.make("Counter").await?))
    }

    async fn increment(&self) -> client::Result<u64> {
        self.0.call("increment", &()).await
    }

    async fn get(&self) -> client::Result<u64> {
        self.0.call("get", &()).await
    }

    async fn absorb(&self, other: &CounterProxy) -> client::Result<u64> {
        self.0.call("absorb", &(other.0.handle(),)).await
    }
}

// ============================================================================
//  LIFECYCLE
// ============================================================================

#[tokio::test]
async fn test_counter_lifecycle() -> anyhow::Result<()> {
    orbrun::init_tracing();
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let counter = CounterProxy::make(&client).await?;
    let id = counter.0.id();
    assert!(server.registry().contains(id));
    assert_eq!(server.registry().owner(id), Some(client.session()));

    assert_eq!(counter.increment().await?, 1);
    assert_eq!(counter.increment().await?, 2);

    client.factory().delete_object(id).await?;
    let err = counter.get().await.unwrap_err();
    assert_eq!(err.status(), Status::Exception);
    assert!(err.message().unwrap_or_default().contains("not found"));
    assert!(!err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_make_unknown_type() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    assert_eq!(client.factory().make_object("Nope").await?, ObjectId::INVALID);
    let err = client.make::<Counter>("Nope").await.unwrap_err();
    assert!(matches!(err, ClientError::Construction(_)));
    assert!(server.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_release_deletes_remote_object() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let counter: ObjectProxy<Counter> = client.make("Counter").await?;
    let id = counter.id();
    counter.release().await?;

    assert!(!server.registry().contains(id));
    assert!(client.active().is_empty());
    client.factory().delete_object(id).await?;
    Ok(())
}

#[tokio::test]
async fn test_single_proxy_per_object() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let counter: ObjectProxy<Counter> = client.make("Counter").await?;
    let id = counter.id();
    assert_eq!(client.attach::<Counter>(id).unwrap_err(), ClientError::AlreadyBound(id));

    drop(counter);
    let again: ObjectProxy<Counter> = client.attach(id)?;
    assert_eq!(again.id(), id);
    Ok(())
}

#[tokio::test]
async fn test_sync_reclaims_dropped_proxies() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());
    let bystander = connect(&server, ClientConfig::default());

    let kept = CounterProxy::make(&client).await?;
    let leaked = CounterProxy::make(&client).await?;
    let other = CounterProxy::make(&bystander).await?;
    let leaked_id = leaked.0.id();
    drop(leaked);

    client.sync().await?;
    assert_eq!(server.registry().ids(), {
        let mut ids = vec![kept.0.id(), other.0.id()];
        ids.sort();
        ids
    });
    assert!(!server.registry().contains(leaked_id));
    Ok(())
}

/// Loopback transport that holds back the reply to its first call until
/// released.
struct HeldReplyTransport {
    inner: LoopbackTransport,
    hold: Mutex<Option<oneshot::Receiver<()>>>,
}

#[async_trait::async_trait]
impl Transport for HeldReplyTransport {
    async fn call(&self, payload: &[u8]) -> transport::Result<Vec<u8>> {
        let reply = self.inner.call(payload).await?;
        let hold = self.hold.lock().unwrap().take();
        if let Some(release) = hold {
            let _ = release.await;
        }
        Ok(reply)
    }

    async fn send(&self, payload: &[u8]) -> transport::Result<()> {
        self.inner.send(payload).await
    }
}

#[tokio::test]
async fn test_sync_waits_for_pending_make() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let (release, hold) = oneshot::channel();
    let held = HeldReplyTransport {
        inner: LoopbackTransport::new(server.clone()),
        hold: Mutex::new(Some(hold)),
    };
    let client = Client::new(Arc::new(held), ClientConfig::default());

    let maker = client.clone();
    let make = tokio::spawn(async move { CounterProxy::make(&maker).await });
    for _ in 0..500 {
        if server.registry().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(server.registry().len(), 1);

    let syncer = client.clone();
    let sync = tokio::spawn(async move { syncer.sync().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(server.registry().len(), 1);

    let _ = release.send(());
    let counter = make.await??;
    sync.await??;

    assert_eq!(server.registry().ids(), vec![counter.0.id()]);
    assert_eq!(counter.increment().await?, 1);
    Ok(())
}

#[tokio::test]
async fn test_sync_objects_delete_list() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let a = client.factory().make_object("Counter").await?;
    let b = client.factory().make_object("Counter").await?;
    let c = client.factory().make_object("Counter").await?;

    client.factory().sync_objects(&[a, c], false).await?;
    assert_eq!(server.registry().ids(), vec![b]);
    Ok(())
}

// ============================================================================
//  CALL SEMANTICS
// ============================================================================

#[tokio::test]
async fn test_object_handle_argument() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let a = CounterProxy::make(&client).await?;
    let b = CounterProxy::make(&client).await?;
    a.increment().await?;
    b.increment().await?;
    b.increment().await?;

    assert_eq!(a.absorb(&b).await?, 3);
    assert_eq!(b.get().await?, 0);

    let missing: ObjectRef<Counter> = ObjectRef::remote(ObjectId(4242));
    let err = a.0.call::<_, u64>("absorb", &(missing,)).await.unwrap_err();
    assert_eq!(err.status(), Status::Exception);
    Ok(())
}

#[tokio::test]
async fn test_serialized_contents() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let counter = CounterProxy::make(&client).await?;
    counter.increment().await?;
    assert_eq!(counter.0.contents::<u64>().await?, 1);

    let worker: ObjectProxy<Worker> = client.make("Worker").await?;
    assert!(matches!(worker.contents::<u64>().await, Err(ClientError::Exception(_))));
    Ok(())
}

#[tokio::test]
async fn test_notify_returns_without_reply() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let counter = CounterProxy::make(&client).await?;
    counter.0.notify("increment", &()).await?;

    let mut value = 0;
    for _ in 0..200 {
        value = counter.get().await?;
        if value == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(value, 1);
    Ok(())
}

#[tokio::test]
async fn test_ping_and_addresses() -> anyhow::Result<()> {
    let config = ServerConfig::default()
        .with_status_address("ipc:///tmp/orb-status")
        .with_control_address("ipc:///tmp/orb-control");
    let server = server(config);
    let client = connect(&server, ClientConfig::default());
    let factory = client.factory();

    assert_eq!(factory.ping("heartbeat").await?, "heartbeat");
    assert_eq!(factory.get_status_publish_address().await?, "ipc:///tmp/orb-status");
    assert_eq!(factory.get_control_address().await?, "ipc:///tmp/orb-control");
    Ok(())
}

// ============================================================================
//  CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_cancel_running_command() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());

    let worker: ObjectProxy<Worker> = client.make("Worker").await?;
    let command = client.next_command_id();
    let task = tokio::spawn(async move {
        let result = worker.call_with_id::<_, u64>(command, "spin", &(60_000u64,)).await;
        (worker, result)
    });

    for _ in 0..500 {
        if server.commands().state(command) == TokenState::Running(command) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(server.commands().state(command), TokenState::Running(command));

    client.factory().cancel(command + 1_000_000).await?;
    assert_eq!(server.commands().state(command), TokenState::Running(command));

    client.factory().cancel(command).await?;
    let (_worker, result) = task.await?;
    let err = result.unwrap_err();
    assert_eq!(err, ClientError::Exception(Fault::CANCELLED.to_string()));
    assert_eq!(server.commands().state(command), TokenState::Idle);
    Ok(())
}

// ============================================================================
//  FAILURES
// ============================================================================

#[tokio::test]
async fn test_auth_failure() -> anyhow::Result<()> {
    let server = server(ServerConfig::default().with_auth(ApiKeyAuth::new("sesame")));

    let stranger = connect(&server, ClientConfig::default());
    let err = stranger.factory().make_object("Counter").await.unwrap_err();
    assert_eq!(err.status(), Status::AuthFailure);
    assert!(!err.is_retryable());
    assert!(server.registry().is_empty());

    let friend = connect(&server, ClientConfig::default().with_credential("sesame"));
    let counter = CounterProxy::make(&friend).await?;
    assert_eq!(counter.increment().await?, 1);
    Ok(())
}

/// Never answers within any reasonable timeout.
struct StalledTransport;

#[async_trait::async_trait]
impl Transport for StalledTransport {
    async fn call(&self, _payload: &[u8]) -> transport::Result<Vec<u8>> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(transport::TransportError::Timeout)
    }

    async fn send(&self, _payload: &[u8]) -> transport::Result<()> {
        Err(transport::TransportError::ConnectionLost("peer gone".into()))
    }
}

#[tokio::test]
async fn test_timeout_is_comm_failure() {
    let config = ClientConfig::default().with_timeout(Duration::from_millis(20));
    let client = Client::new(Arc::new(StalledTransport), config);

    let err = client.factory().ping("anyone").await.unwrap_err();
    assert_eq!(err.status(), Status::CommFailure);
    assert!(err.is_retryable());

    let err = client
        .notify(ObjectId(1), "increment", orbrun::CallFlags::NONE, &())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CommFailure(_)));
}

#[tokio::test]
async fn test_oversized_payload_is_comm_failure() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let loopback = LoopbackTransport::new(server.clone()).with_max_payload(256);
    let client = Client::new(Arc::new(loopback), ClientConfig::default());

    assert_eq!(client.factory().ping("short").await?, "short");

    let long = "x".repeat(1024);
    let err = client.factory().ping(&long).await.unwrap_err();
    assert_eq!(err, ClientError::CommFailure(transport::TransportError::PayloadTooLarge.to_string()));

    let err = client
        .notify(ObjectId::FACTORY, "ping", orbrun::CallFlags::NONE, &(long.as_str(),))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn test_stopped_server_refuses_calls() -> anyhow::Result<()> {
    let server = server(ServerConfig::default());
    let client = connect(&server, ClientConfig::default());
    let counter = CounterProxy::make(&client).await?;

    server.handle_control(b"stop").await?;
    let err = counter.increment().await.unwrap_err();
    assert_eq!(err, ClientError::Exception("endpoint stopped".into()));
    Ok(())
}
