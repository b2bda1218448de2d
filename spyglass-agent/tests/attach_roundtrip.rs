//! End-to-end attach over a real Unix socket: controller-side session against
//! the in-target listener, including the idempotent second attach.

#![cfg(unix)]

use spyglass_agent::{
    AttachListener, BootstrapEntry, DiagnosticServer, InitMarker, InstrumentationHandle,
    IsolatedLoader, Scope, SpyglassAgent, BOOTSTRAP_ENTRY, CORE_MODULE,
};
use spyglass_core::{
    AttachError, AttachSession, AttachTransport, Configure, SocketTransport, TargetVm,
    PROP_VERSION,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct CountingEntry {
    calls: AtomicUsize,
    bound: bool,
}

struct StubServer(bool);

impl DiagnosticServer for StubServer {
    fn is_bound(&self) -> bool {
        self.0
    }
}

impl BootstrapEntry for CountingEntry {
    fn get_or_create(
        &self,
        _instrumentation: InstrumentationHandle,
        _config: &BTreeMap<String, String>,
    ) -> Arc<dyn DiagnosticServer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Arc::new(StubServer(self.bound))
    }
}

struct Fixture {
    entry: Arc<CountingEntry>,
    marker: Arc<InitMarker>,
    configure: Configure,
    transport: SocketTransport,
    _socket_dir: TempDir,
    _home: TempDir,
}

fn fixture(bound: bool) -> Fixture {
    let socket_dir = TempDir::new().unwrap();
    let home = TempDir::new().unwrap();
    std::fs::write(home.path().join(CORE_MODULE), b"core").unwrap();

    let entry = Arc::new(CountingEntry {
        calls: AtomicUsize::new(0),
        bound,
    });
    let scope = Arc::new(Scope::new("test"));
    scope.register(BOOTSTRAP_ENTRY, entry.clone() as Arc<dyn BootstrapEntry>);

    let marker = Arc::new(InitMarker::new());
    let template = SpyglassAgent::new()
        .with_marker(marker.clone())
        .with_loader(IsolatedLoader::with_scopes(vec![scope]));

    let pid = std::process::id();
    let socket_path = socket_dir.path().join(format!(".spyglass_pid{pid}"));
    let mut listener = AttachListener::bind_at(&socket_path, template).unwrap();
    listener.add_property("app.name", "fixture-app");
    listener.spawn();

    let configure = Configure::new(
        pid,
        home.path().join(CORE_MODULE).to_string_lossy().into_owned(),
        "/opt/diag/agent.mod",
    );

    Fixture {
        entry,
        marker,
        configure,
        transport: SocketTransport::with_socket_dir(socket_dir.path()),
        _socket_dir: socket_dir,
        _home: home,
    }
}

#[tokio::test]
async fn attach_bootstraps_and_second_attach_is_noop() {
    let fx = fixture(true);
    let session = AttachSession::new(&fx.transport);

    session.run(&fx.configure).await.unwrap();
    assert!(fx.marker.probe());
    assert_eq!(fx.entry.calls.load(Ordering::SeqCst), 1);

    // 已初始化的目标：再次 attach 成功且不再触发工厂
    session.run(&fx.configure).await.unwrap();
    assert_eq!(fx.entry.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn added_properties_appear_in_properties_reply() {
    let fx = fixture(true);
    let mut vm = fx.transport.attach(fx.configure.pid).await.unwrap();
    let properties = vm.properties().await.unwrap();
    assert_eq!(
        properties.get("app.name").map(String::as_str),
        Some("fixture-app")
    );
    assert!(properties.contains_key(PROP_VERSION));
    vm.detach().await.unwrap();
}

#[tokio::test]
async fn bind_failure_reaches_controller_as_bind_error() {
    let fx = fixture(false);
    let err = AttachSession::new(&fx.transport)
        .run(&fx.configure)
        .await
        .unwrap_err();
    assert!(matches!(err, AttachError::BindFailed(_)));
    assert!(!fx.marker.probe());
}

#[tokio::test]
async fn absent_target_is_discovery_error() {
    let socket_dir = TempDir::new().unwrap();
    let transport = SocketTransport::with_socket_dir(socket_dir.path());
    // 枚举里不存在、socket 也不存在的 PID
    let configure = Configure::new(u32::MAX - 1, "/opt/diag/core.mod", "/opt/diag/agent.mod");
    let err = AttachSession::new(&transport)
        .run(&configure)
        .await
        .unwrap_err();
    assert!(matches!(err, AttachError::TargetNotFound(_)));
}
