//! 目标进程内的引导：幂等闸门 → 解析核心模块 → 隔离解析入口 →
//! 单例工厂 → 绑定校验。
//!
//! 任何一步的错误都会被捕获并记录为可读错误信息；silent 模式下作为软失败
//! 返回（宿主应用继续运行），否则原样抛给调用方做进程级失败上报。

use crate::entry::InstrumentationHandle;
use crate::error::{AgentError, Result};
use crate::loader::IsolatedLoader;
use crate::marker::InitMarker;
use crate::workspace::TempWorkspace;
use spyglass_core::keys;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// 核心模块引导入口的符号名。
pub const BOOTSTRAP_ENTRY: &str = "spyglass.core.bootstrap";
/// home 目录下核心模块文件的约定名。
pub const CORE_MODULE: &str = "spyglass-core.mod";

/// 目标侧缺省值：控制器不补齐缺省键，由这里应用。
const DEFAULT_IP: &str = "127.0.0.1";
const DEFAULT_TELNET_PORT: &str = "3658";
const DEFAULT_HTTP_PORT: &str = "8563";
const DEFAULT_SESSION_TIMEOUT: &str = "1800";

/// 在目标进程内完成诊断服务安装的 agent。
///
/// 直接内嵌使用（silent 场景）：
/// ```no_run
/// let agent = spyglass_agent::SpyglassAgent::new()
///     .silent(true)
///     .with_home("/opt/diag")
///     .attach_self();
/// ```
#[derive(Debug, Clone)]
pub struct SpyglassAgent {
    config: BTreeMap<String, String>,
    home: Option<PathBuf>,
    core_module: Option<PathBuf>,
    silent_init: bool,
    instrumentation: InstrumentationHandle,
    bundle: Option<&'static [u8]>,
    marker: Arc<InitMarker>,
    loader: IsolatedLoader,
    workspace: TempWorkspace,
    error_message: Option<String>,
}

impl SpyglassAgent {
    pub fn new() -> Self {
        Self {
            config: BTreeMap::new(),
            home: None,
            core_module: None,
            silent_init: false,
            instrumentation: InstrumentationHandle::current(),
            bundle: None,
            marker: InitMarker::shared(),
            loader: IsolatedLoader::new(),
            workspace: TempWorkspace::new(),
            error_message: None,
        }
    }

    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    /// 预装好的诊断目录；设置后不再解包内嵌捆绑。
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// 显式指定核心模块文件，优先于 home 推导。
    pub fn with_core_module(mut self, path: impl Into<PathBuf>) -> Self {
        self.core_module = Some(path.into());
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent_init = silent;
        self
    }

    /// 内嵌的 agent 捆绑包（tar.gz 字节），没有 home 时解包使用。
    pub fn with_bundle(mut self, bundle: &'static [u8]) -> Self {
        self.bundle = Some(bundle);
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: InstrumentationHandle) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn with_marker(mut self, marker: Arc<InitMarker>) -> Self {
        self.marker = marker;
        self
    }

    pub fn with_loader(mut self, loader: IsolatedLoader) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_workspace(mut self, workspace: TempWorkspace) -> Self {
        self.workspace = workspace;
        self
    }

    /// 内嵌场景的一步式入口：构建后立即 init，返回 agent 以便之后查询
    /// `error_message`。
    pub fn attach_self(mut self) -> Result<Self> {
        self.init()?;
        Ok(self)
    }

    /// 引导诊断服务；重复调用是幂等的。
    #[instrument(skip(self))]
    pub fn init(&mut self) -> Result<()> {
        // 幂等闸门：探测永不失败，探测不到一律按未初始化继续。
        if self.marker.probe() {
            debug!("diagnostic server already initialized, attach is a no-op");
            return Ok(());
        }

        match self.install() {
            Ok(()) => Ok(()),
            Err(err) => {
                self.error_message = Some(err.to_string());
                self.marker.abandon();
                if self.silent_init {
                    warn!(%err, "bootstrap failed, error recorded (silent mode)");
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// 上一次失败的 bootstrap 留下的错误信息（silent 模式下可查询）。
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    fn install(&mut self) -> Result<()> {
        self.marker.begin();

        let core_module = self.resolve_core_module()?;
        let entry = self.loader.resolve(BOOTSTRAP_ENTRY)?;

        let config = self.config_with_defaults();
        let server = entry.get_or_create(self.instrumentation.clone(), &config);
        if !server.is_bound() {
            return Err(AgentError::BindFailed(format!(
                "diagnostic server port binding failed, check target-side logs next to {}",
                core_module.display()
            )));
        }

        self.marker.complete();
        debug!(core = %core_module.display(), "diagnostic server bootstrapped");
        Ok(())
    }

    /// 核心模块解析顺序：显式路径 → home 推导 → 解包内嵌捆绑。
    fn resolve_core_module(&mut self) -> Result<PathBuf> {
        if let Some(path) = &self.core_module {
            if path.is_file() {
                return Ok(path.clone());
            }
            return Err(AgentError::CoreModuleMissing(path.clone()));
        }

        let home = match &self.home {
            Some(home) if !home.as_os_str().is_empty() => home.clone(),
            _ => {
                // 没有内嵌捆绑是打包错误，和解压 I/O 错误分开报告。
                let bundle = self.bundle.ok_or(AgentError::BundleMissing)?;
                let home = self.workspace.materialize(bundle)?;
                self.home = Some(home.clone());
                home
            }
        };

        let path = home.join(CORE_MODULE);
        if path.is_file() {
            Ok(path)
        } else {
            Err(AgentError::CoreModuleMissing(path))
        }
    }

    fn config_with_defaults(&self) -> BTreeMap<String, String> {
        let mut config = self.config.clone();
        let mut ensure = |key: &str, value: &str| {
            config
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        };
        ensure(keys::TARGET_IP, DEFAULT_IP);
        ensure(keys::TELNET_PORT, DEFAULT_TELNET_PORT);
        ensure(keys::HTTP_PORT, DEFAULT_HTTP_PORT);
        ensure(keys::SESSION_TIMEOUT, DEFAULT_SESSION_TIMEOUT);
        config
    }
}

impl Default for SpyglassAgent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{BootstrapEntry, DiagnosticServer};
    use crate::loader::Scope;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingEntry {
        calls: AtomicUsize,
        bound: bool,
        seen_config: std::sync::Mutex<Option<BTreeMap<String, String>>>,
    }

    impl CountingEntry {
        fn new(bound: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                bound,
                seen_config: std::sync::Mutex::new(None),
            })
        }
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
            config: &BTreeMap<String, String>,
        ) -> Arc<dyn DiagnosticServer> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_config.lock().unwrap() = Some(config.clone());
            Arc::new(StubServer(self.bound))
        }
    }

    fn agent_with(entry: Arc<CountingEntry>, home: &TempDir) -> SpyglassAgent {
        fs::write(home.path().join(CORE_MODULE), b"core").unwrap();
        let scope = Arc::new(Scope::new("test"));
        scope.register(BOOTSTRAP_ENTRY, entry as Arc<dyn BootstrapEntry>);
        SpyglassAgent::new()
            .with_home(home.path())
            .with_marker(Arc::new(InitMarker::new()))
            .with_loader(IsolatedLoader::with_scopes(vec![scope]))
    }

    #[test]
    fn init_twice_calls_factory_once() {
        let home = TempDir::new().unwrap();
        let entry = CountingEntry::new(true);
        let mut agent = agent_with(entry.clone(), &home);

        agent.init().unwrap();
        agent.init().unwrap();
        assert_eq!(entry.calls.load(Ordering::SeqCst), 1);
        assert!(agent.marker.probe());
    }

    #[test]
    fn already_initialized_marker_short_circuits() {
        let home = TempDir::new().unwrap();
        let entry = CountingEntry::new(true);
        let mut agent = agent_with(entry.clone(), &home);
        agent.marker.begin();
        agent.marker.complete();

        agent.init().unwrap();
        assert_eq!(entry.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn bind_failure_is_hard_error_and_marker_rolls_back() {
        let home = TempDir::new().unwrap();
        let entry = CountingEntry::new(false);
        let mut agent = agent_with(entry, &home);

        let err = agent.init().unwrap_err();
        assert!(matches!(err, AgentError::BindFailed(_)));
        assert!(!agent.marker.probe());
    }

    #[test]
    fn silent_mode_swallows_and_records() {
        let home = TempDir::new().unwrap();
        let entry = CountingEntry::new(false);
        let mut agent = agent_with(entry, &home).silent(true);

        agent.init().unwrap();
        assert!(agent
            .error_message()
            .unwrap()
            .contains("port binding failed"));
    }

    #[test]
    fn missing_core_module_is_resource_error() {
        let home = TempDir::new().unwrap();
        let scope = Arc::new(Scope::new("test"));
        scope.register(
            BOOTSTRAP_ENTRY,
            CountingEntry::new(true) as Arc<dyn BootstrapEntry>,
        );
        let mut agent = SpyglassAgent::new()
            .with_home(home.path())
            .with_marker(Arc::new(InitMarker::new()))
            .with_loader(IsolatedLoader::with_scopes(vec![scope]));

        let err = agent.init().unwrap_err();
        assert!(matches!(err, AgentError::CoreModuleMissing(_)));
    }

    #[test]
    fn no_home_and_no_bundle_is_packaging_error() {
        let mut agent = SpyglassAgent::new()
            .with_marker(Arc::new(InitMarker::new()))
            .with_loader(IsolatedLoader::with_scopes(vec![]));
        let err = agent.init().unwrap_err();
        assert!(matches!(err, AgentError::BundleMissing));
    }

    #[test]
    fn defaults_fill_absent_keys_only() {
        let home = TempDir::new().unwrap();
        let entry = CountingEntry::new(true);
        let mut config = BTreeMap::new();
        config.insert(keys::TELNET_PORT.to_string(), "9999".to_string());
        let mut agent = agent_with(entry.clone(), &home).with_config(config);

        agent.init().unwrap();
        let seen = entry.seen_config.lock().unwrap().clone().unwrap();
        assert_eq!(seen.get(keys::TELNET_PORT).map(String::as_str), Some("9999"));
        assert_eq!(seen.get(keys::TARGET_IP).map(String::as_str), Some(DEFAULT_IP));
        assert_eq!(
            seen.get(keys::SESSION_TIMEOUT).map(String::as_str),
            Some(DEFAULT_SESSION_TIMEOUT)
        );
    }
}
