//! 隔离加载：显式的入口解析策略，子作用域优先、平台作用域兜底。
//!
//! 诊断核心模块把自己的引导入口注册进 core 作用域；宿主或运行时提供的
//! 平台级入口注册进 platform 作用域。解析顺序固定 child-first，核心模块
//! 的符号不会被宿主应用同名注册遮蔽，反之亦然——一个控制器二进制可以
//! 诊断依赖版本互不兼容的多种目标应用。

use crate::entry::BootstrapEntry;
use crate::error::{AgentError, Result};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::debug;

/// 一个命名的入口注册表。
#[derive(Debug)]
pub struct Scope {
    label: String,
    entries: RwLock<HashMap<String, Arc<dyn BootstrapEntry>>>,
}

impl Scope {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 注册入口；同名覆盖。
    pub fn register(&self, symbol: impl Into<String>, entry: Arc<dyn BootstrapEntry>) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(symbol.into(), entry);
    }

    pub fn lookup(&self, symbol: &str) -> Option<Arc<dyn BootstrapEntry>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.get(symbol).cloned()
    }
}

/// 诊断核心模块自己的作用域（child）。
pub fn core_scope() -> Arc<Scope> {
    static SCOPE: OnceLock<Arc<Scope>> = OnceLock::new();
    SCOPE
        .get_or_init(|| Arc::new(Scope::new("diagnostic-core")))
        .clone()
}

/// 平台级兜底作用域（parent）。
pub fn platform_scope() -> Arc<Scope> {
    static SCOPE: OnceLock<Arc<Scope>> = OnceLock::new();
    SCOPE.get_or_init(|| Arc::new(Scope::new("platform"))).clone()
}

/// 按固定顺序在多个作用域中解析引导入口。
#[derive(Debug, Clone)]
pub struct IsolatedLoader {
    scopes: Vec<Arc<Scope>>,
}

impl IsolatedLoader {
    /// 默认解析顺序：diagnostic-core 优先，platform 兜底。
    pub fn new() -> Self {
        Self {
            scopes: vec![core_scope(), platform_scope()],
        }
    }

    pub fn with_scopes(scopes: Vec<Arc<Scope>>) -> Self {
        Self { scopes }
    }

    pub fn resolve(&self, symbol: &str) -> Result<Arc<dyn BootstrapEntry>> {
        for scope in &self.scopes {
            if let Some(entry) = scope.lookup(symbol) {
                debug!(symbol, scope = scope.label(), "bootstrap entry resolved");
                return Ok(entry);
            }
        }
        Err(AgentError::EntryUnresolved(symbol.to_string()))
    }
}

impl Default for IsolatedLoader {
    fn default() -> Self {
        Self::new()
    }
}
