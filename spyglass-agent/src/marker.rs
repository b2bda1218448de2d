//! 进程级初始化标记：防止重复 attach 重复绑定诊断服务。
//!
//! 生命周期 uninitialized → initializing → ready，首次 bootstrap 成功时置
//! ready，之后不再销毁（随目标进程存亡）。探测接口永不失败：标记"不存在"
//! 或尚未就绪都按未初始化处理，不是错误。

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Uninitialized,
    Initializing,
    Ready,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const READY: u8 = 2;

#[derive(Debug, Default)]
pub struct InitMarker {
    state: AtomicU8,
}

impl InitMarker {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// 进程全局共享的标记实例。
    pub fn shared() -> Arc<InitMarker> {
        static SHARED: OnceLock<Arc<InitMarker>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(InitMarker::new())).clone()
    }

    /// 探测是否已初始化完成；任何情况下都不失败。
    pub fn probe(&self) -> bool {
        self.state.load(Ordering::Acquire) == READY
    }

    pub fn state(&self) -> MarkerState {
        match self.state.load(Ordering::Acquire) {
            READY => MarkerState::Ready,
            INITIALIZING => MarkerState::Initializing,
            _ => MarkerState::Uninitialized,
        }
    }

    /// 标记进入 initializing。并发的 bootstrap 会在单例工厂上收敛，
    /// 这里不做互斥。
    pub(crate) fn begin(&self) {
        let _ = self.state.compare_exchange(
            UNINITIALIZED,
            INITIALIZING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// 首次 bootstrap 成功：置 ready，之后不再回退。
    pub(crate) fn complete(&self) {
        self.state.store(READY, Ordering::Release);
    }

    /// bootstrap 失败：回退到未初始化，允许下一次 attach 重试。
    /// 已 ready 的标记不受影响。
    pub(crate) fn abandon(&self) {
        let _ = self.state.compare_exchange(
            INITIALIZING,
            UNINITIALIZED,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_starts_false() {
        let marker = InitMarker::new();
        assert!(!marker.probe());
        assert_eq!(marker.state(), MarkerState::Uninitialized);
    }

    #[test]
    fn complete_makes_probe_true() {
        let marker = InitMarker::new();
        marker.begin();
        assert_eq!(marker.state(), MarkerState::Initializing);
        marker.complete();
        assert!(marker.probe());
    }

    #[test]
    fn abandon_only_rolls_back_initializing() {
        let marker = InitMarker::new();
        marker.begin();
        marker.abandon();
        assert_eq!(marker.state(), MarkerState::Uninitialized);

        marker.begin();
        marker.complete();
        marker.abandon();
        // ready 不会被回退
        assert!(marker.probe());
    }

    #[test]
    fn shared_is_the_same_instance() {
        assert!(Arc::ptr_eq(&InitMarker::shared(), &InitMarker::shared()));
    }
}
