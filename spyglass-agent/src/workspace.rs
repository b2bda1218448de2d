//! 临时工作区：为 agent 捆绑包准备一个全新的、无冲突的落地目录。
//!
//! 目录名 = 时间种子前缀 + 有界递增后缀；尝试次数有硬上限，命名空间
//! 枯竭按致命配置错误处理而不是无限重试。工作区在正常退出时不回收
//! （与上游设计一致），这是一个已知的磁盘泄漏点。

use crate::error::{AgentError, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// 后缀搜索的尝试上限。
const TEMP_DIR_ATTEMPTS: u32 = 10_000;

#[derive(Debug, Clone)]
pub struct TempWorkspace {
    base: PathBuf,
}

impl TempWorkspace {
    /// 平台临时根目录下的工作区。
    pub fn new() -> Self {
        Self {
            base: std::env::temp_dir(),
        }
    }

    pub fn at(base: impl AsRef<Path>) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// 创建一个唯一命名的新目录。
    pub fn create_dir(&self) -> Result<PathBuf> {
        let prefix = format!("spyglass-{}-", chrono::Utc::now().timestamp_millis());
        self.create_dir_with_prefix(&prefix)
    }

    fn create_dir_with_prefix(&self, prefix: &str) -> Result<PathBuf> {
        for counter in 0..TEMP_DIR_ATTEMPTS {
            let candidate = self.base.join(format!("{prefix}{counter}"));
            match fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AgentError::WorkspaceExhausted {
            prefix: prefix.to_string(),
            attempts: TEMP_DIR_ATTEMPTS,
        })
    }

    /// 把捆绑的 agent 归档（tar.gz 字节）完整解出到一个新工作区，
    /// 返回解出后的根目录。解压出错时不保留半成品语义：模块路径只在
    /// 全部解出后才算解析完成。
    pub fn materialize(&self, bundle: &[u8]) -> Result<PathBuf> {
        let dir = self.create_dir()?;
        let mut archive = Archive::new(GzDecoder::new(bundle));
        archive.unpack(&dir)?;
        debug!(dir = %dir.display(), "agent bundle extracted");
        Ok(dir)
    }
}

impl Default for TempWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
