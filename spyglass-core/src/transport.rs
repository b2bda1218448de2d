//! Attach 边界：控制器与目标进程之间的外调契约。
//!
//! 按行分隔的控制面协议，目标进程内嵌的 attach listener 负责应答：
//! - `properties` → 若干 `key=value` 行，空行结束
//! - `load <agent-path> <arg>` → 单行应答：`0` 成功；`1 <msg>` 绑定失败；
//!   `2 <msg>` agent 加载/资源/解析失败。两个参数均做 URL 转义。
//!
//! 应答在目标进程内 bootstrap 完成之后才写出，因此 `load` 调用对控制器
//! 而言是一次同步屏障（设计上无超时：目标挂起则控制器跟随挂起）。

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;

/// 在 `properties` 应答中携带目标运行时版本的键。
pub const PROP_VERSION: &str = "spyglass.version";

/// Snapshot of one enumerated process.
#[derive(Debug, Clone)]
pub struct ProcessDescriptor {
    pub pid: u32,
    /// Human-readable descriptor (process name).
    pub name: String,
}

/// 枚举可见进程并向目标建立 attach 连接。
#[async_trait]
pub trait AttachTransport: Send + Sync {
    /// 枚举当前可见的进程；尽力而为，某些平台/权限下可能为空或失败。
    async fn enumerate(&self) -> Result<Vec<ProcessDescriptor>>;

    /// 直接按进程 ID 建立连接。
    async fn attach(&self, pid: u32) -> Result<Box<dyn TargetVm>>;
}

/// 一条已建立的目标进程控制通道。
#[async_trait]
pub trait TargetVm: Send + std::fmt::Debug {
    /// 读取目标运行时属性（版本/构建标识等）。
    async fn properties(&mut self) -> Result<BTreeMap<String, String>>;

    /// 将诊断 agent 模块装入目标并传递组合参数；仅在目标内 bootstrap
    /// 完成（尝试过绑定）后返回。
    async fn load_agent(&mut self, agent_path: &str, options: &str) -> Result<()>;

    /// 断开控制通道。每个会话恰好调用一次。
    async fn detach(&mut self) -> Result<()>;
}

#[cfg(unix)]
pub use socket::{attach_socket_path, SocketTransport};

#[cfg(unix)]
mod socket {
    use super::{AttachTransport, ProcessDescriptor, TargetVm};
    use crate::error::{AttachError, Result};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::{Path, PathBuf};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{unix::OwnedWriteHalf, UnixStream};

    /// 目标进程 attach socket 的约定路径：`<tmp>/.spyglass_pid<pid>`。
    pub fn attach_socket_path(pid: u32) -> PathBuf {
        std::env::temp_dir().join(format!(".spyglass_pid{pid}"))
    }

    /// 基于 Unix domain socket 的默认传输。
    #[derive(Debug, Default)]
    pub struct SocketTransport {
        socket_dir: Option<PathBuf>,
    }

    impl SocketTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// 覆盖 socket 目录（测试用：listener 绑定在临时目录下）。
        pub fn with_socket_dir(dir: impl AsRef<Path>) -> Self {
            Self {
                socket_dir: Some(dir.as_ref().to_path_buf()),
            }
        }

        fn socket_path(&self, pid: u32) -> PathBuf {
            match &self.socket_dir {
                Some(dir) => dir.join(format!(".spyglass_pid{pid}")),
                None => attach_socket_path(pid),
            }
        }
    }

    #[async_trait]
    impl AttachTransport for SocketTransport {
        async fn enumerate(&self) -> Result<Vec<ProcessDescriptor>> {
            let mut sys = sysinfo::System::new();
            sys.refresh_processes();
            Ok(sys
                .processes()
                .iter()
                .map(|(pid, process)| ProcessDescriptor {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                })
                .collect())
        }

        async fn attach(&self, pid: u32) -> Result<Box<dyn TargetVm>> {
            let path = self.socket_path(pid);
            let stream = UnixStream::connect(&path)
                .await
                .map_err(|e| AttachError::AttachRefused(pid, format!("{}: {e}", path.display())))?;
            let (read_half, write_half) = stream.into_split();
            Ok(Box::new(SocketVm {
                reader: BufReader::new(read_half),
                writer: Some(write_half),
            }))
        }
    }

    #[derive(Debug)]
    struct SocketVm {
        reader: BufReader<tokio::net::unix::OwnedReadHalf>,
        writer: Option<OwnedWriteHalf>,
    }

    impl SocketVm {
        fn writer(&mut self) -> Result<&mut OwnedWriteHalf> {
            self.writer
                .as_mut()
                .ok_or_else(|| AttachError::Protocol("channel already detached".into()))
        }

        async fn read_line(&mut self) -> Result<String> {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line).await?;
            if n == 0 {
                return Err(AttachError::Protocol("target closed attach channel".into()));
            }
            Ok(line.trim_end_matches(['\r', '\n']).to_string())
        }
    }

    #[async_trait]
    impl TargetVm for SocketVm {
        async fn properties(&mut self) -> Result<BTreeMap<String, String>> {
            self.writer()?.write_all(b"properties\n").await?;
            let mut map = BTreeMap::new();
            loop {
                let line = self.read_line().await?;
                if line.is_empty() {
                    break;
                }
                if let Some((key, value)) = line.split_once('=') {
                    map.insert(key.to_string(), value.to_string());
                }
            }
            Ok(map)
        }

        async fn load_agent(&mut self, agent_path: &str, options: &str) -> Result<()> {
            let request = format!("load {} {}\n", urlencoding::encode(agent_path), options);
            self.writer()?.write_all(request.as_bytes()).await?;
            // 同步屏障：目标完成 bootstrap 后才会应答。
            let reply = self.read_line().await?;
            let (code, message) = match reply.split_once(' ') {
                Some((code, message)) => (code, message.to_string()),
                None => (reply.as_str(), String::new()),
            };
            match code {
                "0" => Ok(()),
                "1" => Err(AttachError::BindFailed(message)),
                "2" => Err(AttachError::AgentLoadFailed(message)),
                other => Err(AttachError::Protocol(format!(
                    "unexpected load reply: {other} {message}"
                ))),
            }
        }

        async fn detach(&mut self) -> Result<()> {
            if let Some(mut writer) = self.writer.take() {
                let _ = writer.write_all(b"detach\n").await;
                writer.shutdown().await?;
            }
            Ok(())
        }
    }
}
