//! 目标进程内的 attach listener：在约定的 PID 派生路径上监听控制器连接。
//!
//! 协议按行分隔（见 spyglass-core 的 transport 模块）：`properties` 返回
//! 运行时属性，`load` 在 bootstrap 真正完成后才应答——这就是控制器侧
//! 同步屏障的另一半。

use crate::bootstrap::SpyglassAgent;
use crate::error::{AgentError, Result};
use spyglass_core::split_load_arg;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

pub struct AttachListener {
    path: PathBuf,
    listener: UnixListener,
    template: SpyglassAgent,
    properties: BTreeMap<String, String>,
}

impl AttachListener {
    /// 在当前进程的约定路径上绑定。
    pub fn bind(template: SpyglassAgent) -> Result<Self> {
        Self::bind_at(
            spyglass_core::attach_socket_path(std::process::id()),
            template,
        )
    }

    /// 在指定路径上绑定（测试/非常规布局用）。
    pub fn bind_at(path: impl AsRef<Path>, template: SpyglassAgent) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // 清理上一个实例残留的 socket 文件
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "attach listener bound");

        let mut properties = BTreeMap::new();
        properties.insert(
            spyglass_core::PROP_VERSION.to_string(),
            env!("CARGO_PKG_VERSION").to_string(),
        );
        properties.insert("runtime.pid".to_string(), std::process::id().to_string());

        Ok(Self {
            path,
            listener,
            template,
            properties,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 附加额外的运行时属性（构建标识、应用名等）。
    pub fn add_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.properties.insert(key.into(), value.into());
    }

    /// 接受循环：每个连接一个任务。正常只在 accept 出错时返回。
    pub async fn serve(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let template = self.template.clone();
                    let properties = self.properties.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, template, properties).await {
                            warn!(%err, "attach connection error");
                        }
                    });
                }
                Err(err) => {
                    let _ = std::fs::remove_file(&self.path);
                    return Err(err.into());
                }
            }
        }
    }

    /// 后台运行 listener。
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.serve().await {
                warn!(%err, "attach listener stopped");
            }
        })
    }
}

async fn handle_connection(
    stream: UnixStream,
    template: SpyglassAgent,
    properties: BTreeMap<String, String>,
) -> Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let request = line.trim_end_matches(['\r', '\n']);
        let (verb, rest) = request.split_once(' ').unwrap_or((request, ""));
        match verb {
            "properties" => {
                let mut reply = String::new();
                for (key, value) in &properties {
                    reply.push_str(&format!("{key}={value}\n"));
                }
                reply.push('\n');
                writer.write_all(reply.as_bytes()).await?;
            }
            "load" => {
                let reply = handle_load(template.clone(), rest).await;
                writer.write_all(reply.as_bytes()).await?;
                writer.flush().await?;
            }
            "detach" | "" => return Ok(()),
            other => {
                debug!(verb = other, "unknown attach request");
                writer.write_all(b"2 unknown request\n").await?;
            }
        }
    }
}

/// 执行一次受闸门保护的 bootstrap，并把结果编码为单行应答。
/// 应答码：`0` 成功（含幂等空操作）、`1` 绑定失败、`2` 加载/资源错误。
async fn handle_load(template: SpyglassAgent, args: &str) -> String {
    let result = async {
        let (agent_path, arg) = args
            .split_once(' ')
            .ok_or_else(|| AgentError::Protocol(spyglass_core::AttachError::Protocol(
                "load expects <agent-path> <arg>".into(),
            )))?;
        let agent_path = urldecode(agent_path)?;
        let (core_path, config) = split_load_arg(arg)?;
        debug!(agent = %agent_path, core = %core_path, "load requested");

        let mut agent = template.with_core_module(&core_path).with_config(config);
        // bootstrap 是阻塞的（解包、工厂调用），放到阻塞线程池执行；
        // 应答要等它完成，这里就是跨进程同步屏障。
        tokio::task::spawn_blocking(move || agent.init())
            .await
            .map_err(|e| AgentError::Io(std::io::Error::other(e)))?
    }
    .await;

    match result {
        Ok(()) => "0\n".to_string(),
        Err(err) => {
            let code = match &err {
                AgentError::BindFailed(_) => 1,
                _ => 2,
            };
            warn!(%err, "bootstrap failed");
            format!("{code} {}\n", err.to_string().replace('\n', " "))
        }
    }
}

fn urldecode(value: &str) -> Result<String> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|e| {
            AgentError::Protocol(spyglass_core::AttachError::Protocol(format!(
                "invalid percent escape in {value:?}: {e}"
            )))
        })
}
