use clap::Parser;
use spyglass_core::{AttachError, AttachSession, Configure};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Attach the spyglass diagnostic agent to a running process.
#[derive(Parser)]
#[command(name = "spyglass", author, version, about = "Spyglass attach controller")]
struct Cli {
    /// JSON 配置文件，提供完整的 attach 配置；可选键可被命令行覆盖
    #[arg(long, value_name = "FILE", conflicts_with_all = ["pid", "core", "agent"])]
    config: Option<PathBuf>,

    /// 目标进程 ID
    #[arg(long, required_unless_present = "config")]
    pid: Option<u32>,

    /// 诊断核心模块路径
    #[arg(long, required_unless_present = "config")]
    core: Option<String>,

    /// agent 模块路径
    #[arg(long, required_unless_present = "config")]
    agent: Option<String>,

    /// 诊断服务监听地址
    #[arg(long)]
    target_ip: Option<String>,

    /// telnet 端口
    #[arg(long)]
    telnet_port: Option<u16>,

    /// HTTP 端口
    #[arg(long)]
    http_port: Option<u16>,

    /// 会话超时（秒）
    #[arg(long)]
    session_timeout: Option<u64>,

    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// 隧道服务器地址
    #[arg(long)]
    tunnel_server: Option<String>,

    /// agent 标识
    #[arg(long)]
    agent_id: Option<String>,

    /// 目标应用名
    #[arg(long)]
    app_name: Option<String>,

    /// 统计上报地址
    #[arg(long)]
    stat_url: Option<String>,
}

impl Cli {
    fn into_configure(self) -> spyglass_core::Result<Configure> {
        let mut cfg = if let Some(path) = &self.config {
            Configure::from_json(&std::fs::read_to_string(path)?)?
        } else {
            match (self.pid, self.core, self.agent) {
                (Some(pid), Some(core), Some(agent)) => Configure::new(pid, core, agent),
                // clap 的 required_unless_present 保证了必填键存在
                _ => {
                    return Err(AttachError::Protocol(
                        "--pid, --core and --agent are required without --config".into(),
                    ))
                }
            }
        };
        cfg.target_ip = self.target_ip.or(cfg.target_ip);
        cfg.telnet_port = self.telnet_port.or(cfg.telnet_port);
        cfg.http_port = self.http_port.or(cfg.http_port);
        cfg.session_timeout = self.session_timeout.or(cfg.session_timeout);
        cfg.username = self.username.or(cfg.username);
        cfg.password = self.password.or(cfg.password);
        cfg.tunnel_server = self.tunnel_server.or(cfg.tunnel_server);
        cfg.agent_id = self.agent_id.or(cfg.agent_id);
        cfg.app_name = self.app_name.or(cfg.app_name);
        cfg.stat_url = self.stat_url.or(cfg.stat_url);
        Ok(cfg)
    }
}

#[cfg(unix)]
#[tokio::main]
async fn main() {
    // 加载 .env 文件（如果存在），忽略错误
    let _ = dotenvy::dotenv();
    init_tracing();
    let configure = match Cli::parse().into_configure() {
        Ok(configure) => configure,
        Err(err) => {
            report(&err);
            std::process::exit(1);
        }
    };

    let transport = spyglass_core::SocketTransport::new();
    if let Err(err) = AttachSession::new(&transport).run(&configure).await {
        report(&err);
        std::process::exit(1);
    }
}

#[cfg(not(unix))]
fn main() {
    eprintln!("the spyglass socket transport is only available on unix platforms");
    std::process::exit(1);
}

/// 失败信息按阶段给出，不同原因对应不同的处置方式。
#[cfg(unix)]
fn report(err: &AttachError) {
    match err {
        AttachError::TargetNotFound(pid) => {
            tracing::error!("discovery failed: no running process with pid {pid}");
        }
        AttachError::AttachRefused(pid, detail) => {
            tracing::error!("attach to {pid} refused ({detail}); check permissions and that the target embeds the spyglass agent");
        }
        AttachError::AgentLoadFailed(detail) => {
            tracing::error!("agent load failed in target: {detail}");
        }
        AttachError::BindFailed(detail) => {
            tracing::error!("bootstrap failed: {detail}");
        }
        AttachError::Serde(detail) => {
            tracing::error!("invalid attach configuration: {detail}");
        }
        other => tracing::error!("attach failed: {other}"),
    }
}

#[cfg(unix)]
fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false);
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();
}
