use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::collections::BTreeMap;

/// 配置键的固定词汇表：编码与解码两侧共用，不接受未知键。
pub mod keys {
    pub const PID: &str = "pid";
    pub const CORE: &str = "core";
    pub const AGENT: &str = "agent";
    pub const TARGET_IP: &str = "target_ip";
    pub const TELNET_PORT: &str = "telnet_port";
    pub const HTTP_PORT: &str = "http_port";
    pub const SESSION_TIMEOUT: &str = "session_timeout";
    pub const USERNAME: &str = "username";
    pub const PASSWORD: &str = "password";
    pub const TUNNEL_SERVER: &str = "tunnel_server";
    pub const AGENT_ID: &str = "agent_id";
    pub const APP_NAME: &str = "app_name";
    pub const STAT_URL: &str = "stat_url";
}

/// 一次 attach 的完整配置：由外层 CLI/API 校验后构建，此后不可变。
///
/// 缺省键不在控制器侧补齐，由目标进程内的 bootstrap 应用默认值。
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configure {
    /// 目标进程 ID
    pub pid: u32,
    /// 诊断核心模块路径
    pub core: String,
    /// 注入目标的 agent 模块路径
    pub agent: String,
    #[serde(default)]
    pub target_ip: Option<String>,
    #[serde(default)]
    pub telnet_port: Option<u16>,
    #[serde(default)]
    pub http_port: Option<u16>,
    /// 会话超时（秒）
    #[serde(default)]
    pub session_timeout: Option<u64>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tunnel_server: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub app_name: Option<String>,
    #[serde(default)]
    pub stat_url: Option<String>,
}

impl Configure {
    pub fn new(pid: u32, core: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            pid,
            core: core.into(),
            agent: agent.into(),
            target_ip: None,
            telnet_port: None,
            http_port: None,
            session_timeout: None,
            username: None,
            password: None,
            tunnel_server: None,
            agent_id: None,
            app_name: None,
            stat_url: None,
        }
    }

    /// 从 JSON 反序列化一份完整配置（CLI 的 `--config` 文件格式）。
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 序列化为 JSON；未设置的键不输出。
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// 展开为有序键值映射，仅包含已设置的键。
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert(keys::PID.to_string(), self.pid.to_string());
        map.insert(keys::CORE.to_string(), self.core.clone());
        map.insert(keys::AGENT.to_string(), self.agent.clone());
        let mut put = |key: &str, value: Option<String>| {
            if let Some(v) = value {
                map.insert(key.to_string(), v);
            }
        };
        put(keys::TARGET_IP, self.target_ip.clone());
        put(keys::TELNET_PORT, self.telnet_port.map(|p| p.to_string()));
        put(keys::HTTP_PORT, self.http_port.map(|p| p.to_string()));
        put(
            keys::SESSION_TIMEOUT,
            self.session_timeout.map(|t| t.to_string()),
        );
        put(keys::USERNAME, self.username.clone());
        put(keys::PASSWORD, self.password.clone());
        put(keys::TUNNEL_SERVER, self.tunnel_server.clone());
        put(keys::AGENT_ID, self.agent_id.clone());
        put(keys::APP_NAME, self.app_name.clone());
        put(keys::STAT_URL, self.stat_url.clone());
        map
    }
}
