//! 配置跨进程编解码：每个值独立做百分号转义后拼接，整体再与核心模块路径
//! 以保留分隔符 `;` 拼为单个 load 参数。转义函数不会产出 `;`，因此解码侧
//! 一次 `splitn` 即可还原。

use crate::error::{AttachError, Result};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// 核心模块路径与配置串之间的保留分隔符。
pub const ARG_SEPARATOR: char = ';';

/// 将配置映射编码为单个传输安全的字符串：`k1=v1&k2=v2`，值做 URL 转义。
pub fn encode_config(map: &BTreeMap<String, String>) -> String {
    map.iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// `encode_config` 的精确逆变换。
pub fn decode_config(encoded: &str) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    if encoded.is_empty() {
        return Ok(map);
    }
    for pair in encoded.split('&') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| AttachError::Protocol(format!("malformed config pair: {pair}")))?;
        map.insert(key.to_string(), unescape(value)?.into_owned());
    }
    Ok(map)
}

/// 组合 load 参数：`<核心模块路径>;<编码后的配置串>`，两半各自转义。
pub fn join_load_arg(core_path: &str, config: &BTreeMap<String, String>) -> String {
    format!(
        "{}{}{}",
        urlencoding::encode(core_path),
        ARG_SEPARATOR,
        encode_config(config)
    )
}

/// 在目标进程内拆开 load 参数，还原核心模块路径与配置映射。
pub fn split_load_arg(arg: &str) -> Result<(String, BTreeMap<String, String>)> {
    let (core, encoded) = arg
        .split_once(ARG_SEPARATOR)
        .ok_or_else(|| AttachError::Protocol(format!("missing '{ARG_SEPARATOR}' in load argument")))?;
    Ok((unescape(core)?.into_owned(), decode_config(encoded)?))
}

fn unescape(value: &str) -> Result<Cow<'_, str>> {
    urlencoding::decode(value)
        .map_err(|e| AttachError::Protocol(format!("invalid percent escape in {value:?}: {e}")))
}
