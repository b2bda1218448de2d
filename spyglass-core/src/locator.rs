//! 目标进程定位：先枚举精确匹配，枚举不可见时回退直接 attach。

use crate::error::{AttachError, Result};
use crate::transport::{AttachTransport, ProcessDescriptor, TargetVm};
use tracing::{debug, info};

pub struct TargetLocator<'a> {
    transport: &'a dyn AttachTransport,
}

impl<'a> TargetLocator<'a> {
    pub fn new(transport: &'a dyn AttachTransport) -> Self {
        Self { transport }
    }

    /// 定位并连接目标进程。
    ///
    /// 匹配规则：对十进制规范表示做全等比较，不做前缀/通配匹配。枚举是
    /// 尽力而为的（部分平台或权限上下文看不到进程列表），未命中时仍尝试
    /// 直接按 ID attach；两者都失败才算发现错误。
    pub async fn locate(&self, pid: u32) -> Result<Box<dyn TargetVm>> {
        let descriptor = self.find_descriptor(pid).await;
        match &descriptor {
            Some(d) => info!(pid, name = %d.name, "target process found"),
            None => debug!(pid, "target not in process enumeration, trying direct attach"),
        }

        match self.transport.attach(pid).await {
            Ok(vm) => Ok(vm),
            Err(err) if descriptor.is_none() => {
                debug!(pid, %err, "direct attach failed");
                Err(AttachError::TargetNotFound(pid))
            }
            Err(err) => Err(err),
        }
    }

    async fn find_descriptor(&self, pid: u32) -> Option<ProcessDescriptor> {
        let wanted = pid.to_string();
        match self.transport.enumerate().await {
            Ok(list) => list.into_iter().find(|d| d.pid.to_string() == wanted),
            Err(err) => {
                debug!(%err, "process enumeration failed");
                None
            }
        }
    }
}
