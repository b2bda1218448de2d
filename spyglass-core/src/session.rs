//! Attach 会话：Unattached → Attached → (ConfigTransferred) → Detached。
//!
//! 会话内各步严格串行，每步依赖上一步的输出；无论加载或 bootstrap 是否
//! 失败，detach 在每条退出路径上恰好执行一次（"finally" 约束）。

use crate::codec;
use crate::configure::Configure;
use crate::error::Result;
use crate::locator::TargetLocator;
use crate::transport::{AttachTransport, TargetVm, PROP_VERSION};
use tracing::{debug, info, instrument, warn};

pub struct AttachSession<'a> {
    transport: &'a dyn AttachTransport,
}

impl<'a> AttachSession<'a> {
    pub fn new(transport: &'a dyn AttachTransport) -> Self {
        Self { transport }
    }

    /// 执行一次完整的 attach 序列。
    ///
    /// 成功返回表示目标内的诊断服务已绑定（或此前已初始化，幂等空操作）。
    #[instrument(skip(self, configure), fields(pid = configure.pid))]
    pub async fn run(&self, configure: &Configure) -> Result<()> {
        let mut vm = TargetLocator::new(self.transport)
            .locate(configure.pid)
            .await?;

        // 先收集结果再 detach，保证失败路径同样断开。
        let outcome = self.drive(vm.as_mut(), configure).await;
        if let Err(err) = vm.detach().await {
            warn!(%err, "detach failed");
        }
        outcome?;
        info!(pid = configure.pid, "diagnostic agent bootstrapped");
        Ok(())
    }

    async fn drive(&self, vm: &mut dyn TargetVm, configure: &Configure) -> Result<()> {
        self.check_version_skew(vm).await?;

        let options = codec::join_load_arg(&configure.core, &configure.to_map());
        debug!(agent = %configure.agent, "loading diagnostic agent");
        vm.load_agent(&configure.agent, &options).await
    }

    /// 版本不一致仅告警，不阻止 attach。
    async fn check_version_skew(&self, vm: &mut dyn TargetVm) -> Result<()> {
        let properties = vm.properties().await?;
        let ours = env!("CARGO_PKG_VERSION");
        match properties.get(PROP_VERSION) {
            Some(theirs) if theirs != ours => {
                warn!(
                    controller = ours,
                    target = %theirs,
                    "controller and target versions differ, attach may fail"
                );
                warn!("align controller and target to the same spyglass version");
            }
            Some(_) => {}
            None => debug!("target did not report a version"),
        }
        Ok(())
    }
}
