use std::time::Duration;

/// 被替换客户端的最长等待时间。
pub const MAX_TEARDOWN_GRACE: Duration = Duration::from_secs(60);

/// 由配置超时推导关闭等待时间：`min(timeout, 60s)`。
pub fn teardown_grace(timeout: Duration) -> Duration {
    timeout.min(MAX_TEARDOWN_GRACE)
}

/// 某个名称当前生效的客户端。
///
/// 记录只会被整体替换，不会原地修改；`grace_period` 取自构建时的配置超时，
/// 决定该客户端被替换后还能继续服务在途请求多久。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientRecord<C> {
    client: C,
    target: String,
    grace_period: Duration,
}

impl<C> ClientRecord<C> {
    pub fn new(client: C, target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            target: target.into(),
            grace_period: teardown_grace(timeout),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn into_parts(self) -> (C, String, Duration) {
        (self.client, self.target, self.grace_period)
    }
}
