use std::{error::Error, fmt, marker::PhantomData};

/// 客户端的构造器与关闭器。
///
/// # 教案式说明
/// - **意图（Why）**：缓存只负责“何时建、何时关”，具体如何连接 Redis、MySQL 或 Kafka 由实现方决定；
/// - **契约（What）**：
///   - `Client` 需可廉价克隆（通常内部为 `Arc` 或连接池句柄），缓存会把同一实例的克隆交给多个调用方；
///   - `build` 在调用方线程上同步执行，失败原样返回给调用方；
///   - `close` 对每个被替换下来的客户端最多调用一次，在后台任务中执行，错误只记录不上抛；
/// - **风险（Trade-offs）**：`close` 若阻塞较久，会占用运行时的工作线程，实现方应保持关闭动作轻量。
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Clone + Send + Sync + 'static;
    /// 透传给 `build` 的构造参数。
    type Options;
    type Error: Error + Send + Sync + 'static;

    fn build(&self, name: &str, options: &Self::Options) -> Result<Self::Client, Self::Error>;

    fn close(&self, client: Self::Client) -> Result<(), Self::Error>;
}

/// 由两个闭包组成的 [`ClientFactory`]。
pub struct FnClientFactory<Cl, O, E, B, C> {
    build: B,
    close: C,
    _marker: PhantomData<fn(&O) -> (Cl, E)>,
}

impl<Cl, O, E, B, C> FnClientFactory<Cl, O, E, B, C>
where
    B: Fn(&str, &O) -> Result<Cl, E>,
    C: Fn(Cl) -> Result<(), E>,
{
    pub fn new(build: B, close: C) -> Self {
        Self {
            build,
            close,
            _marker: PhantomData,
        }
    }
}

impl<Cl, O, E, B, C> fmt::Debug for FnClientFactory<Cl, O, E, B, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnClientFactory").finish_non_exhaustive()
    }
}

impl<Cl, O, E, B, C> ClientFactory for FnClientFactory<Cl, O, E, B, C>
where
    Cl: Clone + Send + Sync + 'static,
    O: 'static,
    E: Error + Send + Sync + 'static,
    B: Fn(&str, &O) -> Result<Cl, E> + Send + Sync + 'static,
    C: Fn(Cl) -> Result<(), E> + Send + Sync + 'static,
{
    type Client = Cl;
    type Options = O;
    type Error = E;

    fn build(&self, name: &str, options: &O) -> Result<Cl, E> {
        (self.build)(name, options)
    }

    fn close(&self, client: Cl) -> Result<(), E> {
        (self.close)(client)
    }
}
