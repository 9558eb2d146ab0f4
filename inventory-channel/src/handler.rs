//! 消息处理器（MessageHandler）
//!
//! 定义消费一条投递单元的处理契约：由订阅组 worker 在轮询循环中
//! 显式调用（无反射式注册）。处理器可以无限期阻塞（模拟缓慢的
//! 下游调用）；投递语义为至少一次，处理逻辑须幂等。
//!
use crate::broker::Delivery;
use async_trait::async_trait;

/// 消息处理器：处理一条投递单元
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// 处理器名称（用于失败日志与审计）
    fn name(&self) -> &str;

    /// 处理一条投递；失败由 worker 记日志后继续，不会终止轮询
    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()>;
}
