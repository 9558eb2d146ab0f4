//! 审计事件的发布与消费
//!
//! 发布侧：`AuditPublisher` 在存储写入提交之后被调用，把写入后的
//! 标识与名称装入 [`AuditEvent`] 并交给生产者。信封序列化失败向
//! 写调用方传播；传输失败完全由通道客户端消化，不影响写调用。
//!
//! 消费侧：`AuditListener` 实现 [`MessageHandler`]，解码信封、记录
//! 日志，并可配置一段延迟模拟缓慢的下游调用（幂等：重复投递只会
//! 重复打日志）。
//!
use crate::error::{ServiceError, ServiceResult};
use crate::person::Person;
use async_trait::async_trait;
use inventory_channel::broker::Delivery;
use inventory_channel::envelope::AuditEvent;
use inventory_channel::handler::MessageHandler;
use inventory_channel::producer::Producer;
use std::sync::Arc;
use std::time::Duration;

/// 审计事件的固定主题
pub const AUDIT_TOPIC: &str = "myTopic";

/// 发布协议：写路径成功之后派发审计事件
#[async_trait]
pub trait AuditPublisher: Send + Sync {
    async fn publish(&self, person: &Person) -> ServiceResult<()>;
}

/// 基于通道生产者的发布实现
pub struct ChannelAuditPublisher {
    producer: Arc<Producer>,
}

impl ChannelAuditPublisher {
    pub fn new(producer: Arc<Producer>) -> Self {
        Self { producer }
    }
}

#[async_trait]
impl AuditPublisher for ChannelAuditPublisher {
    async fn publish(&self, person: &Person) -> ServiceResult<()> {
        let id = person.id.ok_or_else(|| ServiceError::InvalidEntity {
            reason: "audit publish requires a persisted identity".to_string(),
        })?;

        let envelope = AuditEvent::new(id, &person.name);
        // 序列化失败向写调用方传播；send 在记录入缓冲后即返回
        let body = envelope.to_body()?;
        self.producer.send(AUDIT_TOPIC, None, body).await?;

        Ok(())
    }
}

/// 审计事件监听器：记录收到的事件，可模拟缓慢下游
pub struct AuditListener {
    slow_for: Option<Duration>,
}

impl AuditListener {
    pub fn new() -> Self {
        Self { slow_for: None }
    }

    /// 每条消息处理后阻塞 `delay`，模拟调用缓慢的下游 API
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            slow_for: Some(delay),
        }
    }
}

impl Default for AuditListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageHandler for AuditListener {
    fn name(&self) -> &str {
        "audit-listener"
    }

    async fn handle(&self, delivery: &Delivery) -> anyhow::Result<()> {
        let envelope = AuditEvent::from_body(&delivery.body)?;
        tracing::info!(
            subject_id = envelope.subject_id(),
            subject_name = envelope.subject_name(),
            partition = delivery.partition,
            offset = delivery.offset,
            "audit event received"
        );

        // 这里接真正的下游调用；先以延迟代替
        if let Some(delay) = self.slow_for {
            tokio::time::sleep(delay).await;
        }

        Ok(())
    }
}
