//! 写触发审计事件通道（inventory-channel）
//!
//! 提供“写成功 → 发布事件 → 异步消费”管线的核心构件：
//! - 信封（`envelope`）：发布时刻的实体快照，UTF-8 JSON 消息体
//! - 进程内代理（`broker`）：分区日志、订阅组协调、会话超时驱逐
//! - 生产者（`producer`）：出站缓冲、凑批与 linger、尽力而为重试
//! - 订阅组 worker（`consumer`）：显式轮询循环与处理器分发
//! - 位点跟踪（`offsets`）：投递即推进、定时自动提交
//! - 处理契约（`handler`）：可长时间阻塞、要求幂等的消费接口
//!
//! 投递语义为至少一次；默认自动提交策略保留了“提交先于处理完成”
//! 的丢失窗口（详见 `consumer` 模块文档），与参考行为一致。
//!
//! 典型用法：
//! 1. 构造 `Broker` 并以 `Producer::connect` 取得生产者；
//! 2. 写路径成功后将信封 `send` 到固定主题；
//! 3. 以 `GroupWorker::new(...).start()` 注册处理器并启动消费；
//! 4. 关闭时先 `Producer::close` 排空缓冲，再 `WorkerHandle::shutdown`。
//!
pub mod broker;
pub mod consumer;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod offsets;
pub mod producer;

pub use broker::{Broker, Delivery, Membership, RecordSink};
pub use consumer::{ConsumerConfig, GroupWorker, WorkerHandle};
pub use envelope::AuditEvent;
pub use error::{ChannelError, ChannelResult};
pub use handler::MessageHandler;
pub use offsets::OffsetTracker;
pub use producer::{Producer, ProducerConfig};
