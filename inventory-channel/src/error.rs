//! 通道层统一错误定义
//!
//! 聚焦信封序列化、生产者缓冲、组成员关系与位点提交等最小必要集合，
//! 便于在各实现层统一转换为 `ChannelError`。
//!
use thiserror::Error;

/// 统一错误类型（通道核心最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ChannelError {
    // --- 信封序列化 ---
    #[error("serialization error: {source}")]
    Serde {
        #[from]
        source: serde_json::Error,
    },

    // --- 生产者 ---
    #[error("producer already closed")]
    ProducerClosed,
    #[error("transport error: topic={topic}, reason={reason}")]
    Transport { topic: String, reason: String },

    // --- 组协调 ---
    #[error("rebalance in progress: group={group}, generation={generation}")]
    RebalanceInProgress { group: String, generation: u64 },
    #[error("unknown member: group={group}, member={member}")]
    UnknownMember { group: String, member: String },

    // --- 日志/分区 ---
    #[error("unknown partition: topic={topic}, partition={partition}")]
    UnknownPartition { topic: String, partition: u32 },
}

/// 统一 Result 类型别名
pub type ChannelResult<T> = Result<T, ChannelError>;
