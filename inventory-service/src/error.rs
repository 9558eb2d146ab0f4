//! 服务层统一错误定义
//!
use inventory_channel::error::ChannelError;
use thiserror::Error;

/// 统一错误类型（服务层最小必要集）
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("person not found: id={id}")]
    NotFound { id: i64 },
    #[error("invalid entity: {reason}")]
    InvalidEntity { reason: String },
    /// 发布审计事件失败：存储写入已提交，但本次 save 仍对调用方
    /// 表现为失败（存储与发布之间没有分布式事务，既有不一致，文档化保留）
    #[error("audit publish error: {source}")]
    Publish {
        #[from]
        source: ChannelError,
    },
}

/// 统一 Result 类型别名
pub type ServiceResult<T> = Result<T, ServiceError>;
