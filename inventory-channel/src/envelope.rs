//! 审计事件信封（AuditEvent）
//!
//! 定义写入成功后派发到通道上的事件载荷：在发布时刻拷贝实体的标识与
//! 名称，构造后不可变；线上传输形态为 UTF-8 JSON 文本（camelCase 字段）。
//!
use crate::error::ChannelResult;
use serde::{Deserialize, Serialize};

/// 审计事件信封：一次成功写入的快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// 发布时刻实体的标识（构造后不可变）
    subject_id: i64,
    /// 发布时刻实体的名称
    subject_name: String,
}

impl AuditEvent {
    pub fn new(subject_id: i64, subject_name: impl Into<String>) -> Self {
        Self {
            subject_id,
            subject_name: subject_name.into(),
        }
    }

    pub fn subject_id(&self) -> i64 {
        self.subject_id
    }

    pub fn subject_name(&self) -> &str {
        &self.subject_name
    }

    /// 编码为线上传输的消息体
    pub fn to_body(&self) -> ChannelResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从消息体解码
    pub fn from_body(body: &str) -> ChannelResult<Self> {
        Ok(serde_json::from_str(body)?)
    }
}
