//! 人员实体（Person）
//!
//! 核心管线之外的协作者：带标识的简单记录。标识在创建时由存储层
//! 赋予；通道核心只在写成功后观察它。
//!
use serde::{Deserialize, Serialize};

/// 人员记录：`id` 创建时分配，`name` 可由更新操作修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: Option<i64>,
    pub name: String,
}

impl Person {
    /// 尚未持久化的新记录
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}
