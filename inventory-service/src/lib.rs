//! 人员库存服务（inventory-service）
//!
//! 通道核心之外的协作者落地：
//! - 实体（`person`）与仓储（`store`）：简单记录的 CRUD 持久化
//! - 写路径编排（`service`）：save 提交后（可选）发布审计事件
//! - 审计（`audit`）：发布器与监听器，连接 `inventory-channel`
//!
pub mod audit;
pub mod error;
pub mod person;
pub mod service;
pub mod store;

pub use audit::{AUDIT_TOPIC, AuditListener, AuditPublisher, ChannelAuditPublisher};
pub use error::{ServiceError, ServiceResult};
pub use person::Person;
pub use service::PersonService;
pub use store::{InMemoryPersonStore, PersonStore};
