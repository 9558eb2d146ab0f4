//! HTTP 协作者（inventory-api）
//!
//! 把 `inventory-service` 的 CRUD 操作暴露为 REST 端点，并在二进制
//! 入口完成整条管线的显式装配与生命周期管理（启动时连接生产者与
//! 订阅组 worker，关闭时先排空再停止）。
//!
pub mod error;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::AppState;
