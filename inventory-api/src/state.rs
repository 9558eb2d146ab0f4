//! 路由共享状态
//!
use inventory_service::service::PersonService;
use std::sync::Arc;

/// 注入各处理器的应用状态
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PersonService>,
}

impl AppState {
    pub fn new(service: Arc<PersonService>) -> Self {
        Self { service }
    }
}
