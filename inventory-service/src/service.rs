//! 人员服务（PersonService）
//!
//! CRUD 写路径的编排：save 成功后（可选地）发布审计事件。
//! 事件发布是写路径的可配置特性：未配置发布器的实例即“无审计”
//! 变体，二者的存储行为完全一致。
//!
use crate::audit::AuditPublisher;
use crate::error::{ServiceError, ServiceResult};
use crate::person::Person;
use crate::store::PersonStore;
use std::sync::Arc;

/// 人员服务：仓储 + 可选的审计发布器
pub struct PersonService {
    store: Arc<dyn PersonStore>,
    publisher: Option<Arc<dyn AuditPublisher>>,
}

impl PersonService {
    /// 无审计变体：写路径不发布事件
    pub fn new(store: Arc<dyn PersonStore>) -> Self {
        Self {
            store,
            publisher: None,
        }
    }

    /// 审计变体：每次成功写入之后发布一条审计事件
    pub fn with_publisher(store: Arc<dyn PersonStore>, publisher: Arc<dyn AuditPublisher>) -> Self {
        Self {
            store,
            publisher: Some(publisher),
        }
    }

    pub async fn find_all(&self) -> ServiceResult<Vec<Person>> {
        self.store.find_all().await
    }

    pub async fn find_by_id(&self, id: i64) -> ServiceResult<Option<Person>> {
        self.store.find_by_id(id).await
    }

    /// 保存记录；存储提交之后发布审计事件。
    ///
    /// 发布器报出的序列化失败会让本次 save 对调用方表现为失败，
    /// 尽管存储写入已经生效——与参考行为一致的既有不一致。
    pub async fn save(&self, person: Person) -> ServiceResult<Person> {
        let saved = self.store.save(person).await?;

        if let Some(publisher) = &self.publisher {
            publisher.publish(&saved).await?;
        }

        Ok(saved)
    }

    /// 更新既有记录；标识不存在返回 `NotFound`，否则走完整写路径
    ///（含审计发布）
    pub async fn update(&self, id: i64, person: Person) -> ServiceResult<Person> {
        if self.store.find_by_id(id).await?.is_none() {
            return Err(ServiceError::NotFound { id });
        }

        self.save(Person {
            id: Some(id),
            name: person.name,
        })
        .await
    }

    pub async fn delete_by_id(&self, id: i64) -> ServiceResult<()> {
        self.store.delete_by_id(id).await
    }
}
