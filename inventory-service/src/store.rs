//! 人员存储（PersonStore）
//!
//! 暴露 save / find_by_id / find_all / delete_by_id 四个操作的
//! 仓储协议，以及一个基于 `DashMap` 的内存实现（测试与本地运行）。
//!
use crate::error::{ServiceError, ServiceResult};
use crate::person::Person;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, Ordering};

/// 人员仓储协议
#[async_trait]
pub trait PersonStore: Send + Sync {
    /// 保存记录；无标识的记录在此获得标识，返回写入后的状态
    async fn save(&self, person: Person) -> ServiceResult<Person>;

    async fn find_by_id(&self, id: i64) -> ServiceResult<Option<Person>>;

    async fn find_all(&self) -> ServiceResult<Vec<Person>>;

    /// 删除记录；标识不存在时返回 `NotFound`
    async fn delete_by_id(&self, id: i64) -> ServiceResult<()>;
}

/// 内存实现：`DashMap` 行表 + 原子自增标识序列
#[derive(Default)]
pub struct InMemoryPersonStore {
    rows: DashMap<i64, Person>,
    sequence: AtomicI64,
}

impl InMemoryPersonStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PersonStore for InMemoryPersonStore {
    async fn save(&self, mut person: Person) -> ServiceResult<Person> {
        let id = match person.id {
            Some(id) => id,
            None => self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        };
        person.id = Some(id);
        self.rows.insert(id, person.clone());
        Ok(person)
    }

    async fn find_by_id(&self, id: i64) -> ServiceResult<Option<Person>> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn find_all(&self) -> ServiceResult<Vec<Person>> {
        let mut all: Vec<Person> = self.rows.iter().map(|row| row.value().clone()).collect();
        all.sort_by_key(|p| p.id);
        Ok(all)
    }

    async fn delete_by_id(&self, id: i64) -> ServiceResult<()> {
        if self.rows.remove(&id).is_none() {
            return Err(ServiceError::NotFound { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_assigns_increasing_identities() {
        let store = InMemoryPersonStore::new();

        let a = store.save(Person::new("Ada")).await.unwrap();
        let b = store.save(Person::new("Grace")).await.unwrap();

        assert_eq!(a.id, Some(1));
        assert_eq!(b.id, Some(2));
    }

    #[tokio::test]
    async fn save_with_identity_updates_in_place() {
        let store = InMemoryPersonStore::new();
        let saved = store.save(Person::new("Ada")).await.unwrap();

        let updated = store
            .save(Person {
                id: saved.id,
                name: "Ada Lovelace".into(),
            })
            .await
            .unwrap();

        assert_eq!(updated.id, saved.id);
        assert_eq!(store.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_of_unknown_identity_is_not_found() {
        let store = InMemoryPersonStore::new();
        let err = store.delete_by_id(404).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotFound { id: 404 }));
    }
}
