//! # Lock Manager Module / 锁管理器模块
//!
//! Maps resource keys to shared async read/write locks and acquires them in
//! the caller-provided (sorted) order. Guards are held for the whole
//! `before` → `clean_up` window of a node, so sibling nodes with
//! conflicting declarations never overlap.
//!
//! 将资源键映射到共享的异步读写锁，并按调用者提供的（已排序的）顺序获取。
//! 守卫在节点的 `before` → `clean_up` 整个窗口内持有，
//! 因此声明冲突的兄弟节点绝不会重叠执行。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::core::resources::{ExclusiveResource, LockMode};

enum Guard {
    Read(#[allow(dead_code)] OwnedRwLockReadGuard<()>),
    Write(#[allow(dead_code)] OwnedRwLockWriteGuard<()>),
}

/// Holds the acquired guards; dropping it releases every lock.
/// 持有已获取的守卫；丢弃它会释放所有锁。
pub struct ResourceLockGuards {
    guards: Vec<Guard>,
}

impl ResourceLockGuards {
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }
}

/// Interns one `RwLock` per resource key for the lifetime of a run.
/// 在一次运行的生命周期内，为每个资源键保留一个 `RwLock`。
#[derive(Default)]
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Acquires all guards for `resources`, which the caller must already
    /// have collapsed per key and sorted into the global acquisition order.
    /// 为 `resources` 获取所有守卫；调用者必须已按键折叠并按全局获取顺序排序。
    pub async fn acquire(&self, resources: &[ExclusiveResource]) -> ResourceLockGuards {
        let mut guards = Vec::with_capacity(resources.len());
        for resource in resources {
            let lock = self.lock_for(&resource.key);
            let guard = match resource.mode {
                LockMode::Read => Guard::Read(lock.read_owned().await),
                LockMode::ReadWrite => Guard::Write(lock.write_owned().await),
            };
            guards.push(guard);
        }
        ResourceLockGuards { guards }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn readers_of_the_same_key_may_overlap() {
        let manager = LockManager::new();
        let first = manager.acquire(&[ExclusiveResource::read("shared")]).await;
        let second = manager.acquire(&[ExclusiveResource::read("shared")]).await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
    }

    #[tokio::test]
    async fn a_writer_excludes_other_holders() {
        let manager = Arc::new(LockManager::new());
        let writer = manager
            .acquire(&[ExclusiveResource::read_write("shared")])
            .await;

        let manager_clone = manager.clone();
        let blocked = tokio::spawn(async move {
            manager_clone
                .acquire(&[ExclusiveResource::read("shared")])
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        drop(writer);
        blocked.await.unwrap();
    }

    #[tokio::test]
    async fn disjoint_keys_do_not_contend() {
        let manager = LockManager::new();
        let left = manager
            .acquire(&[ExclusiveResource::read_write("left")])
            .await;
        let right = manager
            .acquire(&[ExclusiveResource::read_write("right")])
            .await;
        assert!(!left.is_empty());
        assert!(!right.is_empty());
    }
}
