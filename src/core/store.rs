//! # Hierarchical Store Module / 层级存储模块
//!
//! Namespaced key/value storage with parent fallback and deterministic
//! teardown. A lookup walks from the most specific store outward to the
//! root; a write always targets the most specific store; closing a store
//! releases only values placed directly in it, each exactly once, even
//! under concurrent close attempts.
//!
//! 带父级回退和确定性销毁的命名空间键值存储。
//! 查找从最具体的存储向外走到根；写入总是针对最具体的存储；
//! 关闭一个存储只会释放直接放入其中的值，每个值恰好释放一次，
//! 即使在并发关闭尝试下也是如此。

use anyhow::{Context, Result, bail};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::core::collector::ThrowableCollector;

/// An ordered, typed namespace isolating store entries from one another.
/// 有序、带类型的命名空间，使存储条目彼此隔离。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    parts: Vec<String>,
}

impl Namespace {
    /// Creates a namespace from its ordered parts.
    pub fn new<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    /// The namespace the engine itself stores values under.
    /// 引擎自身用于存储值的命名空间。
    pub fn engine() -> Self {
        Self::new(["hierarchy-runner", "engine"])
    }

    /// Derives a more specific namespace by appending one part.
    pub fn append(&self, part: impl Into<String>) -> Self {
        let mut parts = self.parts.clone();
        parts.push(part.into());
        Self { parts }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

/// A stored value that holds a resource needing deterministic release when
/// its scope closes.
/// 存储的值若持有需要在其作用域关闭时确定性释放的资源，应实现此 trait。
pub trait CloseableResource: Send + Sync {
    fn close(&self) -> Result<()>;
}

/// Opaque handle to a stored value.
pub type StoredValue = Arc<dyn Any + Send + Sync>;

struct StoreEntry {
    value: StoredValue,
    /// Present when the value must be released on close.
    /// 当该值必须在关闭时释放时存在。
    closer: Option<Arc<dyn CloseableResource>>,
}

struct StoreInner {
    closed: bool,
    entries: HashMap<(Namespace, String), StoreEntry>,
    /// Insertion order of keys; close releases in reverse of this order.
    /// 键的插入顺序；关闭时按此顺序的逆序释放。
    order: Vec<(Namespace, String)>,
}

/// One level of the hierarchical store, chained to an optional parent.
///
/// The store is the only state shared across context boundaries without
/// resource-lock protection, so every operation must be safe under
/// concurrent access from descendant scopes.
///
/// 层级存储的一层，链接到一个可选的父级。
///
/// 存储是唯一在没有资源锁保护的情况下跨上下文边界共享的状态，
/// 因此每个操作都必须在来自后代作用域的并发访问下保持安全。
pub struct NamespacedStore {
    parent: Option<Arc<NamespacedStore>>,
    inner: Mutex<StoreInner>,
}

impl fmt::Debug for NamespacedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock_inner();
        f.debug_struct("NamespacedStore")
            .field("closed", &inner.closed)
            .field("len", &inner.entries.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl Default for NamespacedStore {
    fn default() -> Self {
        Self::root()
    }
}

impl NamespacedStore {
    /// Creates the root store of a run.
    pub fn root() -> Self {
        Self {
            parent: None,
            inner: Mutex::new(StoreInner {
                closed: false,
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    /// Creates a child store layered on `parent`.
    /// 创建叠加在 `parent` 之上的子存储。
    pub fn child_of(parent: Arc<NamespacedStore>) -> Self {
        Self {
            parent: Some(parent),
            inner: Mutex::new(StoreInner {
                closed: false,
                entries: HashMap::new(),
                order: Vec::new(),
            }),
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Stores a plain value at this scope, shadowing any parent entry under
    /// the same namespace and key.
    /// 在此作用域存储一个普通值，遮蔽父级中相同命名空间和键下的条目。
    pub fn put(&self, namespace: Namespace, key: impl Into<String>, value: StoredValue) -> Result<()> {
        self.insert(namespace, key.into(), value, None)
    }

    /// Stores a value whose `close` must run exactly once when this scope
    /// is torn down.
    /// 存储一个值，当此作用域被销毁时，其 `close` 必须恰好运行一次。
    pub fn put_resource<T>(&self, namespace: Namespace, key: impl Into<String>, value: Arc<T>) -> Result<()>
    where
        T: CloseableResource + Any + Send + Sync,
    {
        let closer: Arc<dyn CloseableResource> = value.clone();
        self.insert(namespace, key.into(), value as StoredValue, Some(closer))
    }

    fn insert(
        &self,
        namespace: Namespace,
        key: String,
        value: StoredValue,
        closer: Option<Arc<dyn CloseableResource>>,
    ) -> Result<()> {
        let mut inner = self.lock_inner();
        if inner.closed {
            bail!("store is closed; cannot put \"{key}\" in namespace {namespace}");
        }
        let slot = (namespace, key);
        // Overwrites move the key to the back so the freshest value is the
        // first one released on close.
        if inner.entries.contains_key(&slot) {
            inner.order.retain(|existing| existing != &slot);
        }
        inner.order.push(slot.clone());
        inner.entries.insert(slot, StoreEntry { value, closer });
        Ok(())
    }

    /// Looks a value up, walking from this store outward to the root.
    /// 查找一个值，从此存储向外走到根。
    pub fn get(&self, namespace: &Namespace, key: &str) -> Result<Option<StoredValue>> {
        {
            let inner = self.lock_inner();
            if inner.closed {
                bail!("store is closed; cannot get \"{key}\" in namespace {namespace}");
            }
            let slot = (namespace.clone(), key.to_string());
            if let Some(entry) = inner.entries.get(&slot) {
                return Ok(Some(entry.value.clone()));
            }
        }
        match &self.parent {
            Some(parent) => parent.get(namespace, key),
            None => Ok(None),
        }
    }

    /// Typed lookup; `None` when absent or of a different type.
    pub fn get_typed<T: Any + Send + Sync>(
        &self,
        namespace: &Namespace,
        key: &str,
    ) -> Result<Option<Arc<T>>> {
        Ok(self
            .get(namespace, key)?
            .and_then(|value| value.downcast::<T>().ok()))
    }

    /// Returns the existing value for the slot, or computes, stores (at this
    /// scope), and returns a new one. The hierarchical lookup runs first, so
    /// an ancestor's value is reused rather than shadowed.
    ///
    /// 返回槽位的现有值，或者计算、（在此作用域）存储并返回一个新值。
    /// 层级查找先运行，因此祖先的值会被复用而不是被遮蔽。
    pub fn get_or_compute<F>(
        &self,
        namespace: Namespace,
        key: impl Into<String>,
        compute: F,
    ) -> Result<StoredValue>
    where
        F: FnOnce() -> Result<StoredValue>,
    {
        let key = key.into();
        if let Some(existing) = self.get(&namespace, &key)? {
            return Ok(existing);
        }
        let value = compute().with_context(|| {
            format!("failed to compute store value \"{key}\" in namespace {namespace}")
        })?;
        self.insert(namespace, key, value.clone(), None)?;
        Ok(value)
    }

    /// Removes a value placed directly in this store. Parent entries are
    /// never removed through a child.
    /// 移除直接放入此存储的值。父级条目绝不会通过子级移除。
    pub fn remove(&self, namespace: &Namespace, key: &str) -> Result<Option<StoredValue>> {
        let mut inner = self.lock_inner();
        if inner.closed {
            bail!("store is closed; cannot remove \"{key}\" in namespace {namespace}");
        }
        let slot = (namespace.clone(), key.to_string());
        inner.order.retain(|existing| existing != &slot);
        Ok(inner.entries.remove(&slot).map(|entry| entry.value))
    }

    /// Closes this store, releasing each directly-held closeable value
    /// exactly once, in reverse insertion order.
    ///
    /// The entries are drained atomically under the lock, so a concurrent
    /// second closer finds nothing left to release. Close failures are
    /// aggregated: the first becomes primary, the rest are suppressed.
    ///
    /// 关闭此存储，按插入顺序的逆序恰好释放一次每个直接持有的可关闭值。
    ///
    /// 条目在锁内被原子地抽干，因此并发的第二个关闭者不会找到任何可释放的内容。
    /// 关闭失败会被聚合：第一个成为主失败，其余被抑制。
    pub fn close(&self) -> Result<()> {
        let drained = {
            let mut inner = self.lock_inner();
            inner.closed = true;
            let mut entries = std::mem::take(&mut inner.entries);
            let order = std::mem::take(&mut inner.order);
            order
                .into_iter()
                .rev()
                .filter_map(|slot| entries.remove(&slot))
                .collect::<Vec<_>>()
        };

        let collector = ThrowableCollector::default();
        for entry in drained {
            if let Some(closer) = entry.closer {
                collector.execute(|| closer.close())?;
            }
        }
        collector.assert_empty()
    }

    /// `true` once this store has been closed.
    pub fn is_closed(&self) -> bool {
        self.lock_inner().closed
    }
}
