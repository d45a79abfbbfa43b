//! # Exclusive Resource Module / 独占资源模块
//!
//! Computes the set of named locks (with access mode) a node requires
//! before it may run. The result is a conservative superset over the node
//! and its lock-aware ancestors, collapsed per key and sorted by name into
//! a deterministic global acquisition order that prevents deadlock between
//! sibling subtrees competing for overlapping resources.
//!
//! 计算节点在运行前需要的命名锁集合（含访问模式）。
//! 结果是覆盖该节点及其锁感知祖先的保守超集，按键折叠并按名称排序，
//! 形成确定性的全局获取顺序，以防止竞争重叠资源的兄弟子树之间死锁。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::core::descriptor::TestDescriptor;

/// Access mode of a named lock.
/// 命名锁的访问模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared access; readers of the same key may overlap.
    Read,
    /// Exclusive access; conflicts with every other holder of the key.
    ReadWrite,
}

/// A named lock with its access mode. Resources are associative by key.
/// 带访问模式的命名锁。资源按键关联。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExclusiveResource {
    pub key: String,
    pub mode: LockMode,
}

impl ExclusiveResource {
    pub fn read(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mode: LockMode::Read,
        }
    }

    pub fn read_write(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            mode: LockMode::ReadWrite,
        }
    }
}

/// Who a declared resource applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockTarget {
    /// The declaring node itself.
    SelfOnly,
    /// Every descendant of the declaring node.
    /// 声明节点的每个后代。
    Children,
}

/// A resource declaration attached to a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDeclaration {
    pub resource: ExclusiveResource,
    pub target: LockTarget,
}

impl ResourceDeclaration {
    pub fn for_self(resource: ExclusiveResource) -> Self {
        Self {
            resource,
            target: LockTarget::SelfOnly,
        }
    }

    pub fn for_children(resource: ExclusiveResource) -> Self {
        Self {
            resource,
            target: LockTarget::Children,
        }
    }
}

/// A node is lock-aware when it declares resources or carries a dynamic
/// lock resolver.
/// 当节点声明了资源或携带动态锁解析器时，它是锁感知的。
fn is_lock_aware(descriptor: &TestDescriptor) -> bool {
    !descriptor.resource_declarations().is_empty()
        || descriptor
            .declared_extensions()
            .iter()
            .any(|declaration| declaration.extension.as_lock_provider().is_some())
}

/// Applies every lock-provider extension attached to `descriptor` to the
/// descriptor's own data.
fn dynamically_resolved(descriptor: &TestDescriptor) -> Vec<ExclusiveResource> {
    descriptor
        .declared_extensions()
        .iter()
        .filter_map(|declaration| {
            declaration
                .extension
                .as_lock_provider()
                .map(|provider| provider.resolve(descriptor))
        })
        .flatten()
        .collect()
}

/// The effective resource set of `node`: its own statically declared
/// self-targeted resources, each lock-aware ancestor's dynamically resolved
/// resources, the outermost lock-aware ancestor's children-targeted
/// resources, and the node's own dynamically resolved resources.
///
/// The union is collapsed per key — `ReadWrite` wins over `Read` — and
/// sorted by key, yielding the acquisition order.
///
/// `node` 的有效资源集合：其自身静态声明的自指资源、
/// 每个锁感知祖先动态解析的资源、最外层锁感知祖先面向子节点的资源，
/// 以及该节点自身动态解析的资源。
///
/// 并集按键折叠——`ReadWrite` 优先于 `Read`——并按键排序，得到获取顺序。
pub fn exclusive_resources_for(node: &Arc<TestDescriptor>) -> Vec<ExclusiveResource> {
    let mut union: Vec<ExclusiveResource> = Vec::new();

    for declaration in node.resource_declarations() {
        if declaration.target == LockTarget::SelfOnly {
            union.push(declaration.resource.clone());
        }
    }
    union.extend(dynamically_resolved(node));

    let lock_aware_ancestors: Vec<Arc<TestDescriptor>> = node
        .ancestors()
        .into_iter()
        .filter(|ancestor| is_lock_aware(ancestor))
        .collect();

    for ancestor in &lock_aware_ancestors {
        union.extend(dynamically_resolved(ancestor));
    }
    // ancestors() walks nearest-first, so the outermost lock-aware ancestor
    // is the last element.
    if let Some(outermost) = lock_aware_ancestors.last() {
        for declaration in outermost.resource_declarations() {
            if declaration.target == LockTarget::Children {
                union.push(declaration.resource.clone());
            }
        }
    }

    collapse_and_sort(union)
}

/// The resources `node` actually acquires before running, or empty when an
/// ancestor acquires on this subtree's behalf. Acquisition happens at the
/// outermost lock-aware node of a path, over the union of the whole
/// subtree's effective sets, so a node and its descendant never contend for
/// the same key.
///
/// `node` 在运行前实际获取的资源；当某个祖先代表此子树获取时为空。
/// 获取发生在路径上最外层的锁感知节点，覆盖整个子树有效集合的并集，
/// 因此节点与其后代绝不会竞争同一个键。
pub fn lock_acquisition_for(node: &Arc<TestDescriptor>) -> Vec<ExclusiveResource> {
    if !is_lock_aware(node)
        || node
            .ancestors()
            .iter()
            .any(|ancestor| is_lock_aware(ancestor))
    {
        return Vec::new();
    }
    let mut union = exclusive_resources_for(node);
    for descendant in node.descendants() {
        union.extend(exclusive_resources_for(&descendant));
    }
    collapse_and_sort(union)
}

/// Collapses modes per key (ReadWrite wins) and sorts by key. Collapsing is
/// required: acquiring the same key in both modes from one task would
/// deadlock against itself.
/// 按键折叠模式（ReadWrite 优先）并按键排序。折叠是必需的：
/// 同一任务以两种模式获取同一个键会与自身死锁。
pub fn collapse_and_sort(resources: Vec<ExclusiveResource>) -> Vec<ExclusiveResource> {
    let mut per_key: BTreeMap<String, LockMode> = BTreeMap::new();
    for resource in resources {
        per_key
            .entry(resource.key)
            .and_modify(|mode| {
                if resource.mode == LockMode::ReadWrite {
                    *mode = LockMode::ReadWrite;
                }
            })
            .or_insert(resource.mode);
    }
    per_key
        .into_iter()
        .map(|(key, mode)| ExclusiveResource { key, mode })
        .collect()
}
