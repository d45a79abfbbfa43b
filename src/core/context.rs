//! # Execution Context Module / 执行上下文模块
//!
//! An immutable snapshot threaded through the tree. Each node's `prepare`
//! layers its own registry, store, collector and instance slots on top of
//! its parent's snapshot and returns a *new* context object, so closing a
//! child's resources never closes the parent's.
//!
//! 贯穿整棵树的不可变快照。每个节点的 `prepare` 会在其父级快照之上
//! 叠加自己的注册表、存储、收集器和实例槽位，并返回一个*新的*上下文对象，
//! 因此关闭子级的资源绝不会关闭父级的资源。

use anyhow::{Context as _, Result, bail};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use crate::core::collector::ThrowableCollector;
use crate::core::config::ConfigurationParameters;
use crate::core::descriptor::{Lifecycle, TestDescriptor, UniqueId};
use crate::core::extension::Extension;
use crate::core::registry::ExtensionRegistry;
use crate::core::store::NamespacedStore;
use crate::infra::output::OutputDirProvider;
use crate::reporting::listener::{ExecutionListener, ReportEntry};

/// A shared container instance, opaque to the engine.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// One container's instance slot: the factory that can create the instance
/// and the cell that caches it once created.
/// 一个容器的实例槽位：能创建实例的工厂，以及创建后缓存实例的单元。
#[derive(Clone)]
pub struct InstanceSlot {
    container: UniqueId,
    lifecycle: Lifecycle,
    factory: Arc<dyn Extension>,
    cell: Arc<OnceLock<Instance>>,
}

impl fmt::Debug for InstanceSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceSlot")
            .field("container", &self.container.to_string())
            .field("lifecycle", &self.lifecycle)
            .field("created", &self.cell.get().is_some())
            .finish_non_exhaustive()
    }
}

impl InstanceSlot {
    pub fn new(container: UniqueId, lifecycle: Lifecycle, factory: Arc<dyn Extension>) -> Self {
        Self {
            container,
            lifecycle,
            factory,
            cell: Arc::new(OnceLock::new()),
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// A copy of this slot with an empty cell but the same factory; used to
    /// shadow a per-unit slot for one leaf.
    /// 此槽位的副本，单元为空但工厂相同；用于为单个叶子遮蔽 per-unit 槽位。
    fn fresh(&self) -> Self {
        Self {
            container: self.container.clone(),
            lifecycle: self.lifecycle,
            factory: self.factory.clone(),
            cell: Arc::new(OnceLock::new()),
        }
    }

    fn get_or_create(&self, context: &ExecutionContext) -> Result<Instance> {
        if let Some(existing) = self.cell.get() {
            return Ok(existing.clone());
        }
        let factory = self
            .factory
            .as_instance_factory()
            .context("instance slot factory lost its instance-factory capability")?;
        let created = factory
            .create_instance(context)
            .with_context(|| format!("failed to create instance for {}", self.container))?;
        // Two concurrent creators race benignly: the first wins the cell.
        let _ = self.cell.set(created);
        Ok(self
            .cell
            .get()
            .expect("cell was just populated")
            .clone())
    }
}

/// Ordered outer→inner chain of container instance slots, letting a leaf
/// resolve "the instance of enclosing container K" for any K.
/// 由外到内的容器实例槽位链，使叶子能够解析“外层容器 K 的实例”。
#[derive(Debug, Clone, Default)]
pub struct InstanceChain {
    slots: Vec<InstanceSlot>,
}

impl InstanceChain {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extends the chain inward by one slot.
    pub fn extended(&self, slot: InstanceSlot) -> Self {
        let mut slots = self.slots.clone();
        slots.push(slot);
        Self { slots }
    }

    /// A leaf-scoped copy where every per-unit slot is replaced by a fresh,
    /// empty one, so each leaf lazily receives its own instance while
    /// per-container slots stay shared.
    /// 叶子作用域的副本：每个 per-unit 槽位被替换为全新的空槽位，
    /// 使每个叶子惰性获得自己的实例，而 per-container 槽位保持共享。
    pub fn shadowed_for_leaf(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|slot| match slot.lifecycle {
                    Lifecycle::PerUnit => slot.fresh(),
                    Lifecycle::PerContainer => slot.clone(),
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The lifecycle of the slot registered for `container`, if any.
    pub fn lifecycle_of(&self, container: &UniqueId) -> Option<Lifecycle> {
        self.slot_of(container).map(|slot| slot.lifecycle)
    }

    fn slot_of(&self, container: &UniqueId) -> Option<&InstanceSlot> {
        // Innermost shadowing wins.
        self.slots.iter().rev().find(|slot| &slot.container == container)
    }

    fn innermost(&self) -> Option<&InstanceSlot> {
        self.slots.last()
    }
}

/// The per-node bundle of registry + store + collector + instances +
/// listener + configuration.
/// 每节点的注册表 + 存储 + 收集器 + 实例 + 监听器 + 配置的集合。
pub struct ExecutionContext {
    descriptor: Arc<TestDescriptor>,
    registry: Arc<ExtensionRegistry>,
    store: Arc<NamespacedStore>,
    collector: Arc<ThrowableCollector>,
    instances: InstanceChain,
    listener: Arc<dyn ExecutionListener>,
    config: Arc<ConfigurationParameters>,
    output: Arc<OutputDirProvider>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("descriptor", &self.descriptor.id().to_string())
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// The root context owned by the run itself.
    pub fn root(
        descriptor: Arc<TestDescriptor>,
        listener: Arc<dyn ExecutionListener>,
        config: Arc<ConfigurationParameters>,
        output: Arc<OutputDirProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            registry: Arc::new(ExtensionRegistry::root()),
            store: Arc::new(NamespacedStore::root()),
            collector: Arc::new(ThrowableCollector::default()),
            instances: InstanceChain::empty(),
            listener,
            config,
            output,
        })
    }

    /// Derives the child snapshot a node returns from its `prepare`: a new
    /// registry scope, a child store, a fresh collector, and an optionally
    /// extended instance chain on top of this context.
    /// 派生节点从其 `prepare` 返回的子快照：新的注册表作用域、子存储、
    /// 全新的收集器，以及在此上下文之上可选延长的实例链。
    pub fn derive(
        self: &Arc<Self>,
        descriptor: Arc<TestDescriptor>,
        registry: Arc<ExtensionRegistry>,
        instances: InstanceChain,
    ) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            registry,
            store: Arc::new(NamespacedStore::child_of(self.store.clone())),
            collector: Arc::new(ThrowableCollector::default()),
            instances,
            listener: self.listener.clone(),
            config: self.config.clone(),
            output: self.output.clone(),
        })
    }

    pub fn descriptor(&self) -> &Arc<TestDescriptor> {
        &self.descriptor
    }

    pub fn registry(&self) -> &Arc<ExtensionRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<NamespacedStore> {
        &self.store
    }

    pub fn collector(&self) -> &Arc<ThrowableCollector> {
        &self.collector
    }

    pub fn instances(&self) -> &InstanceChain {
        &self.instances
    }

    pub fn listener(&self) -> &Arc<dyn ExecutionListener> {
        &self.listener
    }

    pub fn config(&self) -> &Arc<ConfigurationParameters> {
        &self.config
    }

    pub fn output(&self) -> &Arc<OutputDirProvider> {
        &self.output
    }

    /// Resolves (creating lazily if needed) the instance of the enclosing
    /// container with the given identifier.
    /// 解析（必要时惰性创建）具有给定标识符的外层容器的实例。
    pub fn instance_of(&self, container: &UniqueId) -> Result<Instance> {
        match self.instances.slot_of(container) {
            Some(slot) => slot.get_or_create(self),
            None => bail!("no instance-owning enclosing container with id {container}"),
        }
    }

    /// The innermost enclosing container instance, if any container in
    /// scope owns one.
    pub fn test_instance(&self) -> Result<Option<Instance>> {
        match self.instances.innermost() {
            Some(slot) => slot.get_or_create(self).map(Some),
            None => Ok(None),
        }
    }

    /// Publishes a structured key/value entry to the execution listener.
    /// 向执行监听器发布一个结构化键值条目。
    pub fn publish_entry(&self, values: BTreeMap<String, String>) {
        let entry = ReportEntry::now(values);
        self.listener
            .reporting_entry_published(&self.descriptor, &entry);
    }

    /// Publishes a named file/directory artifact into the engine-provided
    /// output directory, then notifies the listener.
    /// 将命名的文件/目录产物发布到引擎提供的输出目录，然后通知监听器。
    pub fn publish_file<F>(&self, name: &str, writer: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = self.output.publish(self.descriptor.id(), name, writer)?;
        self.listener.file_entry_published(&self.descriptor, &path);
        Ok(path)
    }
}
