//! # Descriptor Tree Module / 描述符树模块
//!
//! This module defines the nodes of the execution tree: stable hierarchical
//! identifiers, the descriptor itself (container / test / template /
//! invocation behavior), and the ownership discipline — a parent owns its
//! children through `Arc`s while a child holds only a non-owning `Weak`
//! back-reference, so the tree is acyclic in ownership terms.
//!
//! 此模块定义执行树的节点：稳定的层级标识符、描述符本身
//! （容器/测试/模板/调用行为），以及所有权纪律——
//! 父节点通过 `Arc` 拥有其子节点，而子节点只持有非拥有的 `Weak` 反向引用，
//! 因此树在所有权意义上是无环的。

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::core::context::ExecutionContext;
use crate::core::extension::Extension;
use crate::core::registry::RegistrationSource;
use crate::core::resources::ResourceDeclaration;
use crate::core::template::InvocationContext;

/// One typed segment of a hierarchical identifier.
/// 层级标识符中一个带类型的段。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub segment_type: String,
    pub value: String,
}

/// A stable identifier: a hierarchical path of typed segments, unique within
/// the run. A child's identifier is always its parent's identifier extended
/// by exactly one segment.
///
/// 稳定标识符：由带类型的段组成的层级路径，在一次运行中唯一。
/// 子节点的标识符总是其父节点的标识符恰好延长一个段。
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UniqueId {
    segments: Vec<Segment>,
}

impl UniqueId {
    /// Creates a single-segment root identifier.
    pub fn root(segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            segments: vec![Segment {
                segment_type: segment_type.into(),
                value: value.into(),
            }],
        }
    }

    /// Extends this identifier by one segment.
    pub fn child(&self, segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(Segment {
            segment_type: segment_type.into(),
            value: value.into(),
        });
        Self { segments }
    }

    /// The identifier with the last segment removed, if any remains.
    pub fn parent(&self) -> Option<Self> {
        if self.segments.len() <= 1 {
            return None;
        }
        Some(Self {
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn last(&self) -> &Segment {
        self.segments
            .last()
            .expect("a UniqueId always has at least one segment")
    }

    /// `true` when `prefix` is an ancestor-or-self path of this identifier.
    pub fn starts_with(&self, prefix: &UniqueId) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "[{}:{}]", segment.segment_type, segment.value)?;
        }
        Ok(())
    }
}

/// Accepts or rejects identifiers during template expansion, used for
/// partial re-execution of a previously filtered subset.
/// 在模板展开期间接受或拒绝标识符，用于先前筛选子集的部分重跑。
#[derive(Debug, Clone, Default)]
pub struct UniqueIdFilter {
    accepted: Option<Vec<UniqueId>>,
}

impl UniqueIdFilter {
    /// A filter accepting every identifier.
    pub fn accept_all() -> Self {
        Self { accepted: None }
    }

    /// A filter accepting exactly the given identifiers, their descendants,
    /// and their ancestors (so the enclosing path stays executable).
    /// 恰好接受给定标识符、其后代以及其祖先的过滤器（使外层路径保持可执行）。
    pub fn of<I: IntoIterator<Item = UniqueId>>(ids: I) -> Self {
        Self {
            accepted: Some(ids.into_iter().collect()),
        }
    }

    pub fn accepts(&self, id: &UniqueId) -> bool {
        match &self.accepted {
            None => true,
            Some(accepted) => accepted
                .iter()
                .any(|candidate| id.starts_with(candidate) || candidate.starts_with(id)),
        }
    }
}

/// Whether a node is a grouping container or a leaf test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Container,
    Test,
}

/// Where the unit came from, for reporting purposes.
/// 单元的来源位置，用于报告。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestSource {
    File { path: PathBuf, line: Option<u32> },
    Module { name: String },
}

/// A node's declared execution mode.
/// 节点声明的执行模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Run on the same task as the parent, in declaration order.
    SameThread,
    /// Eligible for dispatch to the worker pool.
    Concurrent,
}

impl ExecutionMode {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "same_thread" => Ok(ExecutionMode::SameThread),
            "concurrent" => Ok(ExecutionMode::Concurrent),
            other => bail!("unknown execution mode: \"{other}\""),
        }
    }
}

/// Shared-instance lifecycle policy of an instance-owning container.
/// 拥有实例的容器的共享实例生命周期策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    /// A fresh instance per leaf, created lazily.
    PerUnit,
    /// One instance shared by all leaves under the container, created
    /// eagerly in `before` when a before-all callback requires it.
    PerContainer,
}

impl Lifecycle {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "per_unit" => Ok(Lifecycle::PerUnit),
            "per_container" => Ok(Lifecycle::PerContainer),
            other => bail!("unknown lifecycle: \"{other}\""),
        }
    }
}

/// An extension attached to a node, remembering how it was declared.
#[derive(Clone)]
pub struct ExtensionDeclaration {
    pub extension: Arc<dyn Extension>,
    pub source: RegistrationSource,
}

impl fmt::Debug for ExtensionDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionDeclaration")
            .field("id", &self.extension.id())
            .field("source", &self.source)
            .finish()
    }
}

/// The unit of work carried by a leaf node.
pub type TestFn = dyn Fn(&ExecutionContext) -> Result<()> + Send + Sync;

/// Builds one invocation child of a template node from a provider-supplied
/// invocation context and its 1-based index.
/// 从提供者提供的调用上下文及其从 1 开始的索引构建模板节点的一个调用子节点。
pub type InvocationFactory =
    dyn Fn(UniqueId, &dyn InvocationContext, usize) -> Arc<TestDescriptor> + Send + Sync;

/// The closed set of node behaviors sharing the five-operation contract.
/// 共享五操作契约的封闭节点行为集合。
pub enum NodeBehavior {
    /// Plain grouping node, optionally owning a shared instance lifecycle.
    Container { lifecycle: Option<Lifecycle> },
    /// Leaf unit of work.
    Test { body: Arc<TestFn> },
    /// Children generated at run time from invocation-context providers.
    /// Already-produced children are cached by index so a pruned-and-regrown
    /// template reuses them instead of re-querying the providers.
    /// 子节点在运行时由调用上下文提供者生成。
    /// 已生成的子节点按索引缓存，使被剪枝后重新生长的模板复用它们而不是重新查询提供者。
    Template {
        segment_type: String,
        factory: Arc<InvocationFactory>,
        expanded: Mutex<BTreeMap<usize, Arc<TestDescriptor>>>,
    },
    /// One materialized template invocation; behaves as a container.
    Invocation { index: usize },
}

impl fmt::Debug for NodeBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeBehavior::Container { lifecycle } => {
                f.debug_struct("Container").field("lifecycle", lifecycle).finish()
            }
            NodeBehavior::Test { .. } => f.debug_struct("Test").finish_non_exhaustive(),
            NodeBehavior::Template { segment_type, .. } => f
                .debug_struct("Template")
                .field("segment_type", segment_type)
                .finish_non_exhaustive(),
            NodeBehavior::Invocation { index } => {
                f.debug_struct("Invocation").field("index", index).finish()
            }
        }
    }
}

/// One node of the execution tree.
/// 执行树的一个节点。
pub struct TestDescriptor {
    id: UniqueId,
    display_name: String,
    kind: NodeKind,
    source: Option<TestSource>,
    tags: BTreeSet<String>,
    parent: RwLock<Weak<TestDescriptor>>,
    children: RwLock<Vec<Arc<TestDescriptor>>>,
    pub(crate) behavior: NodeBehavior,
    execution_mode: Option<ExecutionMode>,
    default_child_mode: Option<ExecutionMode>,
    resources: Vec<ResourceDeclaration>,
    extensions: RwLock<Vec<ExtensionDeclaration>>,
}

impl fmt::Debug for TestDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestDescriptor")
            .field("id", &self.id.to_string())
            .field("display_name", &self.display_name)
            .field("kind", &self.kind)
            .field("behavior", &self.behavior)
            .finish_non_exhaustive()
    }
}

impl TestDescriptor {
    pub fn id(&self) -> &UniqueId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn source(&self) -> Option<&TestSource> {
        self.source.as_ref()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn execution_mode(&self) -> Option<ExecutionMode> {
        self.execution_mode
    }

    pub fn default_child_mode(&self) -> Option<ExecutionMode> {
        self.default_child_mode
    }

    pub fn resource_declarations(&self) -> &[ResourceDeclaration] {
        &self.resources
    }

    /// The node's attached extensions in declaration order.
    pub fn declared_extensions(&self) -> Vec<ExtensionDeclaration> {
        self.extensions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Attaches an extension contributed at run time (e.g. by a template
    /// invocation context).
    /// 附加在运行时贡献的扩展（例如由模板调用上下文提供）。
    pub fn add_extension(&self, declaration: ExtensionDeclaration) {
        self.extensions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(declaration);
    }

    pub fn parent(&self) -> Option<Arc<TestDescriptor>> {
        self.parent
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .upgrade()
    }

    pub fn children(&self) -> Vec<Arc<TestDescriptor>> {
        self.children
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn has_child(&self, id: &UniqueId) -> bool {
        self.children
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .any(|child| child.id() == id)
    }

    /// Attaches `child` under `self`, enforcing the identifier-extension
    /// invariant.
    /// 将 `child` 挂到 `self` 之下，并强制执行标识符延长不变量。
    pub fn add_child(self: &Arc<Self>, child: Arc<TestDescriptor>) -> Result<()> {
        match child.id.parent() {
            Some(parent_id) if parent_id == self.id => {}
            _ => bail!(
                "child id {} does not extend parent id {} by one segment",
                child.id,
                self.id
            ),
        }
        *child
            .parent
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::downgrade(self);
        self.children
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(child);
        Ok(())
    }

    /// Detaches this node from its parent (pruning).
    pub fn remove_from_hierarchy(self: &Arc<Self>) {
        if let Some(parent) = self.parent() {
            parent
                .children
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .retain(|child| child.id != self.id);
        }
        *self
            .parent
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Weak::new();
    }

    /// All descendants in pre-order.
    pub fn descendants(self: &Arc<Self>) -> Vec<Arc<TestDescriptor>> {
        let mut collected = Vec::new();
        for child in self.children() {
            collected.push(child.clone());
            collected.extend(child.descendants());
        }
        collected
    }

    /// Copies this node (and its whole subtree) under a new identifier,
    /// sharing behavior payloads but owning fresh parent/child links. Used
    /// to stamp a template's prototype subtree out once per invocation.
    /// 在新标识符下复制此节点（及其整个子树），共享行为载荷但拥有全新的
    /// 父/子链接。用于为每次调用冲压一份模板的原型子树。
    pub fn reparented(
        self: &Arc<Self>,
        new_id: UniqueId,
        display_name: impl Into<String>,
    ) -> Result<Arc<TestDescriptor>> {
        let behavior = match &self.behavior {
            NodeBehavior::Container { lifecycle } => NodeBehavior::Container {
                lifecycle: *lifecycle,
            },
            NodeBehavior::Test { body } => NodeBehavior::Test { body: body.clone() },
            NodeBehavior::Template {
                segment_type,
                factory,
                ..
            } => NodeBehavior::Template {
                segment_type: segment_type.clone(),
                factory: factory.clone(),
                expanded: Mutex::new(BTreeMap::new()),
            },
            NodeBehavior::Invocation { index } => NodeBehavior::Invocation { index: *index },
        };
        let copy = Arc::new(TestDescriptor {
            id: new_id,
            display_name: display_name.into(),
            kind: self.kind,
            source: self.source.clone(),
            tags: self.tags.clone(),
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            behavior,
            execution_mode: self.execution_mode,
            default_child_mode: self.default_child_mode,
            resources: self.resources.clone(),
            extensions: RwLock::new(self.declared_extensions()),
        });
        for child in self.children() {
            let child_segment = child.id.last().clone();
            let child_copy = child.reparented(
                copy.id.child(child_segment.segment_type, child_segment.value),
                child.display_name.clone(),
            )?;
            copy.add_child(child_copy)?;
        }
        Ok(copy)
    }

    /// Ancestors from the nearest outward.
    /// 从最近者向外的祖先序列。
    pub fn ancestors(&self) -> Vec<Arc<TestDescriptor>> {
        let mut collected = Vec::new();
        let mut current = self.parent();
        while let Some(ancestor) = current {
            current = ancestor.parent();
            collected.push(ancestor);
        }
        collected
    }
}

/// Fluent construction of descriptors, mirroring how discovery would attach
/// metadata before handing the tree to the engine.
/// 描述符的流式构建，模拟发现阶段在把树交给引擎之前附加元数据的方式。
pub struct TestDescriptorBuilder {
    id: UniqueId,
    display_name: String,
    kind: NodeKind,
    source: Option<TestSource>,
    tags: BTreeSet<String>,
    behavior: NodeBehavior,
    execution_mode: Option<ExecutionMode>,
    default_child_mode: Option<ExecutionMode>,
    resources: Vec<ResourceDeclaration>,
    extensions: Vec<ExtensionDeclaration>,
}

impl TestDescriptorBuilder {
    fn new(id: UniqueId, display_name: impl Into<String>, kind: NodeKind, behavior: NodeBehavior) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            kind,
            source: None,
            tags: BTreeSet::new(),
            behavior,
            execution_mode: None,
            default_child_mode: None,
            resources: Vec::new(),
            extensions: Vec::new(),
        }
    }

    pub fn container(id: UniqueId, display_name: impl Into<String>) -> Self {
        Self::new(
            id,
            display_name,
            NodeKind::Container,
            NodeBehavior::Container { lifecycle: None },
        )
    }

    pub fn container_with_lifecycle(
        id: UniqueId,
        display_name: impl Into<String>,
        lifecycle: Lifecycle,
    ) -> Self {
        Self::new(
            id,
            display_name,
            NodeKind::Container,
            NodeBehavior::Container {
                lifecycle: Some(lifecycle),
            },
        )
    }

    pub fn test<F>(id: UniqueId, display_name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&ExecutionContext) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(
            id,
            display_name,
            NodeKind::Test,
            NodeBehavior::Test {
                body: Arc::new(body),
            },
        )
    }

    pub fn template<F>(
        id: UniqueId,
        display_name: impl Into<String>,
        segment_type: impl Into<String>,
        factory: F,
    ) -> Self
    where
        F: Fn(UniqueId, &dyn InvocationContext, usize) -> Arc<TestDescriptor> + Send + Sync + 'static,
    {
        Self::new(
            id,
            display_name,
            NodeKind::Container,
            NodeBehavior::Template {
                segment_type: segment_type.into(),
                factory: Arc::new(factory),
                expanded: Mutex::new(BTreeMap::new()),
            },
        )
    }

    pub fn invocation(id: UniqueId, display_name: impl Into<String>, index: usize) -> Self {
        Self::new(
            id,
            display_name,
            NodeKind::Container,
            NodeBehavior::Invocation { index },
        )
    }

    pub fn with_source(mut self, source: TestSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    pub fn with_default_child_mode(mut self, mode: ExecutionMode) -> Self {
        self.default_child_mode = Some(mode);
        self
    }

    pub fn with_resource(mut self, declaration: ResourceDeclaration) -> Self {
        self.resources.push(declaration);
        self
    }

    /// Attaches an extension discovered via a declarative marker.
    pub fn with_extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(ExtensionDeclaration {
            extension,
            source: RegistrationSource::Declarative,
        });
        self
    }

    /// Attaches a directly registered extension instance.
    pub fn with_extension_instance(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(ExtensionDeclaration {
            extension,
            source: RegistrationSource::Instance,
        });
        self
    }

    pub fn build(self) -> Arc<TestDescriptor> {
        Arc::new(TestDescriptor {
            id: self.id,
            display_name: self.display_name,
            kind: self.kind,
            source: self.source,
            tags: self.tags,
            parent: RwLock::new(Weak::new()),
            children: RwLock::new(Vec::new()),
            behavior: self.behavior,
            execution_mode: self.execution_mode,
            default_child_mode: self.default_child_mode,
            resources: self.resources,
            extensions: RwLock::new(self.extensions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_extend_by_one_segment() {
        let root = UniqueId::root("engine", "run");
        let child = root.child("container", "outer");
        assert_eq!(child.parent().unwrap(), root);
        assert_eq!(child.to_string(), "[engine:run]/[container:outer]");
        assert!(child.starts_with(&root));
        assert!(!root.starts_with(&child));
    }

    #[test]
    fn add_child_rejects_non_extending_ids() {
        let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "run").build();
        let stranger = TestDescriptorBuilder::container(
            UniqueId::root("engine", "other").child("container", "c"),
            "c",
        )
        .build();
        assert!(root.add_child(stranger).is_err());
    }

    #[test]
    fn parent_references_are_lookup_only() {
        let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "run").build();
        let child = TestDescriptorBuilder::container(root.id().child("container", "c"), "c").build();
        root.add_child(child.clone()).unwrap();

        assert_eq!(child.parent().unwrap().id(), root.id());

        child.remove_from_hierarchy();
        assert!(child.parent().is_none());
        assert!(root.children().is_empty());
    }

    #[test]
    fn descendants_walk_in_pre_order() {
        let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "run").build();
        let a = TestDescriptorBuilder::container(root.id().child("container", "a"), "a").build();
        let a1 = TestDescriptorBuilder::test(a.id().child("test", "a1"), "a1", |_| Ok(())).build();
        let b = TestDescriptorBuilder::container(root.id().child("container", "b"), "b").build();
        root.add_child(a.clone()).unwrap();
        a.add_child(a1.clone()).unwrap();
        root.add_child(b.clone()).unwrap();

        let ids: Vec<String> = root
            .descendants()
            .iter()
            .map(|d| d.id().last().value.clone())
            .collect();
        assert_eq!(ids, vec!["a", "a1", "b"]);
    }

    #[test]
    fn filter_accepts_descendants_and_ancestors_of_selected_ids() {
        let root = UniqueId::root("engine", "run");
        let template = root.child("template", "t");
        let second = template.child("invocation", "#2");

        let filter = UniqueIdFilter::of([second.clone()]);
        assert!(filter.accepts(&second));
        assert!(filter.accepts(&second.child("test", "inner")));
        assert!(filter.accepts(&template));
        assert!(!filter.accepts(&template.child("invocation", "#1")));
    }
}
