//! # Extension Registry Module / 扩展注册表模块
//!
//! A scoped, hierarchical, append-only collection of extension instances.
//! Querying a capability returns the parent's matches followed by this
//! scope's own matches in registration order, so ancestor-declared
//! cross-cutting behavior always wraps descendant-declared behavior.
//!
//! 有作用域的、层级化的、只增的扩展实例集合。
//! 查询某能力会先返回父级的匹配项，再按注册顺序返回本作用域自己的匹配项，
//! 因此祖先声明的横切行为总是包裹后代声明的行为。

use std::fmt;
use std::sync::Arc;

use crate::core::extension::Extension;

/// A configuration error in extension registration: always fatal to the
/// affected subtree and raised immediately rather than collected.
/// 扩展注册中的配置错误：对受影响的子树总是致命的，会被立即抛出而不是收集。
#[derive(Debug, Clone)]
pub struct ExtensionConfigurationError {
    pub message: String,
}

impl ExtensionConfigurationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for ExtensionConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extension configuration error: {}", self.message)
    }
}

impl std::error::Error for ExtensionConfigurationError {}

/// How an extension arrived at its scope.
/// 扩展到达其作用域的方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationSource {
    /// Discovered via a declarative marker on a program element.
    Declarative,
    /// Registered as a concrete instance ("register this object").
    Instance,
}

#[derive(Clone)]
struct RegisteredExtension {
    extension: Arc<dyn Extension>,
    source: RegistrationSource,
}

/// Hierarchical, append-only-within-a-scope registry of extensions.
///
/// Registration happens only during a node's `prepare`; extensions are never
/// removed once registered within a run.
///
/// 层级化、在单个作用域内只增的扩展注册表。
///
/// 注册只发生在节点的 `prepare` 期间；一旦在一次运行中注册，扩展绝不会被移除。
pub struct ExtensionRegistry {
    parent: Option<Arc<ExtensionRegistry>>,
    entries: Vec<RegisteredExtension>,
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("local_len", &self.entries.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl ExtensionRegistry {
    /// The empty root registry of a run.
    pub fn root() -> Self {
        Self {
            parent: None,
            entries: Vec::new(),
        }
    }

    /// Builds a child scope from the extensions a node registers during its
    /// `prepare`. Declarative registrations precede instance registrations;
    /// registering the identical extension type through two different
    /// declaration mechanisms at the same scope is a configuration error.
    ///
    /// 从节点在 `prepare` 期间注册的扩展构建子作用域。
    /// 声明式注册先于实例注册；在同一作用域通过两种不同声明机制
    /// 注册相同的扩展类型是配置错误。
    pub fn child_of(
        parent: Arc<ExtensionRegistry>,
        declarative: Vec<Arc<dyn Extension>>,
        instances: Vec<Arc<dyn Extension>>,
    ) -> Result<Self, ExtensionConfigurationError> {
        let mut entries = Vec::with_capacity(declarative.len() + instances.len());
        for extension in declarative {
            entries.push(RegisteredExtension {
                extension,
                source: RegistrationSource::Declarative,
            });
        }
        for extension in instances {
            if let Some(existing) = entries
                .iter()
                .find(|entry| entry.extension.id() == extension.id())
            {
                if existing.source != RegistrationSource::Instance {
                    return Err(ExtensionConfigurationError::new(format!(
                        "extension type \"{}\" registered twice at the same scope \
                         through different declaration mechanisms",
                        extension.id()
                    )));
                }
            }
            entries.push(RegisteredExtension {
                extension,
                source: RegistrationSource::Instance,
            });
        }
        Ok(Self {
            parent: Some(parent),
            entries,
        })
    }

    /// All extensions matching `capability`, ancestors first, each scope in
    /// registration order.
    /// 匹配 `capability` 的所有扩展，祖先在前，每个作用域内按注册顺序。
    pub fn extensions<F>(&self, capability: F) -> Vec<Arc<dyn Extension>>
    where
        F: Fn(&dyn Extension) -> bool + Copy,
    {
        let mut matched = match &self.parent {
            Some(parent) => parent.extensions(capability),
            None => Vec::new(),
        };
        matched.extend(
            self.entries
                .iter()
                .filter(|entry| capability(entry.extension.as_ref()))
                .map(|entry| entry.extension.clone()),
        );
        matched
    }

    /// The exact reverse of [`ExtensionRegistry::extensions`].
    pub fn reversed_extensions<F>(&self, capability: F) -> Vec<Arc<dyn Extension>>
    where
        F: Fn(&dyn Extension) -> bool + Copy,
    {
        let mut matched = self.extensions(capability);
        matched.reverse();
        matched
    }

    /// One-shot iteration over matching extensions, ancestors first.
    pub fn stream<F>(&self, capability: F) -> impl Iterator<Item = Arc<dyn Extension>>
    where
        F: Fn(&dyn Extension) -> bool + Copy,
    {
        self.extensions(capability).into_iter()
    }

    /// Number of extensions registered at this scope only.
    pub fn local_len(&self) -> usize {
        self.entries.len()
    }
}
