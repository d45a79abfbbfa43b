//! # Template Expander Module / 模板展开模块
//!
//! Generates the children of container-template, class-template and
//! test-template nodes at run time from invocation-context providers. Each
//! produced child gets a deterministic identifier derived from its 1-based
//! index, so a previously filtered subset can be re-executed by identifier.
//!
//! 在运行时从调用上下文提供者生成容器模板、类模板和测试模板节点的子节点。
//! 每个生成的子节点获得由其从 1 开始的索引派生的确定性标识符，
//! 因此先前筛选过的子集可以按标识符重新执行。

use anyhow::{Result, bail};
use std::sync::Arc;

use crate::core::context::ExecutionContext;
use crate::core::descriptor::{
    ExtensionDeclaration, NodeBehavior, TestDescriptor, UniqueIdFilter,
};
use crate::core::extension::Extension;
use crate::core::registry::{ExtensionConfigurationError, RegistrationSource};

/// One provider-supplied invocation of a template.
/// 提供者提供的模板的一次调用。
pub trait InvocationContext: Send + Sync {
    /// The display name of the invocation with the given 1-based index.
    fn display_name(&self, index: usize) -> String;

    /// Extensions this invocation contributes to its own scope.
    /// 此次调用为其自身作用域贡献的扩展。
    fn additional_extensions(&self) -> Vec<Arc<dyn Extension>> {
        Vec::new()
    }
}

/// A lazy sequence of invocation contexts with a deterministic close hook.
///
/// The hook runs exactly once when the stream is dropped, on every exit
/// path including exceptional ones — scoped acquisition instead of
/// host-runtime finalization.
///
/// 带确定性关闭钩子的惰性调用上下文序列。
///
/// 钩子在流被丢弃时恰好运行一次，覆盖包括异常在内的每条退出路径——
/// 使用作用域化获取而不是宿主运行时的终结化。
pub struct InvocationStream {
    iter: Box<dyn Iterator<Item = Arc<dyn InvocationContext>> + Send>,
    on_close: Option<Box<dyn FnOnce() + Send>>,
}

impl InvocationStream {
    pub fn new<I>(contexts: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn InvocationContext>>,
        I::IntoIter: Send + 'static,
    {
        Self {
            iter: Box::new(contexts.into_iter()),
            on_close: None,
        }
    }

    /// Attaches the close hook run when the stream is released.
    pub fn with_close_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_close = Some(Box::new(hook));
        self
    }
}

impl Iterator for InvocationStream {
    type Item = Arc<dyn InvocationContext>;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

impl Drop for InvocationStream {
    fn drop(&mut self) {
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// Expands a template node's children from every supporting provider and
/// hands each produced child to `submit`.
///
/// Children already produced for an index are reused from the template's
/// cache instead of re-querying the providers, so a pruned-and-regrown
/// template yields identifier-identical children. After all providers run,
/// they must have yielded at least one context overall — filtered-out
/// invocations still count — unless a supporting provider opts into "may
/// legitimately produce zero".
///
/// 从每个支持的提供者展开模板节点的子节点，并将每个生成的子节点交给 `submit`。
///
/// 已为某索引生成的子节点会从模板缓存中复用而不是重新查询提供者，
/// 因此被剪枝后重新生长的模板会产出标识符完全一致的子节点。
/// 所有提供者运行后，它们总体上必须至少产出一个上下文——
/// 被过滤掉的调用同样计数——除非某个支持的提供者选择了“可以合法地产生零个”。
pub fn expand_template<F>(
    template: &Arc<TestDescriptor>,
    context: &ExecutionContext,
    filter: &UniqueIdFilter,
    mut submit: F,
) -> Result<()>
where
    F: FnMut(Arc<TestDescriptor>) -> Result<()>,
{
    let (segment_type, factory, expanded) = match &template.behavior {
        NodeBehavior::Template {
            segment_type,
            factory,
            expanded,
        } => (segment_type, factory, expanded),
        _ => bail!("node {} is not a template", template.id()),
    };

    let providers: Vec<Arc<dyn Extension>> = context
        .registry()
        .extensions(|e| e.as_invocation_context_provider().is_some())
        .into_iter()
        .filter(|ext| {
            ext.as_invocation_context_provider()
                .is_some_and(|provider| provider.supports(context))
        })
        .collect();

    if providers.is_empty() {
        return Err(ExtensionConfigurationError::new(format!(
            "no invocation-context provider supports template {}",
            template.id()
        ))
        .into());
    }

    let may_return_zero = providers.iter().any(|ext| {
        ext.as_invocation_context_provider()
            .is_some_and(|provider| provider.may_return_zero())
    });

    let mut index = 0usize;

    for extension in &providers {
        let Some(provider) = extension.as_invocation_context_provider() else {
            continue;
        };
        // The stream's close hook runs on drop, covering the early-return
        // paths below as well.
        let stream = provider.provide(context)?;
        for invocation in stream {
            index += 1;
            let child_id = template.id().child(segment_type.clone(), format!("#{index}"));
            if !filter.accepts(&child_id) {
                continue;
            }

            let cached = {
                let cache = expanded
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                cache.get(&index).cloned()
            };
            let (child, fresh) = match cached {
                Some(existing) => (existing, false),
                None => {
                    let child = (factory)(child_id.clone(), invocation.as_ref(), index);
                    if child.id() != &child_id {
                        return Err(ExtensionConfigurationError::new(format!(
                            "template factory produced child {} instead of {}",
                            child.id(),
                            child_id
                        ))
                        .into());
                    }
                    for extension in invocation.additional_extensions() {
                        child.add_extension(ExtensionDeclaration {
                            extension,
                            source: RegistrationSource::Instance,
                        });
                    }
                    expanded
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .insert(index, child.clone());
                    (child, true)
                }
            };

            if !template.has_child(&child_id) {
                template.add_child(child.clone())?;
            }
            if fresh {
                context.listener().dynamic_test_registered(&child);
            }
            submit(child)?;
        }
    }

    // The zero check guards against providers that yield nothing, not
    // against a re-run filter that happens to exclude every invocation.
    if index == 0 && !may_return_zero {
        return Err(ExtensionConfigurationError::new(format!(
            "template {} produced no invocations and no provider allows zero",
            template.id()
        ))
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ConfigurationParameters;
    use crate::core::context::InstanceChain;
    use crate::core::descriptor::{TestDescriptorBuilder, UniqueId};
    use crate::core::extension::InvocationContextProvider;
    use crate::core::registry::ExtensionRegistry;
    use crate::infra::output::OutputDirProvider;
    use crate::reporting::listener::NoopListener;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct PlainContext(&'static str);

    impl InvocationContext for PlainContext {
        fn display_name(&self, index: usize) -> String {
            format!("{} [{index}]", self.0)
        }
    }

    struct CountedProvider {
        count: usize,
        allow_zero: bool,
        closed: Arc<AtomicBool>,
    }

    impl Extension for CountedProvider {
        fn id(&self) -> &'static str {
            std::any::type_name::<Self>()
        }

        fn as_invocation_context_provider(&self) -> Option<&dyn InvocationContextProvider> {
            Some(self)
        }
    }

    impl InvocationContextProvider for CountedProvider {
        fn supports(&self, _context: &ExecutionContext) -> bool {
            true
        }

        fn provide(&self, _context: &ExecutionContext) -> Result<InvocationStream> {
            let contexts: Vec<Arc<dyn InvocationContext>> = (0..self.count)
                .map(|_| Arc::new(PlainContext("repetition")) as Arc<dyn InvocationContext>)
                .collect();
            let closed = self.closed.clone();
            Ok(InvocationStream::new(contexts).with_close_hook(move || {
                closed.store(true, Ordering::SeqCst);
            }))
        }

        fn may_return_zero(&self) -> bool {
            self.allow_zero
        }
    }

    fn template_node() -> Arc<TestDescriptor> {
        TestDescriptorBuilder::template(
            UniqueId::root("engine", "run").child("template", "t"),
            "t",
            "invocation",
            |id, invocation, index| {
                TestDescriptorBuilder::invocation(id, invocation.display_name(index), index).build()
            },
        )
        .build()
    }

    fn context_for(
        template: &Arc<TestDescriptor>,
        provider: Arc<dyn Extension>,
    ) -> Arc<ExecutionContext> {
        let root = ExecutionContext::root(
            template.clone(),
            Arc::new(NoopListener),
            Arc::new(ConfigurationParameters::empty()),
            Arc::new(OutputDirProvider::temporary().unwrap()),
        );
        let registry = Arc::new(
            ExtensionRegistry::child_of(root.registry().clone(), vec![provider], vec![]).unwrap(),
        );
        root.derive(template.clone(), registry, InstanceChain::empty())
    }

    #[test]
    fn three_contexts_produce_three_indexed_children() {
        let template = template_node();
        let closed = Arc::new(AtomicBool::new(false));
        let ctx = context_for(
            &template,
            Arc::new(CountedProvider {
                count: 3,
                allow_zero: false,
                closed: closed.clone(),
            }),
        );

        let submitted = Arc::new(Mutex::new(Vec::new()));
        let sink = submitted.clone();
        expand_template(&template, &ctx, &UniqueIdFilter::accept_all(), |child| {
            sink.lock().unwrap().push(child.id().to_string());
            Ok(())
        })
        .unwrap();

        let ids = submitted.lock().unwrap().clone();
        assert_eq!(ids.len(), 3);
        assert!(ids[0].ends_with("[invocation:#1]"));
        assert!(ids[1].ends_with("[invocation:#2]"));
        assert!(ids[2].ends_with("[invocation:#3]"));
        assert!(closed.load(Ordering::SeqCst));
    }

    #[test]
    fn filtered_re_expansion_reuses_the_cached_child() {
        let template = template_node();
        let ctx = context_for(
            &template,
            Arc::new(CountedProvider {
                count: 3,
                allow_zero: false,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        );

        expand_template(&template, &ctx, &UniqueIdFilter::accept_all(), |_| Ok(())).unwrap();
        let original_second = template
            .children()
            .into_iter()
            .find(|c| c.id().last().value == "#2")
            .unwrap();

        let second_id = original_second.id().clone();
        let mut resubmitted = Vec::new();
        expand_template(&template, &ctx, &UniqueIdFilter::of([second_id.clone()]), |child| {
            resubmitted.push(child);
            Ok(())
        })
        .unwrap();

        assert_eq!(resubmitted.len(), 1);
        assert_eq!(resubmitted[0].id(), &second_id);
        assert!(Arc::ptr_eq(&resubmitted[0], &original_second));
    }

    #[test]
    fn a_filter_excluding_every_invocation_is_not_a_provider_failure() {
        let template = template_node();
        let ctx = context_for(
            &template,
            Arc::new(CountedProvider {
                count: 3,
                allow_zero: false,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        );

        let elsewhere = UniqueId::root("engine", "run").child("test", "sibling");
        let mut submitted = 0usize;
        expand_template(&template, &ctx, &UniqueIdFilter::of([elsewhere]), |_| {
            submitted += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(submitted, 0);
    }

    #[test]
    fn zero_invocations_without_opt_in_is_a_configuration_error() {
        let template = template_node();
        let ctx = context_for(
            &template,
            Arc::new(CountedProvider {
                count: 0,
                allow_zero: false,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        );
        let result = expand_template(&template, &ctx, &UniqueIdFilter::accept_all(), |_| Ok(()));
        assert!(result.is_err());
    }

    #[test]
    fn zero_invocations_with_opt_in_is_fine() {
        let template = template_node();
        let ctx = context_for(
            &template,
            Arc::new(CountedProvider {
                count: 0,
                allow_zero: true,
                closed: Arc::new(AtomicBool::new(false)),
            }),
        );
        expand_template(&template, &ctx, &UniqueIdFilter::accept_all(), |_| Ok(())).unwrap();
    }

    #[test]
    fn no_supporting_provider_is_a_configuration_error() {
        let template = template_node();
        let root = ExecutionContext::root(
            template.clone(),
            Arc::new(NoopListener),
            Arc::new(ConfigurationParameters::empty()),
            Arc::new(OutputDirProvider::temporary().unwrap()),
        );
        let result = expand_template(&template, &root, &UniqueIdFilter::accept_all(), |_| Ok(()));
        assert!(result.is_err());
    }
}
