//! # Node Protocol Module / 节点协议模块
//!
//! The five-operation contract every node type implements, dispatched over
//! its behavior: `prepare` → `should_be_skipped` → `before` → `execute` →
//! `after` → `clean_up`. A failure at any step never prevents later cleanup
//! steps; it is recorded in the context's throwable collector and surfaced
//! once, after cleanup.
//!
//! 每种节点类型都实现的五操作契约，按其行为分发：
//! `prepare` → `should_be_skipped` → `before` → `execute` →
//! `after` → `clean_up`。任何一步的失败都不会阻止后续清理步骤的运行；
//! 失败会被记录到上下文的失败收集器中，并在清理之后一次性呈现。

use anyhow::{Result, bail};
use std::sync::Arc;

use crate::core::callbacks;
use crate::core::config::DEFAULT_LIFECYCLE_KEY;
use crate::core::context::{ExecutionContext, InstanceChain, InstanceSlot};
use crate::core::descriptor::{Lifecycle, NodeBehavior, TestDescriptor};
use crate::core::extension::ConditionResult;
use crate::core::registry::{ExtensionRegistry, RegistrationSource};

/// Outcome of the skip check.
/// 跳过检查的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipStatus {
    /// The first decisive condition disabled the node.
    Skip { reason: String },
    /// No decisive condition; the node proceeds.
    Continue,
}

/// The per-node state machine. `Skipped` is terminal for the
/// before/execute/after steps, but cleanup still runs.
/// 每节点的状态机。对于 before/execute/after 步骤，`Skipped` 是终态，
/// 但清理仍会运行。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Created,
    Prepared,
    Skipped,
    Started,
    Executed,
    AfterRun,
    CleanedUp,
}

impl NodeState {
    /// Whether the transition from `self` to `next` is legal.
    pub fn can_advance_to(self, next: NodeState) -> bool {
        use NodeState::*;
        matches!(
            (self, next),
            (Created, Prepared)
                | (Prepared, Skipped)
                | (Prepared, Started)
                | (Started, Executed)
                | (Executed, AfterRun)
                | (AfterRun, CleanedUp)
                | (Skipped, CleanedUp)
        )
    }
}

/// Tracks one node's progress through the protocol; transitions outside the
/// state machine are programming errors.
#[derive(Debug)]
pub struct NodeLifecycle {
    state: NodeState,
}

impl Default for NodeLifecycle {
    fn default() -> Self {
        Self {
            state: NodeState::Created,
        }
    }
}

impl NodeLifecycle {
    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn advance(&mut self, next: NodeState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            bail!(
                "illegal node state transition: {:?} -> {:?}",
                self.state,
                next
            );
        }
        self.state = next;
        Ok(())
    }
}

/// Builds the node-local extension registrations, layers a node-scoped
/// context on the parent's, and returns it. Never closes the parent's
/// resources.
///
/// Extensions declared via markers register before directly registered
/// instances; a duplicate type across the two mechanisms at this scope is
/// an immediate configuration error.
///
/// 构建节点本地的扩展注册，在父级之上叠加节点作用域的上下文并返回。
/// 绝不关闭父级的资源。
///
/// 通过标记声明的扩展先于直接注册的实例注册；
/// 在此作用域内两种机制下的重复类型是立即抛出的配置错误。
pub fn prepare(
    descriptor: &Arc<TestDescriptor>,
    parent: &Arc<ExecutionContext>,
) -> Result<Arc<ExecutionContext>> {
    let mut declarative = Vec::new();
    let mut instances = Vec::new();
    for declaration in descriptor.declared_extensions() {
        match declaration.source {
            RegistrationSource::Declarative => declarative.push(declaration.extension),
            RegistrationSource::Instance => instances.push(declaration.extension),
        }
    }
    let registry = Arc::new(ExtensionRegistry::child_of(
        parent.registry().clone(),
        declarative,
        instances,
    )?);

    let chain = match &descriptor.behavior {
        NodeBehavior::Container { lifecycle } => {
            extend_chain_for_container(descriptor, parent, *lifecycle)?
        }
        NodeBehavior::Invocation { .. } => extend_chain_for_container(descriptor, parent, None)?,
        NodeBehavior::Test { .. } => parent.instances().shadowed_for_leaf(),
        NodeBehavior::Template { .. } => parent.instances().clone(),
    };

    Ok(parent.derive(descriptor.clone(), registry, chain))
}

/// Containers that declare an instance factory at their own scope compose a
/// new slot onto the outer→inner chain.
/// 在自身作用域声明实例工厂的容器会向由外到内的链上组合一个新槽位。
fn extend_chain_for_container(
    descriptor: &Arc<TestDescriptor>,
    parent: &Arc<ExecutionContext>,
    declared_lifecycle: Option<Lifecycle>,
) -> Result<InstanceChain> {
    let local_factory = descriptor
        .declared_extensions()
        .into_iter()
        .map(|declaration| declaration.extension)
        .find(|extension| extension.as_instance_factory().is_some());

    let Some(factory) = local_factory else {
        return Ok(parent.instances().clone());
    };
    let lifecycle = match declared_lifecycle {
        Some(lifecycle) => lifecycle,
        None => parent
            .config()
            .get_enum(DEFAULT_LIFECYCLE_KEY, Lifecycle::parse)?
            .unwrap_or(Lifecycle::PerUnit),
    };
    Ok(parent
        .instances()
        .extended(InstanceSlot::new(descriptor.id().clone(), lifecycle, factory)))
}

/// Evaluates the composable enable/disable conditions registered in the
/// already-extended registry. The first decisive condition wins; absence of
/// any decisive condition means continue.
/// 评估已扩展注册表中注册的可组合启用/禁用条件。
/// 第一个决定性条件获胜；没有任何决定性条件则继续。
pub fn should_be_skipped(context: &ExecutionContext) -> SkipStatus {
    for extension in context.registry().extensions(|e| e.as_condition().is_some()) {
        let Some(condition) = extension.as_condition() else {
            continue;
        };
        if let ConditionResult::Disabled(reason) = condition.evaluate(context) {
            return SkipStatus::Skip { reason };
        }
    }
    SkipStatus::Continue
}

/// Runs the node's "before" step. Containers run before-all callbacks and,
/// when the shared instance follows the per-container policy and a
/// before-all callback is registered, materialize the instance eagerly
/// first. Leaves run before-each callbacks.
/// 运行节点的 "before" 步骤。容器运行 before-all 回调，
/// 且当共享实例遵循 per-container 策略并注册了 before-all 回调时，
/// 先急切地实体化实例。叶子运行 before-each 回调。
pub fn before(descriptor: &Arc<TestDescriptor>, context: &Arc<ExecutionContext>) -> Result<()> {
    match &descriptor.behavior {
        NodeBehavior::Test { .. } => callbacks::invoke_before_each(context),
        _ => {
            let eager = context.instances().lifecycle_of(descriptor.id())
                == Some(Lifecycle::PerContainer)
                && !context
                    .registry()
                    .extensions(|e| e.as_before_all().is_some())
                    .is_empty();
            if eager {
                context
                    .collector()
                    .execute(|| context.instance_of(descriptor.id()).map(|_| ()))?;
            }
            callbacks::invoke_before_all(context)
        }
    }
}

/// Runs a leaf node's unit of work through the interceptor chain, with
/// exception handlers given a chance to recover. The failure, if any, lands
/// in the context's collector.
/// 通过拦截器链运行叶子节点的工作单元，并给异常处理器恢复的机会。
/// 如有失败，会落入上下文的收集器。
pub fn execute_test(descriptor: &Arc<TestDescriptor>, context: &Arc<ExecutionContext>) -> Result<()> {
    let NodeBehavior::Test { body } = &descriptor.behavior else {
        bail!("node {} is not a leaf test", descriptor.id());
    };
    let body = body.clone();
    context
        .collector()
        .execute(|| callbacks::run_intercepted(context, body))
}

/// Runs the node's "after" step: cleanup callbacks in strict reverse of the
/// before order, all of them, regardless of earlier failures.
pub fn after(descriptor: &Arc<TestDescriptor>, context: &Arc<ExecutionContext>) -> Result<()> {
    match &descriptor.behavior {
        NodeBehavior::Test { .. } => callbacks::invoke_after_each(context),
        _ => callbacks::invoke_after_all(context),
    }
}

/// Closes the node's context, releasing only the resources the node itself
/// placed in its store. Close failures are collected, not thrown.
/// 关闭节点的上下文，只释放节点自己放入其存储的资源。
/// 关闭失败会被收集，而不是抛出。
pub fn clean_up(context: &Arc<ExecutionContext>) -> Result<()> {
    context.collector().execute(|| context.store().close())
}
