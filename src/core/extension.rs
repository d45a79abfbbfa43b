//! # Extension Model Module / 扩展模型模块
//!
//! Cross-cutting behavior is injected into the tree through extensions. An
//! extension is one object implementing any number of capability traits
//! (conditions, lifecycle callbacks, interceptors, providers). Capability
//! support is resolved through one virtual accessor call per capability,
//! never through per-call reflection.
//!
//! 横切行为通过扩展注入到树中。一个扩展是实现任意数量能力 trait
//! （条件、生命周期回调、拦截器、提供者）的对象。
//! 能力支持通过每个能力一次虚调用的访问器解析，绝不通过逐次调用的反射。

use anyhow::Result;

use crate::core::context::ExecutionContext;
use crate::core::descriptor::TestDescriptor;
use crate::core::resources::ExclusiveResource;
use crate::core::template::InvocationStream;

/// Outcome of evaluating one enable/disable condition.
/// 评估单个启用/禁用条件的结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionResult {
    /// The node may run; the optional reason is informational only.
    Enabled(Option<String>),
    /// The node must be skipped, with the decisive reason.
    /// 该节点必须被跳过，并附带决定性的原因。
    Disabled(String),
}

impl ConditionResult {
    pub fn enabled() -> Self {
        ConditionResult::Enabled(None)
    }

    pub fn disabled(reason: impl Into<String>) -> Self {
        ConditionResult::Disabled(reason.into())
    }
}

/// Composable enable/disable condition; the first decisive (`Disabled`)
/// condition wins.
pub trait ExecutionCondition: Send + Sync {
    fn evaluate(&self, context: &ExecutionContext) -> ConditionResult;
}

/// Runs once before any of a container's children.
pub trait BeforeAllCallback: Send + Sync {
    fn before_all(&self, context: &ExecutionContext) -> Result<()>;
}

/// Runs once after all of a container's children, in strict reverse of the
/// before-all order.
pub trait AfterAllCallback: Send + Sync {
    fn after_all(&self, context: &ExecutionContext) -> Result<()>;
}

/// Runs before each leaf test under the registering scope.
pub trait BeforeEachCallback: Send + Sync {
    fn before_each(&self, context: &ExecutionContext) -> Result<()>;
}

/// Runs after each leaf test, in strict reverse of the before-each order.
pub trait AfterEachCallback: Send + Sync {
    fn after_each(&self, context: &ExecutionContext) -> Result<()>;
}

/// The remainder of an interceptor chain; calling [`Invocation::proceed`]
/// runs the next interceptor, terminating in the actual test body.
/// 拦截器链的剩余部分；调用 [`Invocation::proceed`] 运行下一个拦截器，
/// 最终到达真正的测试体。
pub struct Invocation<'a> {
    next: Box<dyn FnOnce() -> Result<()> + Send + 'a>,
}

impl<'a> Invocation<'a> {
    pub fn new(next: Box<dyn FnOnce() -> Result<()> + Send + 'a>) -> Self {
        Self { next }
    }

    /// Hands control to the next step of the chain.
    pub fn proceed(self) -> Result<()> {
        (self.next)()
    }
}

/// Wraps the innermost test invocation; each registered interceptor receives
/// "the next step" and decides whether and how to proceed.
pub trait InvocationInterceptor: Send + Sync {
    fn intercept(&self, invocation: Invocation<'_>, context: &ExecutionContext) -> Result<()>;
}

/// May intercept a raised failure and either recover (return `Ok`) or
/// re-raise, possibly with a different failure.
/// 可以拦截抛出的失败并选择恢复（返回 `Ok`）或重新抛出（可能换成另一个失败）。
pub trait ExceptionHandler: Send + Sync {
    fn handle(&self, context: &ExecutionContext, error: anyhow::Error) -> Result<()>;
}

/// Creates the shared instance of a container node.
pub trait InstanceFactory: Send + Sync {
    fn create_instance(
        &self,
        context: &ExecutionContext,
    ) -> Result<std::sync::Arc<dyn std::any::Any + Send + Sync>>;
}

/// Supplies the lazy sequence of invocation contexts a template node expands
/// its children from.
/// 为模板节点提供用于展开其子节点的惰性调用上下文序列。
pub trait InvocationContextProvider: Send + Sync {
    /// Whether this provider claims the given template node.
    fn supports(&self, context: &ExecutionContext) -> bool;

    /// Opens the lazy sequence. The returned stream is closed
    /// deterministically on every exit path, including failure.
    fn provide(&self, context: &ExecutionContext) -> Result<InvocationStream>;

    /// A provider that opts in here may legitimately produce zero contexts.
    /// 在此选择加入的提供者可以合法地不产生任何上下文。
    fn may_return_zero(&self) -> bool {
        false
    }
}

/// Resolves additional exclusive resources from a node's own data.
pub trait ResourceLockProvider: Send + Sync {
    fn resolve(&self, descriptor: &TestDescriptor) -> Vec<ExclusiveResource>;
}

/// A registered implementation of one or more capability interfaces.
///
/// Every accessor defaults to `None`; implementations override exactly the
/// capabilities they support. `id` identifies the extension *type* for
/// duplicate-registration detection; `std::any::type_name::<Self>()` is the
/// conventional value.
///
/// 一个已注册的、实现一个或多个能力接口的实现。
///
/// 每个访问器默认返回 `None`；实现只覆盖它们支持的能力。
/// `id` 标识扩展的*类型*，用于重复注册检测；
/// 约定值为 `std::any::type_name::<Self>()`。
pub trait Extension: Send + Sync {
    fn id(&self) -> &'static str;

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        None
    }

    fn as_before_all(&self) -> Option<&dyn BeforeAllCallback> {
        None
    }

    fn as_after_all(&self) -> Option<&dyn AfterAllCallback> {
        None
    }

    fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
        None
    }

    fn as_after_each(&self) -> Option<&dyn AfterEachCallback> {
        None
    }

    fn as_invocation_interceptor(&self) -> Option<&dyn InvocationInterceptor> {
        None
    }

    fn as_exception_handler(&self) -> Option<&dyn ExceptionHandler> {
        None
    }

    fn as_instance_factory(&self) -> Option<&dyn InstanceFactory> {
        None
    }

    fn as_invocation_context_provider(&self) -> Option<&dyn InvocationContextProvider> {
        None
    }

    fn as_lock_provider(&self) -> Option<&dyn ResourceLockProvider> {
        None
    }
}
