//! # Callback Dispatch Module / 回调分发模块
//!
//! Ordered invocation of lifecycle callbacks and the interceptor chain
//! wrapping the innermost invocation. Before-style callbacks stop at the
//! first failure so later ones never run against an inconsistent state;
//! after-style callbacks all run regardless, each failure collected.
//!
//! 生命周期回调的有序调用，以及包裹最内层调用的拦截器链。
//! before 风格的回调在第一个失败处停止，使后续回调不会在不一致状态下运行；
//! after 风格的回调无论如何全部运行，每个失败都会被收集。

use anyhow::Result;

use crate::core::collector::{Severity, default_severity_policy};
use crate::core::context::ExecutionContext;
use crate::core::descriptor::TestFn;
use crate::core::extension::Invocation;
use std::sync::Arc;

/// Runs before-all callbacks in registration order, stopping at the first
/// collected failure. Returns `Err` only for unrecoverable failures.
/// 按注册顺序运行 before-all 回调，在第一个被收集的失败处停止。
/// 仅对不可恢复的失败返回 `Err`。
pub fn invoke_before_all(context: &ExecutionContext) -> Result<()> {
    let callbacks = context
        .registry()
        .extensions(|e| e.as_before_all().is_some());
    for extension in callbacks {
        if !context.collector().is_empty() {
            break;
        }
        context.collector().execute(|| match extension.as_before_all() {
            Some(callback) => callback.before_all(context),
            None => Ok(()),
        })?;
    }
    Ok(())
}

/// Runs after-all callbacks in strict reverse order; all of them run
/// regardless of earlier failures.
pub fn invoke_after_all(context: &ExecutionContext) -> Result<()> {
    let callbacks = context
        .registry()
        .reversed_extensions(|e| e.as_after_all().is_some());
    for extension in callbacks {
        context.collector().execute(|| match extension.as_after_all() {
            Some(callback) => callback.after_all(context),
            None => Ok(()),
        })?;
    }
    Ok(())
}

/// Runs before-each callbacks in registration order, stopping at the first
/// collected failure.
pub fn invoke_before_each(context: &ExecutionContext) -> Result<()> {
    let callbacks = context
        .registry()
        .extensions(|e| e.as_before_each().is_some());
    for extension in callbacks {
        if !context.collector().is_empty() {
            break;
        }
        context
            .collector()
            .execute(|| match extension.as_before_each() {
                Some(callback) => callback.before_each(context),
                None => Ok(()),
            })?;
    }
    Ok(())
}

/// Runs after-each callbacks in strict reverse order; all of them run.
/// 按严格逆序运行 after-each 回调；它们全部运行。
pub fn invoke_after_each(context: &ExecutionContext) -> Result<()> {
    let callbacks = context
        .registry()
        .reversed_extensions(|e| e.as_after_each().is_some());
    for extension in callbacks {
        context
            .collector()
            .execute(|| match extension.as_after_each() {
                Some(callback) => callback.after_each(context),
                None => Ok(()),
            })?;
    }
    Ok(())
}

/// Runs the leaf body through the interceptor chain: the registered
/// interceptors are folded, last to first, into one composed callable, so
/// the first-registered (outermost-scope) interceptor wraps everything
/// else and the chain terminates in the actual body.
///
/// On failure, exception handlers are walked from innermost-registered to
/// outermost until one recovers; each handler may replace the failure
/// before passing it on. An unrecoverable failure is never offered to
/// handlers.
///
/// 让叶子体穿过拦截器链：已注册的拦截器从后到前折叠为一个复合可调用对象，
/// 因此最先注册（最外层作用域）的拦截器包裹其余所有内容，链终止于真正的测试体。
///
/// 失败时，异常处理器按从最内层注册到最外层的顺序遍历，直到某个处理器恢复为止；
/// 每个处理器在传递失败前可以替换它。不可恢复的失败绝不会交给处理器。
pub fn run_intercepted(context: &ExecutionContext, body: Arc<TestFn>) -> Result<()> {
    let interceptors = context
        .registry()
        .extensions(|e| e.as_invocation_interceptor().is_some());

    let mut next: Box<dyn FnOnce() -> Result<()> + Send + '_> = Box::new(move || body(context));
    for extension in interceptors.into_iter().rev() {
        let inner = next;
        next = Box::new(move || match extension.as_invocation_interceptor() {
            Some(interceptor) => interceptor.intercept(Invocation::new(inner), context),
            None => inner(),
        });
    }

    match next() {
        Ok(()) => Ok(()),
        Err(error) => handle_failure(context, error),
    }
}

fn handle_failure(context: &ExecutionContext, error: anyhow::Error) -> Result<()> {
    if default_severity_policy(&error) == Severity::Unrecoverable {
        return Err(error);
    }
    let mut current = error;
    let handlers = context
        .registry()
        .reversed_extensions(|e| e.as_exception_handler().is_some());
    for extension in handlers {
        let Some(handler) = extension.as_exception_handler() else {
            continue;
        };
        match handler.handle(context, current) {
            Ok(()) => return Ok(()),
            Err(replacement) => current = replacement,
        }
    }
    Err(current)
}
