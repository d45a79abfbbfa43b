//! # Throwable Collector Module / 失败收集器模块
//!
//! This module accumulates failures from a sequence of fallible operations
//! without losing earlier ones. The first failure becomes the primary one;
//! later failures are attached as suppressed, unless the severity policy
//! classifies a newcomer as more severe, in which case it replaces the
//! primary and the old primary joins the suppressed list.
//!
//! 此模块从一系列可能失败的操作中累积失败，而不会丢失较早的失败。
//! 第一个失败成为主失败；之后的失败作为被抑制的失败附加，
//! 除非严重性策略将新失败判定为更严重，此时它会取代主失败，
//! 而旧的主失败加入被抑制列表。

use anyhow::{Result, anyhow};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Mutex;

/// A failure the engine must never collect: it propagates immediately,
/// bypassing the usual cleanup ordering guarantees.
/// 引擎绝不能收集的失败：它会立即传播，绕过常规的清理顺序保证。
#[derive(Debug, Clone)]
pub struct FatalError {
    /// Human-readable description of the unrecoverable condition.
    /// 不可恢复状况的可读描述。
    pub message: String,
}

impl FatalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fatal error: {}", self.message)
    }
}

impl std::error::Error for FatalError {}

/// How the severity policy classifies a failure.
/// 严重性策略如何对失败进行分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// An ordinary execution failure; collected normally.
    /// 普通执行失败；正常收集。
    Ordinary,
    /// More severe than anything already collected; becomes the new primary.
    /// 比已收集的任何失败都更严重；成为新的主失败。
    Unrecoverable,
}

/// Pluggable classifier deciding whether a new failure outranks the primary.
/// 可插拔的分类器，决定新失败是否优先于主失败。
pub type SeverityPolicy = fn(&anyhow::Error) -> Severity;

/// The default policy: anything carrying a [`FatalError`] in its chain is
/// unrecoverable, everything else is ordinary.
pub fn default_severity_policy(error: &anyhow::Error) -> Severity {
    if error
        .chain()
        .any(|cause| cause.downcast_ref::<FatalError>().is_some())
    {
        Severity::Unrecoverable
    } else {
        Severity::Ordinary
    }
}

/// A collected failure: one primary error plus any suppressed ones.
/// 一个已收集的失败：一个主错误以及任何被抑制的错误。
#[derive(Debug)]
pub struct CollectedFailure {
    pub primary: anyhow::Error,
    pub suppressed: Vec<anyhow::Error>,
}

impl CollectedFailure {
    /// Folds the primary and suppressed failures into one reportable error.
    /// 将主失败与被抑制的失败合并为一个可报告的错误。
    pub fn into_error(self) -> anyhow::Error {
        if self.suppressed.is_empty() {
            return self.primary;
        }
        let details = self
            .suppressed
            .iter()
            .map(|e| format!("{e:#}"))
            .collect::<Vec<_>>()
            .join("; ");
        self.primary
            .context(format!("suppressed failures: [{details}]"))
    }

    /// Renders the primary failure's full context chain.
    pub fn primary_message(&self) -> String {
        format!("{:#}", self.primary)
    }

    /// Renders each suppressed failure's full context chain.
    pub fn suppressed_messages(&self) -> Vec<String> {
        self.suppressed.iter().map(|e| format!("{e:#}")).collect()
    }
}

/// Accumulates failures across the lifecycle steps of a single node.
///
/// Emptiness is always checkable without raising; once non-empty,
/// [`ThrowableCollector::assert_empty`] deterministically re-raises the
/// primary with all others attached.
///
/// 在单个节点的生命周期步骤中累积失败。
///
/// 是否为空总是可以在不抛出的情况下检查；一旦非空，
/// [`ThrowableCollector::assert_empty`] 会确定性地重新抛出主失败并附带所有其他失败。
pub struct ThrowableCollector {
    failure: Mutex<Option<CollectedFailure>>,
    policy: SeverityPolicy,
}

impl Default for ThrowableCollector {
    fn default() -> Self {
        Self::new(default_severity_policy)
    }
}

impl fmt::Debug for ThrowableCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThrowableCollector")
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

impl ThrowableCollector {
    pub fn new(policy: SeverityPolicy) -> Self {
        Self {
            failure: Mutex::new(None),
            policy,
        }
    }

    /// Runs a fallible operation and collects its failure, if any.
    ///
    /// Panics raised by the operation are caught and converted into
    /// collected failures. A failure classified as unrecoverable is *not*
    /// collected: it is returned immediately so the caller can propagate it
    /// past the usual cleanup ordering.
    ///
    /// 运行一个可能失败的操作并收集其失败（如果有）。
    ///
    /// 操作中抛出的 panic 会被捕获并转换为已收集的失败。
    /// 被判定为不可恢复的失败*不会*被收集：它会被立即返回，
    /// 以便调用者可以绕过常规清理顺序进行传播。
    pub fn execute<F>(&self, operation: F) -> Result<()>
    where
        F: FnOnce() -> Result<()>,
    {
        match catch_unwind(AssertUnwindSafe(operation)) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => {
                if (self.policy)(&error) == Severity::Unrecoverable {
                    return Err(error);
                }
                self.record(error);
                Ok(())
            }
            Err(payload) => {
                self.record(anyhow!("panicked: {}", panic_message(&*payload)));
                Ok(())
            }
        }
    }

    /// Records a failure directly, applying the severity policy.
    /// 直接记录一个失败，并应用严重性策略。
    pub fn record(&self, error: anyhow::Error) {
        let mut slot = self
            .failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match slot.as_mut() {
            None => {
                *slot = Some(CollectedFailure {
                    primary: error,
                    suppressed: Vec::new(),
                });
            }
            Some(existing) => {
                if (self.policy)(&error) == Severity::Unrecoverable
                    && (self.policy)(&existing.primary) != Severity::Unrecoverable
                {
                    let old_primary = std::mem::replace(&mut existing.primary, error);
                    existing.suppressed.push(old_primary);
                } else {
                    existing.suppressed.push(error);
                }
            }
        }
    }

    /// `true` when no failure has been collected yet.
    pub fn is_empty(&self) -> bool {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Removes and returns the collected failure, leaving the collector empty.
    /// 移除并返回已收集的失败，使收集器为空。
    pub fn take_failure(&self) -> Option<CollectedFailure> {
        self.failure
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    /// Re-raises the primary failure with all suppressed ones attached, or
    /// returns `Ok(())` when nothing was collected.
    /// 重新抛出主失败并附带所有被抑制的失败；若未收集到任何失败则返回 `Ok(())`。
    pub fn assert_empty(&self) -> Result<()> {
        match self.take_failure() {
            None => Ok(()),
            Some(failure) => Err(failure.into_error()),
        }
    }
}

/// Extracts a printable message from a panic payload.
/// 从 panic 载荷中提取可打印的消息。
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
