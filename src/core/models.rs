//! # Result Models Module / 结果模型模块
//!
//! This module defines the per-node execution results the engine reports
//! and the run-level summary built from them.
//!
//! 此模块定义引擎报告的每节点执行结果，以及由它们构建的运行级摘要。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::core::collector::CollectedFailure;
use crate::core::descriptor::UniqueId;

/// The final result of one node's execution.
/// 单个节点执行的最终结果。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ExecutionResult {
    /// The node ran and its collector was empty after `after` + `clean_up`.
    /// 节点已运行，且在 `after` 与 `clean_up` 之后其收集器为空。
    Successful,
    /// The node was skipped with the first decisive condition reason.
    /// 节点被跳过，附带第一个决定性条件的原因。
    Skipped { reason: String },
    /// The node failed; the primary failure message plus every suppressed
    /// one, preserving the full causal chain.
    /// 节点失败；主失败消息以及每个被抑制的失败，保留完整的因果链。
    Failed {
        message: String,
        suppressed: Vec<String>,
    },
}

impl ExecutionResult {
    pub(crate) fn from_failure(failure: CollectedFailure) -> Self {
        ExecutionResult::Failed {
            message: failure.primary_message(),
            suppressed: failure.suppressed_messages(),
        }
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, ExecutionResult::Successful)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, ExecutionResult::Skipped { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ExecutionResult::Failed { .. })
    }

    /// Short status label for display.
    /// 用于显示的简短状态标签。
    pub fn status_str(&self) -> &'static str {
        match self {
            ExecutionResult::Successful => "passed",
            ExecutionResult::Skipped { .. } => "skipped",
            ExecutionResult::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Successful => write!(f, "passed"),
            ExecutionResult::Skipped { reason } => write!(f, "skipped: {reason}"),
            ExecutionResult::Failed {
                message,
                suppressed,
            } => {
                write!(f, "failed: {message}")?;
                if !suppressed.is_empty() {
                    write!(f, " (+{} suppressed)", suppressed.len())?;
                }
                Ok(())
            }
        }
    }
}

/// All per-node results of one run, keyed by node identifier.
/// 一次运行的所有每节点结果，以节点标识符为键。
#[derive(Debug, Default)]
pub struct TestRun {
    results: BTreeMap<UniqueId, ExecutionResult>,
}

impl TestRun {
    pub(crate) fn record(&mut self, id: UniqueId, result: ExecutionResult) {
        self.results.insert(id, result);
    }

    pub fn result_of(&self, id: &UniqueId) -> Option<&ExecutionResult> {
        self.results.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&UniqueId, &ExecutionResult)> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// `true` when no node failed.
    pub fn all_successful(&self) -> bool {
        self.results.values().all(|r| !r.is_failure())
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for result in self.results.values() {
            match result {
                ExecutionResult::Successful => summary.passed += 1,
                ExecutionResult::Skipped { .. } => summary.skipped += 1,
                ExecutionResult::Failed { .. } => summary.failed += 1,
            }
        }
        summary
    }
}

/// Per-status counts over a whole run.
/// 整次运行的按状态计数。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub passed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.skipped + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_counts_each_status() {
        let mut run = TestRun::default();
        run.record(UniqueId::root("engine", "run"), ExecutionResult::Successful);
        run.record(
            UniqueId::root("engine", "run").child("test", "a"),
            ExecutionResult::Skipped {
                reason: "disabled".into(),
            },
        );
        run.record(
            UniqueId::root("engine", "run").child("test", "b"),
            ExecutionResult::Failed {
                message: "assertion".into(),
                suppressed: vec![],
            },
        );

        let summary = run.summary();
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total(), 3);
        assert!(!run.all_successful());
    }
}
