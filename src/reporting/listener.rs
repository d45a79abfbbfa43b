//! # Execution Listener Module / 执行监听器模块
//!
//! The side-channel the engine reports through: lifecycle events for every
//! node, synchronous dynamic-registration notifications, and the two
//! publication events (structured key/value entries and file artifacts).
//!
//! 引擎用于上报的旁路通道：每个节点的生命周期事件、同步的动态注册通知，
//! 以及两种发布事件（结构化键值条目与文件产物）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::descriptor::TestDescriptor;
use crate::core::models::ExecutionResult;

/// A timestamped, structured key/value entry published by a running node.
/// 运行中的节点发布的带时间戳的结构化键值条目。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEntry {
    pub timestamp: DateTime<Utc>,
    pub values: BTreeMap<String, String>,
}

impl ReportEntry {
    pub fn now(values: BTreeMap<String, String>) -> Self {
        Self {
            timestamp: Utc::now(),
            values,
        }
    }

    /// Single key/value convenience constructor.
    pub fn single(key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert(key.into(), value.into());
        Self::now(values)
    }

    /// JSON rendering for listeners that persist entries.
    /// 供持久化条目的监听器使用的 JSON 表示。
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receives execution events. All callbacks default to no-ops so listeners
/// implement only what they care about; events for one node are delivered
/// in lifecycle order.
///
/// 接收执行事件。所有回调默认是空操作，监听器只需实现其关心的部分；
/// 单个节点的事件按生命周期顺序投递。
pub trait ExecutionListener: Send + Sync {
    fn execution_started(&self, _descriptor: &TestDescriptor) {}

    fn execution_skipped(&self, _descriptor: &TestDescriptor, _reason: &str) {}

    fn execution_finished(&self, _descriptor: &TestDescriptor, _result: &ExecutionResult) {}

    /// Raised synchronously whenever a template/dynamic node creates a
    /// child at run time.
    /// 每当模板/动态节点在运行时创建子节点时同步触发。
    fn dynamic_test_registered(&self, _descriptor: &TestDescriptor) {}

    fn reporting_entry_published(&self, _descriptor: &TestDescriptor, _entry: &ReportEntry) {}

    fn file_entry_published(&self, _descriptor: &TestDescriptor, _path: &Path) {}
}

/// The default listener: discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl ExecutionListener for NoopListener {}
