//! # Reporting Module / 报告模块
//!
//! This module handles how execution progress and results reach the outside
//! world: the listener event stream every node reports through, and a
//! colorful console implementation of it.
//!
//! 此模块处理执行进度与结果如何到达外部世界：
//! 每个节点上报所经过的监听器事件流，以及它的彩色控制台实现。

pub mod console;
pub mod listener;

// Re-exports
pub use console::{ConsoleListener, print_summary};
pub use listener::{ExecutionListener, NoopListener, ReportEntry};
