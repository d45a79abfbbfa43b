//! # Infrastructure Module / 基础设施模块
//!
//! This module provides infrastructure services for Hierarchy Runner,
//! currently the per-node artifact output directory.
//!
//! 此模块为 Hierarchy Runner 提供基础设施服务，
//! 目前是每节点的产物输出目录。

pub mod output;

// Re-exports
pub use output::OutputDirProvider;
