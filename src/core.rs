//! # Core Module / 核心模块
//!
//! This module contains the core functionality of Hierarchy Runner:
//! the descriptor tree, the node protocol, extensions, stores, and the
//! hierarchical executor.
//!
//! 此模块包含 Hierarchy Runner 的核心功能：
//! 描述符树、节点协议、扩展、存储以及层级执行器。

pub mod callbacks;
pub mod collector;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod execution;
pub mod extension;
pub mod locks;
pub mod models;
pub mod node;
pub mod registry;
pub mod resources;
pub mod store;
pub mod template;

// Re-exports
pub use descriptor::{TestDescriptor, TestDescriptorBuilder, UniqueId};
pub use execution::HierarchicalExecutor;
pub use models::{ExecutionResult, TestRun};
