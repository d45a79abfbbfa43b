//! # Hierarchy Runner Library / Hierarchy Runner 库
//!
//! This library provides a hierarchical test execution engine: a tree of
//! test descriptors is driven through a uniform node protocol with
//! extension points, scoped resource stores, dynamic template expansion,
//! and lock-aware parallel execution.
//!
//! 此库提供一个层级测试执行引擎：测试描述符树通过统一的节点协议驱动，
//! 带有扩展点、作用域化的资源存储、动态模板展开以及锁感知的并行执行。
//!
//! ## Modules / 模块
//!
//! - `core` - Descriptor tree, node protocol, extensions, and the executor
//! - `infra` - Infrastructure services like the artifact output directory
//! - `reporting` - Execution listeners and console reporting
//!
//! - `core` - 描述符树、节点协议、扩展以及执行器
//! - `infra` - 基础设施服务，如产物输出目录
//! - `reporting` - 执行监听器和控制台报告

pub mod core;
pub mod infra;
pub mod reporting;

// Re-export commonly used items
pub use core::descriptor;
pub use core::execution;
pub use core::extension;
pub use core::models;
