//! # Hierarchical Executor Module / 层级执行器模块
//!
//! Drives the whole descriptor tree through the node protocol: prepare,
//! skip check, before, execute, after, clean up. Containers run their
//! children either inline in declaration order or through a bounded worker
//! pool; template nodes grow their children mid-run and the executor
//! barriers on every dynamic child before the template's `after` step.
//!
//! 通过节点协议驱动整棵描述符树：prepare、跳过检查、before、execute、
//! after、clean up。容器按声明顺序内联运行其子节点，或通过有界工作池运行；
//! 模板节点在运行中生长子节点，执行器在模板的 `after` 步骤之前
//! 对每个动态子节点设置屏障。

use anyhow::{Result, bail};
use futures::StreamExt;
use futures::future::BoxFuture;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;

use crate::core::config::{
    ConfigurationParameters, DEFAULT_EXECUTION_MODE_KEY, PARALLELISM_KEY,
};
use crate::core::context::ExecutionContext;
use crate::core::descriptor::{
    ExecutionMode, NodeBehavior, TestDescriptor, UniqueIdFilter,
};
use crate::core::locks::LockManager;
use crate::core::models::{ExecutionResult, TestRun};
use crate::core::node::{self, SkipStatus};
use crate::core::resources;
use crate::core::template::expand_template;
use crate::infra::output::OutputDirProvider;
use crate::reporting::listener::ExecutionListener;

/// Executes a descriptor tree. Cheap to clone; every clone shares the same
/// listener, lock table and worker-pool budget.
/// 执行描述符树。克隆开销低；每个克隆共享同一个监听器、锁表和工作池预算。
#[derive(Clone)]
pub struct HierarchicalExecutor {
    listener: Arc<dyn ExecutionListener>,
    config: Arc<ConfigurationParameters>,
    output: Arc<OutputDirProvider>,
    locks: Arc<LockManager>,
    semaphore: Arc<Semaphore>,
    parallelism: usize,
    default_mode: ExecutionMode,
    filter: UniqueIdFilter,
}

impl HierarchicalExecutor {
    /// Builds an executor from the run's configuration. Malformed values of
    /// the engine's own keys are reported here, before anything runs.
    /// 从本次运行的配置构建执行器。引擎自身键的格式错误在此处、
    /// 在任何节点运行之前就被报告。
    pub fn new(
        listener: Arc<dyn ExecutionListener>,
        config: Arc<ConfigurationParameters>,
        output: Arc<OutputDirProvider>,
    ) -> Result<Self> {
        let parallelism = config
            .get_usize(PARALLELISM_KEY)?
            .unwrap_or_else(num_cpus::get)
            .max(1);
        let default_mode = config
            .get_enum(DEFAULT_EXECUTION_MODE_KEY, ExecutionMode::parse)?
            .unwrap_or(ExecutionMode::SameThread);
        Ok(Self {
            listener,
            config,
            output,
            locks: Arc::new(LockManager::new()),
            semaphore: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            default_mode,
            filter: UniqueIdFilter::accept_all(),
        })
    }

    /// Restricts template expansion to the given identifier subset.
    pub fn with_filter(mut self, filter: UniqueIdFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Runs the whole tree under `root` and returns every node's result.
    /// 运行 `root` 之下的整棵树并返回每个节点的结果。
    pub async fn execute(&self, root: &Arc<TestDescriptor>) -> Result<TestRun> {
        let results = Arc::new(Mutex::new(TestRun::default()));
        let root_ctx = ExecutionContext::root(
            root.clone(),
            self.listener.clone(),
            self.config.clone(),
            self.output.clone(),
        );
        self.clone()
            .execute_node(root.clone(), root_ctx, results.clone(), false)
            .await;

        match Arc::try_unwrap(results) {
            Ok(mutex) => Ok(mutex.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner())),
            Err(_) => bail!("result sink still shared after the run completed"),
        }
    }

    /// A node's effective mode: its own declaration, else the nearest
    /// ancestor's default for descendants, else the configured default.
    fn effective_mode(&self, node: &Arc<TestDescriptor>) -> ExecutionMode {
        if let Some(mode) = node.execution_mode() {
            return mode;
        }
        node.ancestors()
            .iter()
            .find_map(|ancestor| ancestor.default_child_mode())
            .unwrap_or(self.default_mode)
    }

    /// Runs one node end to end. `pinned` marks a lock-holding subtree:
    /// everything inside it runs inline on the current task and acquires no
    /// further locks or pool permits, which keeps lock acquisition
    /// deadlock-free.
    ///
    /// 端到端运行一个节点。`pinned` 标记持锁子树：其内部的一切都在当前任务上
    /// 内联运行，不再获取任何锁或池许可，从而使锁获取无死锁。
    fn execute_node(
        self,
        descriptor: Arc<TestDescriptor>,
        parent: Arc<ExecutionContext>,
        results: Arc<Mutex<TestRun>>,
        pinned: bool,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let ctx = match node::prepare(&descriptor, &parent) {
                Ok(ctx) => ctx,
                Err(error) => {
                    // A node that cannot even prepare still appears in the
                    // event stream as started-then-failed.
                    self.listener.execution_started(&descriptor);
                    let result = ExecutionResult::Failed {
                        message: format!("{error:#}"),
                        suppressed: Vec::new(),
                    };
                    self.listener.execution_finished(&descriptor, &result);
                    record(&results, &descriptor, result);
                    return;
                }
            };

            if let SkipStatus::Skip { reason } = node::should_be_skipped(&ctx) {
                self.listener.execution_skipped(&descriptor, &reason);
                // An unrecoverable close failure must still reach the result.
                if let Err(error) = node::clean_up(&ctx) {
                    ctx.collector().record(error);
                }
                let result = match ctx.collector().take_failure() {
                    Some(failure) => ExecutionResult::from_failure(failure),
                    None => ExecutionResult::Skipped { reason },
                };
                record(&results, &descriptor, result);
                return;
            }

            self.listener.execution_started(&descriptor);

            // Leaves queue for a pool permit before touching any lock, so a
            // lock holder is always a task that can run to completion.
            let is_leaf = matches!(descriptor.behavior, NodeBehavior::Test { .. });
            let _permit = if !pinned && is_leaf {
                self.semaphore.clone().acquire_owned().await.ok()
            } else {
                None
            };

            let lock_set = if pinned {
                Vec::new()
            } else {
                resources::lock_acquisition_for(&descriptor)
            };
            let _guards = if lock_set.is_empty() {
                None
            } else {
                Some(self.locks.acquire(&lock_set).await)
            };
            let pin_children = pinned || !lock_set.is_empty();

            let result = self
                .run_protocol(&descriptor, &ctx, &results, pin_children)
                .await;
            self.listener.execution_finished(&descriptor, &result);
            record(&results, &descriptor, result);
        })
    }

    /// before → execute → after → clean_up, with the guarantee that a
    /// failure in any step never prevents the later cleanup steps. Only an
    /// unrecoverable failure short-circuits.
    async fn run_protocol(
        &self,
        descriptor: &Arc<TestDescriptor>,
        ctx: &Arc<ExecutionContext>,
        results: &Arc<Mutex<TestRun>>,
        pinned: bool,
    ) -> ExecutionResult {
        let mut fatal: Option<anyhow::Error> = None;

        if let Err(error) = node::before(descriptor, ctx) {
            fatal = Some(error);
        }

        // Children run only when the node's own setup fully succeeded.
        if fatal.is_none() && ctx.collector().is_empty() {
            match &descriptor.behavior {
                NodeBehavior::Test { .. } => {
                    if let Err(error) = node::execute_test(descriptor, ctx) {
                        fatal = Some(error);
                    }
                }
                NodeBehavior::Template { .. } => {
                    if let Err(error) = self.execute_template(descriptor, ctx, results, pinned).await
                    {
                        ctx.collector().record(error);
                    }
                }
                NodeBehavior::Container { .. } | NodeBehavior::Invocation { .. } => {
                    self.execute_children(descriptor, ctx, results, pinned).await;
                }
            }
        }

        if fatal.is_none() {
            if let Err(error) = node::after(descriptor, ctx) {
                fatal = Some(error);
            }
        }
        // Cleanup always runs, even after an unrecoverable failure.
        if let Err(error) = node::clean_up(ctx) {
            fatal.get_or_insert(error);
        }

        if let Some(error) = fatal {
            let mut suppressed = Vec::new();
            if let Some(collected) = ctx.collector().take_failure() {
                suppressed.push(collected.primary_message());
                suppressed.extend(collected.suppressed_messages());
            }
            return ExecutionResult::Failed {
                message: format!("{error:#}"),
                suppressed,
            };
        }
        match ctx.collector().take_failure() {
            Some(failure) => ExecutionResult::from_failure(failure),
            None => ExecutionResult::Successful,
        }
    }

    /// Runs a container's statically known children: concurrent ones
    /// through the bounded pool, same-thread ones inline in declaration
    /// order, both groups making progress together.
    /// 运行容器静态已知的子节点：并发的走有界池，
    /// 同线程的按声明顺序内联运行，两组同时推进。
    async fn execute_children(
        &self,
        descriptor: &Arc<TestDescriptor>,
        ctx: &Arc<ExecutionContext>,
        results: &Arc<Mutex<TestRun>>,
        pinned: bool,
    ) {
        let mut sequential = Vec::new();
        let mut concurrent = Vec::new();
        for child in descriptor.children() {
            if pinned || self.effective_mode(&child) == ExecutionMode::SameThread {
                sequential.push(child);
            } else {
                concurrent.push(child);
            }
        }

        let spawned: Vec<_> = concurrent
            .into_iter()
            .map(|child| {
                let executor = self.clone();
                let parent = ctx.clone();
                let results = results.clone();
                async move {
                    let _ = tokio::spawn(executor.execute_node(child, parent, results, false)).await;
                }
            })
            .collect();
        let concurrent_work = futures::stream::iter(spawned)
            .buffer_unordered(self.parallelism)
            .for_each(|()| async {});

        let sequential_work = async {
            for child in sequential {
                self.clone()
                    .execute_node(child, ctx.clone(), results.clone(), pinned)
                    .await;
            }
        };

        futures::join!(concurrent_work, sequential_work);
    }

    /// Expands a template and runs every produced child, barriering on all
    /// dynamically spawned children before returning so the template's
    /// `after` step observes a quiet subtree.
    /// 展开模板并运行每个生成的子节点，在返回前对所有动态派生的子节点设置屏障，
    /// 使模板的 `after` 步骤观察到一个安静的子树。
    async fn execute_template(
        &self,
        descriptor: &Arc<TestDescriptor>,
        ctx: &Arc<ExecutionContext>,
        results: &Arc<Mutex<TestRun>>,
        pinned: bool,
    ) -> Result<()> {
        let tracker = TaskTracker::new();
        let mut sequential = Vec::new();

        let expansion = expand_template(descriptor, ctx, &self.filter, |child| {
            if !pinned && self.effective_mode(&child) == ExecutionMode::Concurrent {
                let _ = tracker.spawn(self.clone().execute_node(
                    child,
                    ctx.clone(),
                    results.clone(),
                    false,
                ));
            } else {
                sequential.push(child);
            }
            Ok(())
        });

        for child in sequential {
            self.clone()
                .execute_node(child, ctx.clone(), results.clone(), pinned)
                .await;
        }
        tracker.close();
        tracker.wait().await;
        expansion
    }
}

fn record(results: &Arc<Mutex<TestRun>>, descriptor: &Arc<TestDescriptor>, result: ExecutionResult) {
    results
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .record(descriptor.id().clone(), result);
}
