//! Integration tests for the node lifecycle: callback ordering, setup
//! failure semantics, shared instances, and deterministic store teardown.

mod common;

use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{LifecycleProbe, RecordingListener, entries, executor, executor_with, new_log};
use hierarchy_runner::core::config::{ConfigurationParameters, DEFAULT_LIFECYCLE_KEY};
use hierarchy_runner::core::context::ExecutionContext;
use hierarchy_runner::core::descriptor::{Lifecycle, TestDescriptorBuilder, UniqueId};
use hierarchy_runner::core::extension::{
    BeforeAllCallback, ConditionResult, ExecutionCondition, Extension, InstanceFactory,
};
use hierarchy_runner::core::store::{CloseableResource, Namespace};

#[tokio::test]
async fn callbacks_wrap_the_subtree_in_declaration_order() {
    let log = new_log();
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite")
        .with_extension(LifecycleProbe::quiet("probe", log.clone()))
        .build();
    for name in ["a", "b"] {
        let body_log = log.clone();
        let leaf = TestDescriptorBuilder::test(root.id().child("test", name), name, move |_| {
            body_log.lock().unwrap().push(format!("body:{name}"));
            Ok(())
        })
        .build();
        root.add_child(leaf).unwrap();
    }

    let run = executor().execute(&root).await.unwrap();
    assert!(run.all_successful());
    assert_eq!(
        entries(&log),
        vec![
            "before_all:probe",
            "before_each:probe",
            "body:a",
            "after_each:probe",
            "before_each:probe",
            "body:b",
            "after_each:probe",
            "after_all:probe",
        ]
    );
}

#[tokio::test]
async fn a_before_all_failure_runs_no_tests_but_still_tears_down() {
    let log = new_log();
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite")
        .with_extension(Arc::new(LifecycleProbe {
            name: "probe",
            log: log.clone(),
            fail_before_all: true,
        }))
        .build();
    let body_log = log.clone();
    let leaf = TestDescriptorBuilder::test(root.id().child("test", "only"), "only", move |_| {
        body_log.lock().unwrap().push("body:only".into());
        Ok(())
    })
    .build();
    root.add_child(leaf.clone()).unwrap();

    let run = executor().execute(&root).await.unwrap();

    let container_result = run.result_of(root.id()).unwrap();
    assert!(container_result.is_failure());
    // The leaf never started, so it reports no result of its own.
    assert!(run.result_of(leaf.id()).is_none());

    let log = entries(&log);
    assert!(!log.iter().any(|line| line.starts_with("body:")));
    assert!(log.contains(&"after_all:probe".to_string()));
}

struct StoredHandle {
    closes: Arc<AtomicUsize>,
}

impl CloseableResource for StoredHandle {
    fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct HandleInstaller {
    closes: Arc<AtomicUsize>,
}

impl Extension for HandleInstaller {
    fn id(&self) -> &'static str {
        "handle-installer"
    }

    fn as_before_all(&self) -> Option<&dyn BeforeAllCallback> {
        Some(self)
    }
}

impl BeforeAllCallback for HandleInstaller {
    fn before_all(&self, context: &ExecutionContext) -> Result<()> {
        context.store().put_resource(
            Namespace::engine(),
            "handle",
            Arc::new(StoredHandle {
                closes: self.closes.clone(),
            }),
        )
    }
}

#[tokio::test]
async fn stored_resources_are_released_exactly_once_when_the_scope_ends() {
    let closes = Arc::new(AtomicUsize::new(0));
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite")
        .with_extension(Arc::new(HandleInstaller {
            closes: closes.clone(),
        }))
        .build();
    let leaf =
        TestDescriptorBuilder::test(root.id().child("test", "only"), "only", |_| Ok(())).build();
    root.add_child(leaf).unwrap();

    let run = executor().execute(&root).await.unwrap();
    assert!(run.all_successful());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn published_entries_and_files_reach_the_listener() {
    let listener = RecordingListener::new();
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite").build();
    let leaf = TestDescriptorBuilder::test(root.id().child("test", "probe"), "probe", |ctx| {
        let mut values = std::collections::BTreeMap::new();
        values.insert("phase".to_string(), "run".to_string());
        ctx.publish_entry(values);

        let path = ctx.publish_file("notes.txt", |target| {
            std::fs::write(target, "captured").map_err(Into::into)
        })?;
        anyhow::ensure!(path.is_file(), "published artifact must exist on disk");
        Ok(())
    })
    .build();
    root.add_child(leaf).unwrap();

    let run = executor_with(Arc::new(listener.clone()), ConfigurationParameters::empty())
        .execute(&root)
        .await
        .unwrap();

    assert!(run.all_successful());
    let events = listener.events();
    assert!(events.contains(&"entry probe phase=run".to_string()));
    assert!(events.contains(&"artifact probe notes.txt".to_string()));
}

struct AlwaysDisabled;

impl Extension for AlwaysDisabled {
    fn id(&self) -> &'static str {
        "always-disabled"
    }

    fn as_condition(&self) -> Option<&dyn ExecutionCondition> {
        Some(self)
    }
}

impl ExecutionCondition for AlwaysDisabled {
    fn evaluate(&self, _context: &ExecutionContext) -> ConditionResult {
        ConditionResult::disabled("turned off for this platform")
    }
}

#[tokio::test]
async fn a_disabled_leaf_is_skipped_without_running_any_callback() {
    let log = new_log();
    let listener = RecordingListener::new();
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite")
        .with_extension(LifecycleProbe::quiet("probe", log.clone()))
        .build();
    let body_log = log.clone();
    let skipped = TestDescriptorBuilder::test(root.id().child("test", "off"), "off", move |_| {
        body_log.lock().unwrap().push("body:off".into());
        Ok(())
    })
    .with_extension(Arc::new(AlwaysDisabled))
    .build();
    root.add_child(skipped.clone()).unwrap();

    let run = executor_with(Arc::new(listener.clone()), ConfigurationParameters::empty())
        .execute(&root)
        .await
        .unwrap();

    assert!(run.result_of(skipped.id()).unwrap().is_skipped());
    let log = entries(&log);
    assert!(!log.contains(&"body:off".to_string()));
    assert!(!log.contains(&"before_each:probe".to_string()));
    assert!(
        listener
            .events()
            .contains(&"skipped off (turned off for this platform)".to_string())
    );
}

struct CountingFactory {
    created: Arc<AtomicUsize>,
}

impl Extension for CountingFactory {
    fn id(&self) -> &'static str {
        "counting-factory"
    }

    fn as_instance_factory(&self) -> Option<&dyn InstanceFactory> {
        Some(self)
    }
}

impl InstanceFactory for CountingFactory {
    fn create_instance(
        &self,
        _context: &ExecutionContext,
    ) -> Result<Arc<dyn std::any::Any + Send + Sync>> {
        let number = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(number))
    }
}

fn instance_counting_tree(lifecycle: Lifecycle, created: &Arc<AtomicUsize>) -> Arc<hierarchy_runner::core::descriptor::TestDescriptor> {
    let root = TestDescriptorBuilder::container_with_lifecycle(
        UniqueId::root("engine", "run"),
        "suite",
        lifecycle,
    )
    .with_extension(Arc::new(CountingFactory {
        created: created.clone(),
    }))
    .build();
    for name in ["a", "b"] {
        let leaf = TestDescriptorBuilder::test(root.id().child("test", name), name, |ctx| {
            ctx.test_instance()?;
            Ok(())
        })
        .build();
        root.add_child(leaf).unwrap();
    }
    root
}

#[tokio::test]
async fn per_container_lifecycle_shares_one_instance_across_leaves() {
    let created = Arc::new(AtomicUsize::new(0));
    let root = instance_counting_tree(Lifecycle::PerContainer, &created);
    let run = executor().execute(&root).await.unwrap();
    assert!(run.all_successful());
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn per_unit_lifecycle_creates_a_fresh_instance_per_leaf() {
    let created = Arc::new(AtomicUsize::new(0));
    let root = instance_counting_tree(Lifecycle::PerUnit, &created);
    let run = executor().execute(&root).await.unwrap();
    assert!(run.all_successful());
    assert_eq!(created.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn the_configured_default_lifecycle_applies_to_undeclared_containers() {
    let created = Arc::new(AtomicUsize::new(0));
    // No lifecycle on the container itself; configuration supplies it.
    let root = TestDescriptorBuilder::container(UniqueId::root("engine", "run"), "suite")
        .with_extension(Arc::new(CountingFactory {
            created: created.clone(),
        }))
        .build();
    for name in ["a", "b"] {
        let leaf = TestDescriptorBuilder::test(root.id().child("test", name), name, |ctx| {
            ctx.test_instance()?;
            Ok(())
        })
        .build();
        root.add_child(leaf).unwrap();
    }

    let config =
        ConfigurationParameters::from_pairs([(DEFAULT_LIFECYCLE_KEY, "per_container")]);
    let run = executor_with(
        Arc::new(hierarchy_runner::reporting::listener::NoopListener),
        config,
    )
    .execute(&root)
    .await
    .unwrap();
    assert!(run.all_successful());
    assert_eq!(created.load(Ordering::SeqCst), 1);
}
