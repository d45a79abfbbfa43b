// Shared test helpers for integration tests
use anyhow::{Result, anyhow};
use std::path::Path;
use std::sync::{Arc, Mutex};

use hierarchy_runner::core::config::ConfigurationParameters;
use hierarchy_runner::core::context::ExecutionContext;
use hierarchy_runner::core::descriptor::TestDescriptor;
use hierarchy_runner::core::execution::HierarchicalExecutor;
use hierarchy_runner::core::extension::{
    AfterAllCallback, AfterEachCallback, BeforeAllCallback, BeforeEachCallback, Extension,
};
use hierarchy_runner::core::models::ExecutionResult;
use hierarchy_runner::infra::output::OutputDirProvider;
use hierarchy_runner::reporting::listener::{ExecutionListener, ReportEntry};

pub type Log = Arc<Mutex<Vec<String>>>;

pub fn new_log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// An executor over an empty configuration and a throwaway output root.
pub fn executor() -> HierarchicalExecutor {
    executor_with(
        Arc::new(hierarchy_runner::reporting::listener::NoopListener),
        ConfigurationParameters::empty(),
    )
}

pub fn executor_with(
    listener: Arc<dyn ExecutionListener>,
    config: ConfigurationParameters,
) -> HierarchicalExecutor {
    HierarchicalExecutor::new(
        listener,
        Arc::new(config),
        Arc::new(OutputDirProvider::temporary().expect("temporary output root")),
    )
    .expect("executor construction")
}

/// Records every listener event as one line, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct RecordingListener {
    events: Log,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        entries(&self.events)
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl ExecutionListener for RecordingListener {
    fn execution_started(&self, descriptor: &TestDescriptor) {
        self.push(format!("started {}", descriptor.display_name()));
    }

    fn execution_skipped(&self, descriptor: &TestDescriptor, reason: &str) {
        self.push(format!("skipped {} ({reason})", descriptor.display_name()));
    }

    fn execution_finished(&self, descriptor: &TestDescriptor, result: &ExecutionResult) {
        self.push(format!(
            "finished {} {}",
            descriptor.display_name(),
            result.status_str()
        ));
    }

    fn dynamic_test_registered(&self, descriptor: &TestDescriptor) {
        self.push(format!("registered {}", descriptor.display_name()));
    }

    fn reporting_entry_published(&self, descriptor: &TestDescriptor, entry: &ReportEntry) {
        let rendered = entry
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        self.push(format!("entry {} {rendered}", descriptor.display_name()));
    }

    fn file_entry_published(&self, descriptor: &TestDescriptor, path: &Path) {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        self.push(format!("artifact {} {file_name}", descriptor.display_name()));
    }
}

/// One extension implementing every lifecycle callback, logging each call.
pub struct LifecycleProbe {
    pub name: &'static str,
    pub log: Log,
    pub fail_before_all: bool,
}

impl LifecycleProbe {
    pub fn quiet(name: &'static str, log: Log) -> Arc<Self> {
        Arc::new(Self {
            name,
            log,
            fail_before_all: false,
        })
    }
}

impl Extension for LifecycleProbe {
    fn id(&self) -> &'static str {
        self.name
    }

    fn as_before_all(&self) -> Option<&dyn BeforeAllCallback> {
        Some(self)
    }

    fn as_after_all(&self) -> Option<&dyn AfterAllCallback> {
        Some(self)
    }

    fn as_before_each(&self) -> Option<&dyn BeforeEachCallback> {
        Some(self)
    }

    fn as_after_each(&self) -> Option<&dyn AfterEachCallback> {
        Some(self)
    }
}

impl BeforeAllCallback for LifecycleProbe {
    fn before_all(&self, _context: &ExecutionContext) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("before_all:{}", self.name));
        if self.fail_before_all {
            return Err(anyhow!("{} refused to set up", self.name));
        }
        Ok(())
    }
}

impl AfterAllCallback for LifecycleProbe {
    fn after_all(&self, _context: &ExecutionContext) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("after_all:{}", self.name));
        Ok(())
    }
}

impl BeforeEachCallback for LifecycleProbe {
    fn before_each(&self, _context: &ExecutionContext) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("before_each:{}", self.name));
        Ok(())
    }
}

impl AfterEachCallback for LifecycleProbe {
    fn after_each(&self, _context: &ExecutionContext) -> Result<()> {
        self.log
            .lock()
            .unwrap()
            .push(format!("after_each:{}", self.name));
        Ok(())
    }
}
