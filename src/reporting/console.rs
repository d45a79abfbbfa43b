//! # Console Listener Module / 控制台监听器模块
//!
//! A colored, line-per-event listener in the same console idiom the rest of
//! the project's tooling uses: blue for progress, green for success, yellow
//! for skips, red for failures.
//!
//! 带颜色、每事件一行的监听器，与项目其余工具使用相同的控制台风格：
//! 蓝色表示进行中，绿色表示成功，黄色表示跳过，红色表示失败。

use colored::*;
use std::path::Path;

use crate::core::descriptor::{NodeKind, TestDescriptor};
use crate::core::models::{ExecutionResult, RunSummary};
use crate::reporting::listener::{ExecutionListener, ReportEntry};

/// Prints each execution event as one colored console line.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleListener {
    /// Also echo published report entries and file artifacts.
    /// 同时回显发布的报告条目与文件产物。
    pub verbose: bool,
}

impl ConsoleListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verbose() -> Self {
        Self { verbose: true }
    }

    fn label(descriptor: &TestDescriptor) -> String {
        match descriptor.kind() {
            NodeKind::Container => format!("[{}]", descriptor.display_name()),
            NodeKind::Test => descriptor.display_name().to_string(),
        }
    }
}

impl ExecutionListener for ConsoleListener {
    fn execution_started(&self, descriptor: &TestDescriptor) {
        println!("{} {}", "Running".blue(), Self::label(descriptor));
    }

    fn execution_skipped(&self, descriptor: &TestDescriptor, reason: &str) {
        println!(
            "{} {} ({})",
            "Skipped".yellow(),
            Self::label(descriptor),
            reason
        );
    }

    fn execution_finished(&self, descriptor: &TestDescriptor, result: &ExecutionResult) {
        match result {
            ExecutionResult::Successful => {
                println!("{} {}", "Passed ".green(), Self::label(descriptor));
            }
            ExecutionResult::Skipped { reason } => {
                println!(
                    "{} {} ({})",
                    "Skipped".yellow(),
                    Self::label(descriptor),
                    reason
                );
            }
            ExecutionResult::Failed {
                message,
                suppressed,
            } => {
                println!("{} {}", "Failed ".red(), Self::label(descriptor));
                println!("  {}", message.red());
                for extra in suppressed {
                    println!("  {} {}", "suppressed:".red().dimmed(), extra);
                }
            }
        }
    }

    fn dynamic_test_registered(&self, descriptor: &TestDescriptor) {
        println!("{} {}", "Registered".cyan(), Self::label(descriptor));
    }

    fn reporting_entry_published(&self, descriptor: &TestDescriptor, entry: &ReportEntry) {
        if !self.verbose {
            return;
        }
        let rendered = entry
            .values
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{} {}: {}",
            "Report".cyan(),
            descriptor.display_name(),
            rendered
        );
    }

    fn file_entry_published(&self, descriptor: &TestDescriptor, path: &Path) {
        if !self.verbose {
            return;
        }
        println!(
            "{} {}: {}",
            "Artifact".cyan(),
            descriptor.display_name(),
            path.display()
        );
    }
}

/// Prints the end-of-run summary line.
/// 打印运行结束的摘要行。
pub fn print_summary(summary: &RunSummary) {
    println!(
        "\n{} {} passed, {} skipped, {} failed ({} total)",
        "Summary:".bold(),
        summary.passed.to_string().green(),
        summary.skipped.to_string().yellow(),
        summary.failed.to_string().red(),
        summary.total()
    );
}
