//! # Collector Module Unit Tests / Collector 模块单元测试
//!
//! This module contains unit tests for the `collector.rs` module, testing
//! failure aggregation, the severity policy, and panic conversion.
//!
//! 此模块包含 `collector.rs` 模块的单元测试，
//! 测试失败聚合、严重性策略和 panic 转换。

use anyhow::anyhow;
use hierarchy_runner::core::collector::{FatalError, ThrowableCollector};

#[test]
fn first_failure_becomes_primary_later_ones_are_suppressed() {
    let collector = ThrowableCollector::default();
    collector.execute(|| Err(anyhow!("first"))).unwrap();
    collector.execute(|| Err(anyhow!("second"))).unwrap();
    collector.execute(|| Err(anyhow!("third"))).unwrap();

    let failure = collector.take_failure().unwrap();
    assert_eq!(failure.primary.to_string(), "first");
    assert_eq!(failure.suppressed.len(), 2);
}

#[test]
fn unrecoverable_failure_replaces_primary() {
    let collector = ThrowableCollector::default();
    collector.record(anyhow!("ordinary"));
    collector.record(anyhow::Error::new(FatalError::new("out of memory")));

    let failure = collector.take_failure().unwrap();
    assert!(failure.primary.to_string().contains("out of memory"));
    assert_eq!(failure.suppressed.len(), 1);
    assert_eq!(failure.suppressed[0].to_string(), "ordinary");
}

#[test]
fn unrecoverable_failure_is_never_collected_by_execute() {
    let collector = ThrowableCollector::default();
    let result = collector.execute(|| Err(anyhow::Error::new(FatalError::new("abort"))));
    assert!(result.is_err());
    assert!(collector.is_empty());
}

#[test]
fn panics_are_converted_into_collected_failures() {
    let collector = ThrowableCollector::default();
    collector
        .execute(|| panic!("boom in a callback"))
        .unwrap();

    let failure = collector.take_failure().unwrap();
    assert!(failure.primary.to_string().contains("boom in a callback"));
}

#[test]
fn emptiness_is_checkable_without_raising() {
    let collector = ThrowableCollector::default();
    assert!(collector.is_empty());
    assert!(collector.assert_empty().is_ok());

    collector.record(anyhow!("kept"));
    assert!(!collector.is_empty());
    assert!(collector.assert_empty().is_err());
}
