//! Tests for tasklet steps.

use ironbatch::testing::{FailingResource, ScriptedStore, ScriptedTransaction};
use ironbatch::{BatchError, Step, StepState, TaskletStep};

#[test]
fn test_non_transactional_tasklet() {
    let tasklet = FailingResource::new();
    let mut step = TaskletStep::builder()
        .name("plain")
        .transactional(false)
        .tasklet(tasklet.clone())
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert!(!step.is_transactional());
    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.committed(), 0);
    assert!(status.failures().is_empty());
    assert_eq!(tasklet.opens(), 1);
    assert_eq!(tasklet.executions(), 1);
    assert_eq!(tasklet.closes(), 1);
}

#[test]
fn test_transactional_tasklet_counts_one_commit() {
    let tx = ScriptedTransaction::new();
    let mut step = TaskletStep::builder()
        .name("transactional")
        .tasklet(FailingResource::new())
        .transaction(tx.clone())
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert!(step.is_transactional());
    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.committed(), 1);
    assert!(status.end_time().is_some());
    assert_eq!(tx.begins(), 1);
    assert_eq!(tx.commits(), 1);
}

#[test]
fn test_execute_error_rolls_back() {
    let tasklet = FailingResource::new().fail_execute();
    let tx = ScriptedTransaction::new();
    let mut step = TaskletStep::builder()
        .name("failing")
        .throw_errors(false)
        .tasklet(tasklet.clone())
        .transaction(tx.clone())
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.committed(), 0);
    assert_eq!(status.failures().len(), 1);
    assert!(matches!(&*status.failures()[0], BatchError::Resource { resource: "tasklet", .. }));
    assert_eq!(tasklet.closes(), 1);
    assert_eq!(tx.rollbacks(), 1);
    assert_eq!(tx.commits(), 0);
}

#[test]
fn test_execute_error_without_transaction() {
    let mut step = TaskletStep::builder()
        .name("failing")
        .throw_errors(false)
        .transactional(false)
        .tasklet(FailingResource::new().fail_execute())
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.failures().len(), 1);
}

#[test]
fn test_commit_error_undoes_the_commit() {
    let mut step = TaskletStep::builder()
        .name("commit-error")
        .throw_errors(false)
        .tasklet(FailingResource::new())
        .transaction(ScriptedTransaction::new().fail_commit_at(1))
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.committed(), 0);
    assert!(matches!(&*status.failures()[0], BatchError::Transaction { action: "commit", .. }));
}

#[test]
fn test_begin_error_skips_the_tasklet() {
    let tasklet = FailingResource::new();
    let mut step = TaskletStep::builder()
        .name("begin-error")
        .throw_errors(false)
        .tasklet(tasklet.clone())
        .transaction(ScriptedTransaction::new().fail_begin_at(1))
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(tasklet.executions(), 0);
    assert_eq!(status.failures().len(), 1);
}

#[test]
fn test_unpersistable_failure_is_critical() {
    let mut step = TaskletStep::builder()
        .name("critical")
        .throw_errors(false)
        .transactional(false)
        .tasklet(FailingResource::new())
        .store(ScriptedStore::new().fail_from(1))
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::CriticalFailed);
    assert_eq!(status.failures().len(), 2);
}

#[test]
fn test_failure_is_thrown_by_default() {
    let mut step = TaskletStep::builder()
        .name("thrown")
        .tasklet(FailingResource::new().fail_execute())
        .build()
        .unwrap();

    let err = step.execute().unwrap_err();

    assert_eq!(err.status().map(|s| s.state()), Some(StepState::Failed));
    assert_eq!(step.status().state(), StepState::Failed);
}

#[test]
fn test_builder_validation() {
    let missing = TaskletStep::builder().name("missing").build();
    assert!(matches!(missing, Err(BatchError::Validation(_))));

    let conflicting = TaskletStep::builder()
        .name("conflicting")
        .transactional(false)
        .tasklet(FailingResource::new())
        .transaction(ScriptedTransaction::new())
        .build();
    assert!(matches!(conflicting, Err(BatchError::Validation(_))));
}
