//! Tests for the fan-out chunk executor.
//!
//! Unless stated otherwise: two consumers, five items per consumer and
//! round, consumer 0 drops multiples of 4 and consumer 1 multiples of 3.

use ironbatch::testing::{ModuloFilter, NumberReader, RecordingWriter, ScriptedTransaction};
use ironbatch::{BatchError, ConsumerPhase, MultiChunkStep, MultiChunkStepBuilder, Step, StepState, StepStatus};
use mark_flaky_tests::flaky;
use std::time::{Duration, Instant};

fn two_consumers(name: &str) -> MultiChunkStepBuilder<u32, String> {
    MultiChunkStep::builder()
        .name(name)
        .consumers(2)
        .commit_interval(5)
        .throw_errors(false)
}

fn run(builder: MultiChunkStepBuilder<u32, String>) -> StepStatus {
    builder.build().unwrap().execute().unwrap()
}

fn standard(name: &str, reader: NumberReader) -> MultiChunkStepBuilder<u32, String> {
    two_consumers(name)
        .reader(reader)
        .processor(ModuloFilter::new(4))
        .writer(RecordingWriter::new())
        .processor(ModuloFilter::new(3))
        .writer(RecordingWriter::new())
}

fn assert_counts(status: &StepStatus, skipped: u64, written: u64, committed: u64) {
    assert_eq!(status.skipped(), skipped, "skipped");
    assert_eq!(status.written(), written, "written");
    assert_eq!(status.committed(), committed, "committed");
}

#[test]
fn test_exact_rounds() {
    let before = Instant::now();
    let tx = ScriptedTransaction::new();
    let status = run(standard("exact", NumberReader::new(20)).transaction(tx.clone()));

    assert_eq!(status.name(), "exact");
    assert_eq!(status.state(), StepState::Completed);
    assert!(status.init_time().unwrap() >= before);
    assert!(status.elapsed() >= status.last_elapsed());
    assert_eq!(status.read(), 20);
    assert_counts(&status, 5, 15, 4);
    assert!(status.failures().is_empty());
    assert_eq!(tx.commits(), 4);
    assert_eq!(tx.rollbacks(), 0);
}

#[test]
fn test_last_round_with_idle_consumer() {
    let status = run(standard("partial", NumberReader::new(23)));

    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.read(), 23);
    assert_counts(&status, 5, 18, 5);
    assert!(status.failures().is_empty());
}

#[test]
fn test_last_round_with_short_batch() {
    let status = run(standard("partial", NumberReader::new(27)));

    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.read(), 27);
    assert_counts(&status, 7, 20, 6);
    assert!(status.failures().is_empty());
}

#[test]
fn test_three_consumers_share_one_sink() {
    let sink = RecordingWriter::new();
    let status = run(
        MultiChunkStep::builder()
            .name("shared")
            .consumers(3)
            .commit_interval(5)
            .throw_errors(false)
            .reader(NumberReader::new(12))
            .processor(ModuloFilter::new(0))
            .processor(ModuloFilter::new(0))
            .processor(ModuloFilter::new(0))
            .writer(sink.clone())
            .writer(sink.clone())
            .writer(sink.clone()),
    );

    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.read(), 12);
    assert_counts(&status, 0, 12, 3);
    let mut items: Vec<u32> = sink.items().iter().map(|s| s.parse().unwrap()).collect();
    items.sort_unstable();
    assert_eq!(items, (1..=12).collect::<Vec<_>>());
}

#[test]
fn test_pass_through_consumers() {
    let sink = RecordingWriter::new();
    let mut step = MultiChunkStep::<u32, u32>::builder()
        .name("pass-through")
        .consumers(2)
        .commit_interval(4)
        .reader(NumberReader::new(10))
        .pass_through()
        .writer(sink.clone())
        .writer(sink.clone())
        .build()
        .unwrap();

    let status = step.execute().unwrap();

    assert_eq!(status.state(), StepState::Completed);
    assert_counts(&status, 0, 10, 3);
    assert_eq!(sink.items().len(), 10);
}

#[test]
fn test_read_error_in_first_round() {
    let status = run(standard("read-error", NumberReader::new(20).fail_at_read(7)));

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.read(), 0);
    assert_counts(&status, 0, 0, 0);
    assert_eq!(status.failures().len(), 2);
    assert!(matches!(&*status.failures()[0], BatchError::Producer(_)));
    assert!(matches!(&*status.failures()[1], BatchError::Pipeline(_)));
}

#[test]
fn test_read_error_in_second_round() {
    let status = run(standard("read-error", NumberReader::new(20).fail_at_read(13)));

    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.read(), 10);
    assert_counts(&status, 3, 7, 2);
    assert_eq!(status.failures().len(), 2);
}

#[test]
fn test_read_error_is_thrown_when_configured() {
    let err = standard("read-error", NumberReader::new(20).fail_at_read(7))
        .throw_errors(true)
        .build()
        .unwrap()
        .execute()
        .unwrap_err();

    let status = err.status().expect("failed status");
    assert_eq!(status.state(), StepState::Failed);
    assert_eq!(status.failures().len(), 2);
}

#[test]
fn test_process_error_in_second_consumer_keeps_first_commit() {
    let status = run(
        two_consumers("process-error")
            .reader(NumberReader::new(20))
            .processor(ModuloFilter::new(4))
            .writer(RecordingWriter::new())
            .processor(ModuloFilter::new(3).fail_at_call(2))
            .writer(RecordingWriter::new()),
    );

    assert_eq!(status.state(), StepState::Failed);
    assert!(status.read() >= 10);
    assert_counts(&status, 1, 4, 1);
    assert_eq!(status.failures().len(), 2);
    assert!(matches!(
        &*status.failures()[0],
        BatchError::Consumer {
            index: 1,
            phase: ConsumerPhase::Process,
            ..
        }
    ));
}

#[test]
fn test_process_error_in_first_consumer_rolls_back_the_round() {
    let tx = ScriptedTransaction::new();
    let status = run(
        two_consumers("process-error")
            .reader(NumberReader::new(20))
            .processor(ModuloFilter::new(4).fail_at_call(2))
            .writer(RecordingWriter::new())
            .processor(ModuloFilter::new(3))
            .writer(RecordingWriter::new())
            .transaction(tx.clone()),
    );

    assert_eq!(status.state(), StepState::Failed);
    assert!(status.read() >= 10);
    assert_counts(&status, 0, 0, 0);
    assert_eq!(status.failures().len(), 2);
    assert_eq!(tx.commits(), 0);
    assert_eq!(tx.rollbacks(), 2);
}

#[flaky]
#[test]
fn test_handshake_timeout_fails_the_step() {
    let status = run(
        two_consumers("timeout")
            .wait_timeout_secs(1)
            .reader(NumberReader::new(20))
            .processor(ModuloFilter::new(4))
            .writer(RecordingWriter::new().item_delay(Duration::from_millis(600)))
            .processor(ModuloFilter::new(3))
            .writer(RecordingWriter::new()),
    );

    assert_eq!(status.state(), StepState::Failed);
    assert!(status.read() >= 10);
    assert_counts(&status, 0, 0, 0);
    assert!(status.failures().len() >= 2);
    assert!(status.failures().iter().any(|f| f.is_handshake()));
}

#[test]
fn test_begin_error_in_first_consumer() {
    let tx = ScriptedTransaction::new().fail_begin_at(1);
    let status = run(standard("begin-error", NumberReader::new(20)).transaction_with(move |index| {
        let tx = tx.clone();
        if index == 1 { tx.begin_delay(Duration::from_millis(500)) } else { tx }
    }));

    assert_eq!(status.state(), StepState::Failed);
    assert_counts(&status, 0, 0, 0);
    assert_eq!(status.failures().len(), 2);
    assert!(matches!(
        &*status.failures()[0],
        BatchError::Consumer {
            index: 0,
            phase: ConsumerPhase::Preprocess,
            ..
        }
    ));
}

#[test]
fn test_begin_error_in_second_consumer() {
    let tx = ScriptedTransaction::new().fail_begin_at(1);
    let status = run(standard("begin-error", NumberReader::new(20)).transaction_with(move |index| {
        let tx = tx.clone();
        if index == 0 { tx.begin_delay(Duration::from_millis(500)) } else { tx }
    }));

    assert_eq!(status.state(), StepState::Failed);
    assert_counts(&status, 1, 4, 1);
    assert_eq!(status.failures().len(), 2);
}

#[test]
fn test_first_commit_error() {
    let status = run(standard("commit-error", NumberReader::new(20)).transaction(ScriptedTransaction::new().fail_commit_at(1)));

    assert_eq!(status.state(), StepState::Failed);
    assert!(status.read() >= 10);
    assert_counts(&status, 0, 0, 0);
    assert_eq!(status.failures().len(), 2);
    assert!(matches!(
        &*status.failures()[0],
        BatchError::Consumer {
            index: 0,
            phase: ConsumerPhase::Commit,
            ..
        }
    ));
}

#[test]
fn test_second_commit_error() {
    let status = run(standard("commit-error", NumberReader::new(20)).transaction(ScriptedTransaction::new().fail_commit_at(2)));

    assert_eq!(status.state(), StepState::Failed);
    assert_counts(&status, 1, 4, 1);
    assert_eq!(status.failures().len(), 2);
}

#[test]
fn test_rollback_error_after_first_consumer_fails() {
    let status = run(
        two_consumers("rollback-error")
            .transaction(ScriptedTransaction::new().fail_rollback_at(1))
            .reader(NumberReader::new(20))
            .processor(ModuloFilter::new(4).fail_at_call(2))
            .writer(RecordingWriter::new())
            .processor(ModuloFilter::new(3))
            .writer(RecordingWriter::new()),
    );

    assert_eq!(status.state(), StepState::Failed);
    assert_counts(&status, 0, 0, 0);
    assert_eq!(status.failures().len(), 3);
}

#[test]
fn test_rollback_error_after_second_consumer_fails() {
    let status = run(
        two_consumers("rollback-error")
            .transaction(ScriptedTransaction::new().fail_rollback_at(1))
            .reader(NumberReader::new(20))
            .processor(ModuloFilter::new(4))
            .writer(RecordingWriter::new())
            .processor(ModuloFilter::new(3).fail_at_call(2))
            .writer(RecordingWriter::new()),
    );

    assert_eq!(status.state(), StepState::Failed);
    assert_counts(&status, 1, 4, 1);
    assert_eq!(status.failures().len(), 3);
}

#[test]
fn test_builder_rejects_mismatched_consumers() {
    let too_few_writers = two_consumers("invalid")
        .reader(NumberReader::new(1))
        .processor(ModuloFilter::new(4))
        .processor(ModuloFilter::new(3))
        .writer(RecordingWriter::new())
        .build();
    assert!(matches!(too_few_writers, Err(BatchError::Validation(_))));

    let too_many_processors = two_consumers("invalid")
        .reader(NumberReader::new(1))
        .processor(ModuloFilter::new(4))
        .processor(ModuloFilter::new(3))
        .processor(ModuloFilter::new(2))
        .writer(RecordingWriter::new())
        .writer(RecordingWriter::new())
        .build();
    assert!(matches!(too_many_processors, Err(BatchError::Validation(_))));

    let no_reader = two_consumers("invalid")
        .processor(ModuloFilter::new(4))
        .processor(ModuloFilter::new(3))
        .writer(RecordingWriter::new())
        .writer(RecordingWriter::new())
        .build();
    assert!(matches!(no_reader, Err(BatchError::Validation(_))));
}

#[test]
fn test_rerun_gives_identical_counters() {
    let mut step = standard("rerun", NumberReader::new(27)).build().unwrap();

    let first = step.execute().unwrap();
    let second = step.execute().unwrap();

    assert_eq!(first.read(), 27);
    assert_counts(&first, 7, 20, 6);
    assert_eq!(second.state(), StepState::Completed);
    assert!(second.failures().is_empty());
    assert_eq!(second.read(), first.read());
    assert_counts(&second, first.skipped(), first.written(), first.committed());
}

#[test]
fn test_every_item_is_read_for_any_layout() {
    for consumers in 1..=4 {
        for commit_interval in 1..=4 {
            for n in 0..=25u32 {
                let sink = RecordingWriter::new();
                let mut builder = MultiChunkStep::builder()
                    .name("sweep")
                    .consumers(consumers)
                    .commit_interval(commit_interval)
                    .reader(NumberReader::new(n));
                for _ in 0..consumers {
                    builder = builder.processor(ModuloFilter::new(0)).writer(sink.clone());
                }

                let status = run(builder);

                let case = format!("consumers {consumers}, commit_interval {commit_interval}, n {n}");
                assert_eq!(status.state(), StepState::Completed, "{case}");
                assert_eq!(status.read(), u64::from(n), "{case}");
                assert_eq!(status.written(), u64::from(n), "{case}");
                // every non-empty batch is one committed chunk
                assert_eq!(status.committed(), (n as usize).div_ceil(commit_interval) as u64, "{case}");
                let mut items: Vec<u32> = sink.items().iter().map(|s| s.parse().unwrap()).collect();
                items.sort_unstable();
                assert_eq!(items, (1..=n).collect::<Vec<_>>(), "{case}");
            }
        }
    }
}

#[test]
fn test_huge_commit_interval() {
    let status = run(
        MultiChunkStep::builder()
            .name("huge")
            .consumers(2)
            .commit_interval(usize::MAX / 2)
            .reader(NumberReader::new(7))
            .processor(ModuloFilter::new(0))
            .writer(RecordingWriter::new())
            .processor(ModuloFilter::new(0))
            .writer(RecordingWriter::new()),
    );

    assert_eq!(status.state(), StepState::Completed);
    assert_eq!(status.read(), 7);
    assert_counts(&status, 0, 7, 1);
}

#[test]
fn test_builder_rejects_overflowing_round_size() {
    let result = MultiChunkStep::<u32, String>::builder()
        .name("overflow")
        .consumers(2)
        .commit_interval(usize::MAX / 2 + 1)
        .reader(NumberReader::new(3))
        .processor(ModuloFilter::new(0))
        .writer(RecordingWriter::new())
        .processor(ModuloFilter::new(0))
        .writer(RecordingWriter::new())
        .build();

    assert!(matches!(result, Err(BatchError::Validation(_))));
}
