//! Job runner.
//!
//! A [`Job`] is arbitrary user code, typically a sequence of steps. The
//! [`JobRunner`] times one run, logs its failures and reports the outcome
//! without propagating it.

use crate::error::BatchError;
use crate::status::StepStatus;
use crate::step::Step;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, info_span};

pub trait Job: Send {
    fn name(&self) -> &str;

    /// # Errors
    ///
    /// Returns any error that should mark the run as failed. A step failure
    /// surfaces as a [`BatchError::StepExecution`].
    fn run(&mut self) -> anyhow::Result<()>;
}

/// How a job run ended.
#[derive(Debug)]
pub enum JobOutcome {
    Completed,
    /// A step ended in a failed state; carries its final status.
    StepFailed(Box<StepStatus>),
    Failed(anyhow::Error),
}

#[derive(Debug)]
pub struct JobReport {
    pub run_id: u64,
    pub name: String,
    pub elapsed: Duration,
    pub outcome: JobOutcome,
}

impl JobReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Completed)
    }
}

/// Runs jobs and numbers the runs, starting at 1.
#[derive(Debug, Default)]
pub struct JobRunner {
    last_run: AtomicU64,
}

impl JobRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, job: &mut dyn Job) -> JobReport {
        let run_id = self.last_run.fetch_add(1, Ordering::Relaxed) + 1;
        let name = job.name().to_string();
        let _span = info_span!("job", run_id, name = %name).entered();
        info!("starting job");
        let start = Instant::now();
        let result = job.run();
        let elapsed = start.elapsed();

        let outcome = match result {
            Ok(()) => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "job completed");
                JobOutcome::Completed
            }
            Err(e) => match e.downcast::<BatchError>() {
                Ok(BatchError::StepExecution(status)) => {
                    error!(step = %status.name(), state = %status.state(), "job stopped by a failed step");
                    for failure in status.failures() {
                        error!(step = %status.name(), error = %failure, "step failure");
                    }
                    JobOutcome::StepFailed(status)
                }
                Ok(other) => {
                    error!(error = %other, "job failed");
                    JobOutcome::Failed(other.into())
                }
                Err(e) => {
                    error!(error = %e, "job failed");
                    JobOutcome::Failed(e)
                }
            },
        };
        JobReport {
            run_id,
            name,
            elapsed,
            outcome,
        }
    }
}

/// Job that executes its steps in order and stops at the first failed one.
pub struct StepsJob {
    name: String,
    steps: Vec<Box<dyn Step>>,
}

impl StepsJob {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    #[must_use]
    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Statuses of the steps' latest executions, in order.
    #[must_use]
    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|step| step.status()).collect()
    }
}

impl Job for StepsJob {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&mut self) -> anyhow::Result<()> {
        for step in &mut self.steps {
            let status = step.execute()?;
            if status.is_failed() {
                return Err(BatchError::StepExecution(Box::new(status)).into());
            }
        }
        Ok(())
    }
}
