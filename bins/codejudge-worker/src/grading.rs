/// Grading Orchestrator
///
/// `process_submission` compiles once, fans the testcases out across a
/// bounded `JoinSet`, joins every task and then reduces the verdicts.
/// Intake lives in `crate::intake`.
use codejudge_common::queue::QueueError;
use codejudge_common::store::{ChallengeRepository, StoreError, SubmissionRepository};
use codejudge_common::types::{Submission, SubmissionStatus, SubmissionTestcase};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::engine::SandboxEngine;
use crate::evaluator;
use crate::sandbox::{SandboxError, SandboxInstance};

#[derive(Debug, Error)]
pub enum GradingError {
    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

pub struct Grader {
    engine: Arc<dyn SandboxEngine>,
    submissions: Arc<dyn SubmissionRepository>,
    challenges: Arc<dyn ChallengeRepository>,
    max_parallel_runs: usize,
}

impl Grader {
    pub fn new(
        engine: Arc<dyn SandboxEngine>,
        submissions: Arc<dyn SubmissionRepository>,
        challenges: Arc<dyn ChallengeRepository>,
        max_parallel_runs: usize,
    ) -> Self {
        Self {
            engine,
            submissions,
            challenges,
            max_parallel_runs: max_parallel_runs.max(1),
        }
    }

    pub async fn find_submission(&self, id: u64) -> Result<Submission, GradingError> {
        Ok(self.submissions.find_submission(id).await?)
    }

    /// Grades a stored submission. On sandbox create or compile infra
    /// errors the submission is returned untouched as `Err`; otherwise it
    /// ends in a terminal status and is persisted.
    pub async fn process_submission(&self, mut submission: Submission) -> Result<Submission, GradingError> {
        let mut instance = self
            .engine
            .create_sandbox(&submission.language, &submission.source_code)
            .await?;
        let run_id = instance.run_id.clone();

        let compile = match self.engine.compile_sandbox(&mut instance).await {
            Ok(compile) => compile,
            Err(err) => {
                self.release(instance).await;
                return Err(err.into());
            }
        };

        if !compile.is_success() {
            info!(submission_id = submission.id, run_id = %run_id, "compile failed");
            submission.status = SubmissionStatus::CompileError;
            submission.compile_output = compile.diagnostics();
            let persisted = self.submissions.update_submission(&submission).await;
            self.release(instance).await;
            persisted?;
            return Ok(submission);
        }

        let instance = Arc::new(instance);
        self.run_testcases(&instance, &mut submission).await;
        self.release(Arc::unwrap_or_clone(instance)).await;

        submission.status = evaluator::overall_status(&submission.testcases);
        self.submissions.update_submission(&submission).await?;

        info!(
            submission_id = submission.id,
            run_id = %run_id,
            status = %submission.status,
            "submission graded"
        );
        Ok(submission)
    }

    /// One task per testcase, at most `max_parallel_runs` at a time. All
    /// tasks are joined before this returns.
    async fn run_testcases(&self, instance: &Arc<SandboxInstance>, submission: &mut Submission) {
        let permits = Arc::new(Semaphore::new(self.max_parallel_runs));
        let mut tasks = JoinSet::new();

        for (index, testcase) in submission.testcases.iter().cloned().enumerate() {
            let permits = Arc::clone(&permits);
            let engine = Arc::clone(&self.engine);
            let challenges = Arc::clone(&self.challenges);
            let submissions = Arc::clone(&self.submissions);
            let instance = Arc::clone(instance);

            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return (index, testcase);
                };
                let graded = grade_testcase(
                    engine.as_ref(),
                    challenges.as_ref(),
                    submissions.as_ref(),
                    &instance,
                    testcase,
                )
                .await;
                (index, graded)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, graded)) => submission.testcases[index] = graded,
                Err(err) => error!(submission_id = submission.id, error = %err, "testcase task failed"),
            }
        }
    }

    async fn release(&self, instance: SandboxInstance) {
        let run_id = instance.run_id.clone();
        if let Err(err) = self.engine.cleanup(instance).await {
            warn!(run_id = %run_id, error = %err, "sandbox cleanup failed");
        }
    }
}

async fn grade_testcase(
    engine: &dyn SandboxEngine,
    challenges: &dyn ChallengeRepository,
    submissions: &dyn SubmissionRepository,
    instance: &SandboxInstance,
    mut testcase: SubmissionTestcase,
) -> SubmissionTestcase {
    let challenge_testcase = match challenges.find_testcase(testcase.challenge_testcase_id).await {
        Ok(found) => found,
        Err(err) => {
            warn!(
                testcase_id = testcase.id,
                challenge_testcase_id = testcase.challenge_testcase_id,
                error = %err,
                "challenge testcase lookup failed, skipping"
            );
            return testcase;
        }
    };

    let result = engine
        .run(
            instance,
            &challenge_testcase.input,
            challenge_testcase.memory_limit,
            challenge_testcase.time_limit_ms,
        )
        .await;
    if let Err(err) = &result {
        warn!(testcase_id = testcase.id, run_id = %instance.run_id, error = %err, "run failed");
    }

    let verdict = evaluator::judge(&result, &challenge_testcase.expected_output);
    testcase.status = verdict.status;
    testcase.output = verdict.output;

    if let Err(err) = submissions.update_submission_testcase(&testcase).await {
        error!(testcase_id = testcase.id, error = %err, "failed to persist testcase verdict");
    }
    testcase
}
