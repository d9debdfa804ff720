/// Queue consumer
///
/// Pops one submission id at a time and hands it to the grader. The loop
/// checks the shutdown flag between pops, so a stop request takes effect
/// within one pop timeout and never interrupts a grading pass.
use codejudge_common::queue::SubmissionQueue;
use codejudge_common::store::StoreError;
use codejudge_common::types::SubmissionStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::grading::{Grader, GradingError};

/// Back-off after a queue transport error
const QUEUE_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Graded(SubmissionStatus),
    /// Unknown id or already terminal
    Skipped,
    Malformed,
    /// Parked on the failed list for an operator
    Failed,
}

/// One decimal submission id; surrounding whitespace is tolerated
pub fn parse_submission_id(token: &str) -> Option<u64> {
    token.trim().parse().ok()
}

pub struct Consumer {
    grader: Arc<Grader>,
    queue: Arc<dyn SubmissionQueue>,
    pop_timeout: Duration,
}

impl Consumer {
    pub fn new(grader: Arc<Grader>, queue: Arc<dyn SubmissionQueue>, pop_timeout: Duration) -> Self {
        Self {
            grader,
            queue,
            pop_timeout,
        }
    }

    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(pop_timeout_secs = self.pop_timeout.as_secs_f64(), "consumer started");

        while !*shutdown.borrow() {
            match self.queue.pop(self.pop_timeout).await {
                Ok(Some(token)) => {
                    self.handle_message(&token).await;
                }
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "queue pop failed");
                    tokio::time::sleep(QUEUE_RETRY_DELAY).await;
                }
            }
        }

        info!("consumer stopped");
    }

    pub async fn handle_message(&self, token: &str) -> MessageOutcome {
        let Some(submission_id) = parse_submission_id(token) else {
            warn!(token, "malformed queue message, skipping");
            return MessageOutcome::Malformed;
        };

        let submission = match self.grader.find_submission(submission_id).await {
            Ok(submission) => submission,
            Err(GradingError::Store(StoreError::NotFound { .. })) => {
                warn!(submission_id, "submission not found, skipping");
                return MessageOutcome::Skipped;
            }
            Err(err) => {
                error!(submission_id, error = %err, "failed to load submission");
                return self.park(token).await;
            }
        };

        if submission.status.is_terminal() {
            info!(submission_id, status = %submission.status, "already graded, skipping");
            return MessageOutcome::Skipped;
        }

        info!(
            submission_id,
            language = %submission.language,
            testcases = submission.testcases.len(),
            "grading submission"
        );

        match self.grader.process_submission(submission).await {
            Ok(graded) => MessageOutcome::Graded(graded.status),
            Err(err) => {
                error!(submission_id, error = %err, "grading failed");
                self.park(token).await
            }
        }
    }

    async fn park(&self, token: &str) -> MessageOutcome {
        if let Err(err) = self.queue.push_failed(token).await {
            error!(token, error = %err, "failed to park message");
        }
        MessageOutcome::Failed
    }
}
