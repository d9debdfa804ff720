/// Submission intake
///
/// Snapshot, persist, enqueue. Needs the repositories and the queue but no
/// sandbox engine, so front ends can accept work without a Docker daemon.
use codejudge_common::queue::SubmissionQueue;
use codejudge_common::store::{ChallengeRepository, SubmissionRepository};
use codejudge_common::types::{
    Language, NewSubmission, Submission, SubmissionStatus, SubmissionTestcase,
};
use std::sync::Arc;
use tracing::info;

use crate::grading::GradingError;

pub struct SubmissionIntake {
    submissions: Arc<dyn SubmissionRepository>,
    challenges: Arc<dyn ChallengeRepository>,
    queue: Arc<dyn SubmissionQueue>,
}

impl SubmissionIntake {
    pub fn new(
        submissions: Arc<dyn SubmissionRepository>,
        challenges: Arc<dyn ChallengeRepository>,
        queue: Arc<dyn SubmissionQueue>,
    ) -> Self {
        Self {
            submissions,
            challenges,
            queue,
        }
    }

    /// Snapshots the challenge's testcases as Pending placeholders, stores
    /// the submission and enqueues its id. Never grades.
    pub async fn submit_submission(&self, new: NewSubmission) -> Result<Submission, GradingError> {
        let language: Language = new
            .language
            .parse()
            .map_err(|_| GradingError::UnsupportedLanguage(new.language.clone()))?;

        let challenge = self.challenges.find_challenge(new.challenge_id).await?;
        let submission = Submission {
            id: 0,
            challenge_id: challenge.id,
            language: language.to_string(),
            source_code: new.source_code,
            status: SubmissionStatus::Pending,
            compile_output: String::new(),
            testcases: challenge
                .testcases
                .iter()
                .map(|tc| SubmissionTestcase::pending(tc.id))
                .collect(),
        };

        let submission = self.submissions.create_submission(submission).await?;
        self.queue.push(submission.id).await?;

        info!(
            submission_id = submission.id,
            challenge_id = submission.challenge_id,
            testcases = submission.testcases.len(),
            "submission enqueued"
        );
        Ok(submission)
    }
}
