/// Persistence seams for challenges and submissions
///
/// The grading core only talks to these traits. `MemoryStore` keeps
/// everything in-process (tests, one-shot CLI runs); the Redis adapter
/// lives in `crate::redis`.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::types::{Challenge, ChallengeTestcase, Submission, SubmissionTestcase};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[async_trait]
pub trait ChallengeRepository: Send + Sync {
    /// Stores a challenge and its testcases, assigning fresh ids
    async fn create_challenge(&self, challenge: Challenge) -> Result<Challenge, StoreError>;

    async fn add_testcase(
        &self,
        challenge_id: u64,
        testcase: ChallengeTestcase,
    ) -> Result<ChallengeTestcase, StoreError>;

    async fn find_challenge(&self, id: u64) -> Result<Challenge, StoreError>;

    async fn find_testcase(&self, id: u64) -> Result<ChallengeTestcase, StoreError>;
}

#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Stores a submission and its testcase placeholders, assigning fresh ids
    async fn create_submission(&self, submission: Submission) -> Result<Submission, StoreError>;

    async fn find_submission(&self, id: u64) -> Result<Submission, StoreError>;

    async fn update_submission(&self, submission: &Submission) -> Result<(), StoreError>;

    /// Updates a single testcase row in place; safe to call concurrently
    /// for different testcases of the same submission
    async fn update_submission_testcase(
        &self,
        testcase: &SubmissionTestcase,
    ) -> Result<(), StoreError>;
}

/// In-process store backed by `RwLock`ed maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    challenges: RwLock<HashMap<u64, Challenge>>,
    submissions: RwLock<HashMap<u64, Submission>>,
    next_challenge_id: AtomicU64,
    next_challenge_testcase_id: AtomicU64,
    next_submission_id: AtomicU64,
    next_submission_testcase_id: AtomicU64,
}

fn next_id(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChallengeRepository for MemoryStore {
    async fn create_challenge(&self, mut challenge: Challenge) -> Result<Challenge, StoreError> {
        challenge.id = next_id(&self.next_challenge_id);
        for testcase in &mut challenge.testcases {
            testcase.id = next_id(&self.next_challenge_testcase_id);
            testcase.challenge_id = challenge.id;
        }
        self.challenges
            .write()
            .await
            .insert(challenge.id, challenge.clone());
        Ok(challenge)
    }

    async fn add_testcase(
        &self,
        challenge_id: u64,
        mut testcase: ChallengeTestcase,
    ) -> Result<ChallengeTestcase, StoreError> {
        let mut challenges = self.challenges.write().await;
        let challenge = challenges.get_mut(&challenge_id).ok_or(StoreError::NotFound {
            kind: "challenge",
            id: challenge_id,
        })?;
        testcase.id = next_id(&self.next_challenge_testcase_id);
        testcase.challenge_id = challenge_id;
        challenge.testcases.push(testcase.clone());
        Ok(testcase)
    }

    async fn find_challenge(&self, id: u64) -> Result<Challenge, StoreError> {
        self.challenges
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "challenge", id })
    }

    async fn find_testcase(&self, id: u64) -> Result<ChallengeTestcase, StoreError> {
        self.challenges
            .read()
            .await
            .values()
            .flat_map(|challenge| challenge.testcases.iter())
            .find(|testcase| testcase.id == id)
            .cloned()
            .ok_or(StoreError::NotFound {
                kind: "challenge testcase",
                id,
            })
    }
}

#[async_trait]
impl SubmissionRepository for MemoryStore {
    async fn create_submission(&self, mut submission: Submission) -> Result<Submission, StoreError> {
        submission.id = next_id(&self.next_submission_id);
        for testcase in &mut submission.testcases {
            testcase.id = next_id(&self.next_submission_testcase_id);
            testcase.submission_id = submission.id;
        }
        self.submissions
            .write()
            .await
            .insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn find_submission(&self, id: u64) -> Result<Submission, StoreError> {
        self.submissions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { kind: "submission", id })
    }

    async fn update_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        let mut submissions = self.submissions.write().await;
        let stored = submissions
            .get_mut(&submission.id)
            .ok_or(StoreError::NotFound {
                kind: "submission",
                id: submission.id,
            })?;
        *stored = submission.clone();
        Ok(())
    }

    async fn update_submission_testcase(
        &self,
        testcase: &SubmissionTestcase,
    ) -> Result<(), StoreError> {
        let mut submissions = self.submissions.write().await;
        let stored = submissions
            .get_mut(&testcase.submission_id)
            .and_then(|submission| submission.testcases.iter_mut().find(|tc| tc.id == testcase.id))
            .ok_or(StoreError::NotFound {
                kind: "submission testcase",
                id: testcase.id,
            })?;
        *stored = testcase.clone();
        Ok(())
    }
}
