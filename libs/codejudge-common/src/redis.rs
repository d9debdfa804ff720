/// Redis semantics shared by the worker and the CLI
/// Keys are deterministic so that both sides never drift.
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::queue::{QueueError, SubmissionQueue};
use crate::store::{ChallengeRepository, StoreError, SubmissionRepository};
use crate::types::{
    Challenge, ChallengeTestcase, Submission, SubmissionStatus, SubmissionTestcase,
};

pub const KEY_PREFIX: &str = "codejudge";
pub const FAILED_SUFFIX: &str = "failed";

pub fn challenge_key(id: u64) -> String {
    format!("{}:challenge:{}", KEY_PREFIX, id)
}

pub fn challenge_testcase_key(id: u64) -> String {
    format!("{}:testcase:{}", KEY_PREFIX, id)
}

pub fn submission_key(id: u64) -> String {
    format!("{}:submission:{}", KEY_PREFIX, id)
}

/// Hash of testcase id -> testcase JSON, one per submission.
/// Keeping rows in a hash lets concurrent graders update different
/// testcases of one submission without read-modify-write races.
pub fn submission_testcases_key(submission_id: u64) -> String {
    format!("{}:submission:{}:testcases", KEY_PREFIX, submission_id)
}

pub fn sequence_key(kind: &str) -> String {
    format!("{}:seq:{}", KEY_PREFIX, kind)
}

/// Dead-letter list for a queue
pub fn failed_queue_name(queue_name: &str) -> String {
    format!("{}:{}", queue_name, FAILED_SUFFIX)
}

/// Submission header as stored; testcases live in their own hash
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSubmission {
    id: u64,
    challenge_id: u64,
    language: String,
    source_code: String,
    status: SubmissionStatus,
    #[serde(default)]
    compile_output: String,
    testcase_ids: Vec<u64>,
}

impl StoredSubmission {
    fn from_submission(submission: &Submission) -> Self {
        Self {
            id: submission.id,
            challenge_id: submission.challenge_id,
            language: submission.language.clone(),
            source_code: submission.source_code.clone(),
            status: submission.status,
            compile_output: submission.compile_output.clone(),
            testcase_ids: submission.testcases.iter().map(|tc| tc.id).collect(),
        }
    }

    fn into_submission(self, testcases: Vec<SubmissionTestcase>) -> Submission {
        Submission {
            id: self.id,
            challenge_id: self.challenge_id,
            language: self.language,
            source_code: self.source_code,
            status: self.status,
            compile_output: self.compile_output,
            testcases,
        }
    }
}

/// Challenge and submission documents stored as JSON strings
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    async fn next_id(&self, kind: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let id: u64 = conn.incr(sequence_key(kind), 1).await?;
        Ok(id)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: String,
        kind: &'static str,
        id: u64,
    ) -> Result<T, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        let raw = raw.ok_or(StoreError::NotFound { kind, id })?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: String, value: &T) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value)?;
        conn.set::<_, _, ()>(key, raw).await?;
        Ok(())
    }

    async fn write_testcases(
        &self,
        submission_id: u64,
        testcases: &[SubmissionTestcase],
    ) -> Result<(), StoreError> {
        if testcases.is_empty() {
            return Ok(());
        }
        let mut pairs = Vec::with_capacity(testcases.len());
        for testcase in testcases {
            pairs.push((testcase.id, serde_json::to_string(testcase)?));
        }
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(submission_testcases_key(submission_id))
            .arg(&pairs)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ChallengeRepository for RedisStore {
    async fn create_challenge(&self, mut challenge: Challenge) -> Result<Challenge, StoreError> {
        challenge.id = self.next_id("challenge").await?;
        for testcase in &mut challenge.testcases {
            testcase.id = self.next_id("challenge_testcase").await?;
            testcase.challenge_id = challenge.id;
            self.set_json(challenge_testcase_key(testcase.id), &*testcase)
                .await?;
        }
        self.set_json(challenge_key(challenge.id), &challenge).await?;
        Ok(challenge)
    }

    async fn add_testcase(
        &self,
        challenge_id: u64,
        mut testcase: ChallengeTestcase,
    ) -> Result<ChallengeTestcase, StoreError> {
        let mut challenge = self.find_challenge(challenge_id).await?;
        testcase.id = self.next_id("challenge_testcase").await?;
        testcase.challenge_id = challenge_id;
        self.set_json(challenge_testcase_key(testcase.id), &testcase)
            .await?;
        challenge.testcases.push(testcase.clone());
        self.set_json(challenge_key(challenge_id), &challenge).await?;
        Ok(testcase)
    }

    async fn find_challenge(&self, id: u64) -> Result<Challenge, StoreError> {
        self.get_json(challenge_key(id), "challenge", id).await
    }

    async fn find_testcase(&self, id: u64) -> Result<ChallengeTestcase, StoreError> {
        self.get_json(challenge_testcase_key(id), "challenge testcase", id)
            .await
    }
}

#[async_trait]
impl SubmissionRepository for RedisStore {
    async fn create_submission(&self, mut submission: Submission) -> Result<Submission, StoreError> {
        submission.id = self.next_id("submission").await?;
        for testcase in &mut submission.testcases {
            testcase.id = self.next_id("submission_testcase").await?;
            testcase.submission_id = submission.id;
        }
        self.write_testcases(submission.id, &submission.testcases)
            .await?;
        self.set_json(
            submission_key(submission.id),
            &StoredSubmission::from_submission(&submission),
        )
        .await?;
        Ok(submission)
    }

    async fn find_submission(&self, id: u64) -> Result<Submission, StoreError> {
        let header: StoredSubmission = self.get_json(submission_key(id), "submission", id).await?;
        if header.testcase_ids.is_empty() {
            return Ok(header.into_submission(Vec::new()));
        }

        let mut conn = self.conn.clone();
        let rows: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(submission_testcases_key(id))
            .arg(&header.testcase_ids)
            .query_async(&mut conn)
            .await?;

        let mut testcases = Vec::with_capacity(rows.len());
        for (testcase_id, row) in header.testcase_ids.iter().zip(rows) {
            let row = row.ok_or(StoreError::NotFound {
                kind: "submission testcase",
                id: *testcase_id,
            })?;
            testcases.push(serde_json::from_str(&row)?);
        }
        Ok(header.into_submission(testcases))
    }

    async fn update_submission(&self, submission: &Submission) -> Result<(), StoreError> {
        // existence check keeps update semantics identical to MemoryStore
        let _: StoredSubmission = self
            .get_json(submission_key(submission.id), "submission", submission.id)
            .await?;
        self.write_testcases(submission.id, &submission.testcases)
            .await?;
        self.set_json(
            submission_key(submission.id),
            &StoredSubmission::from_submission(submission),
        )
        .await
    }

    async fn update_submission_testcase(
        &self,
        testcase: &SubmissionTestcase,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(testcase)?;
        conn.hset::<_, _, _, ()>(
            submission_testcases_key(testcase.submission_id),
            testcase.id,
            raw,
        )
        .await?;
        Ok(())
    }
}

/// Redis list queue: RPUSH on intake, BLPOP on the worker
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    queue_name: String,
    failed_name: String,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, queue_name: &str) -> Self {
        Self {
            conn,
            queue_name: queue_name.to_string(),
            failed_name: failed_queue_name(queue_name),
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

#[async_trait]
impl SubmissionQueue for RedisQueue {
    async fn push(&self, submission_id: u64) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.queue_name, submission_id.to_string())
            .await?;
        debug!(queue = %self.queue_name, submission_id, "pushed submission");
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let mut conn = self.conn.clone();
        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(&self.queue_name)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(popped.map(|(_, token)| token))
    }

    async fn push_failed(&self, token: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(&self.failed_name, token).await?;
        warn!(queue = %self.failed_name, token, "parked failed submission");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestcaseStatus;

    #[test]
    fn test_key_naming() {
        assert_eq!(challenge_key(3), "codejudge:challenge:3");
        assert_eq!(challenge_testcase_key(4), "codejudge:testcase:4");
        assert_eq!(submission_key(5), "codejudge:submission:5");
        assert_eq!(
            submission_testcases_key(5),
            "codejudge:submission:5:testcases"
        );
        assert_eq!(sequence_key("submission"), "codejudge:seq:submission");
    }

    #[test]
    fn test_failed_queue_name() {
        assert_eq!(
            failed_queue_name("codejudge:queue:submissions"),
            "codejudge:queue:submissions:failed"
        );
    }

    #[test]
    fn test_stored_submission_keeps_testcase_order() {
        let submission = Submission {
            id: 9,
            challenge_id: 2,
            language: "go".to_string(),
            source_code: "package main".to_string(),
            status: SubmissionStatus::Pending,
            compile_output: String::new(),
            testcases: vec![
                SubmissionTestcase {
                    id: 30,
                    submission_id: 9,
                    challenge_testcase_id: 1,
                    status: TestcaseStatus::Pending,
                    output: String::new(),
                },
                SubmissionTestcase {
                    id: 12,
                    submission_id: 9,
                    challenge_testcase_id: 2,
                    status: TestcaseStatus::Pending,
                    output: String::new(),
                },
            ],
        };

        let stored = StoredSubmission::from_submission(&submission);
        assert_eq!(stored.testcase_ids, vec![30, 12]);

        let json = serde_json::to_string(&stored).unwrap();
        let decoded: StoredSubmission = serde_json::from_str(&json).unwrap();
        let restored = decoded.into_submission(submission.testcases.clone());
        assert_eq!(restored, submission);
    }
}
