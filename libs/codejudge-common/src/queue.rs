/// Submission hand-off queue
///
/// A message is one opaque token that should be a decimal submission id.
/// Consumers parse it themselves so that malformed tokens can be logged
/// and skipped instead of tearing down the loop.
use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait SubmissionQueue: Send + Sync {
    async fn push(&self, submission_id: u64) -> Result<(), QueueError>;

    /// Blocks up to `timeout`; `None` means nothing arrived in time
    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError>;

    /// Parks a token whose grading attempt failed on infrastructure
    async fn push_failed(&self, token: &str) -> Result<(), QueueError>;
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    pending: Mutex<VecDeque<String>>,
    failed: Mutex<Vec<String>>,
    notify: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arbitrary token, well-formed or not
    pub async fn push_raw(&self, token: impl Into<String>) {
        self.pending.lock().await.push_back(token.into());
        self.notify.notify_one();
    }

    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }

    pub async fn failed(&self) -> Vec<String> {
        self.failed.lock().await.clone()
    }
}

#[async_trait]
impl SubmissionQueue for MemoryQueue {
    async fn push(&self, submission_id: u64) -> Result<(), QueueError> {
        self.push_raw(submission_id.to_string()).await;
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<String>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            if let Some(token) = self.pending.lock().await.pop_front() {
                return Ok(Some(token));
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(self.pending.lock().await.pop_front());
            }
        }
    }

    async fn push_failed(&self, token: &str) -> Result<(), QueueError> {
        self.failed.lock().await.push(token.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryQueue::new();
        queue.push(1).await.unwrap();
        queue.push(2).await.unwrap();
        queue.push_raw("not-a-number").await;

        let timeout = Duration::from_millis(10);
        assert_eq!(queue.pop(timeout).await.unwrap(), Some("1".to_string()));
        assert_eq!(queue.pop(timeout).await.unwrap(), Some("2".to_string()));
        assert_eq!(
            queue.pop(timeout).await.unwrap(),
            Some("not-a-number".to_string())
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = MemoryQueue::new();
        let popped = queue.pop(Duration::from_millis(20)).await.unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let queue = Arc::new(MemoryQueue::new());
        let producer = Arc::clone(&queue);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(7).await.unwrap();
        });

        let popped = queue.pop(Duration::from_secs(5)).await.unwrap();
        assert_eq!(popped, Some("7".to_string()));
    }

    #[tokio::test]
    async fn test_failed_tokens_are_kept() {
        let queue = MemoryQueue::new();
        queue.push_failed("12").await.unwrap();
        assert_eq!(queue.failed().await, vec!["12".to_string()]);
    }
}
