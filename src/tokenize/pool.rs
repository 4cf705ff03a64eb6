//! Parallel tokenization with ordering reconstruction

use super::{Sentence, TokenizationError, TokenizationResult, Tokenizer};
use crate::pipeline::ReorderBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

type ParagraphResult = TokenizationResult<Vec<Sentence>>;

struct Job {
    id: u64,
    offset: usize,
    text: String,
    reply: mpsc::Sender<(u64, ParagraphResult)>,
}

/// A fixed set of tokenizer workers behind one bounded job queue.
///
/// Every paragraph gets a correlation id when it is submitted. Workers
/// finish in any order; [`TokenizerPool::tokenize`] returns once every
/// paragraph of the batch is back, in submission order.
pub struct TokenizerPool {
    jobs: Option<mpsc::Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    next_id: AtomicU64,
}

impl TokenizerPool {
    /// Spawn `worker_count` workers. Must be called inside a tokio runtime.
    pub fn new(tokenizer: Arc<dyn Tokenizer>, worker_count: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..worker_count.max(1))
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let tokenizer = Arc::clone(&tokenizer);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(job) = job else {
                            break;
                        };

                        let tokenizer = Arc::clone(&tokenizer);
                        let Job { id, offset, text, reply } = job;
                        let result = tokio::task::spawn_blocking(move || {
                            tokenizer.tokenize_paragraph(offset, &text)
                        })
                        .await
                        .unwrap_or_else(|e| Err(TokenizationError::Backend(e.to_string())));

                        // the caller may have given up on the batch
                        let _ = reply.send((id, result)).await;
                    }
                    debug!(worker, "tokenizer worker stopped");
                })
            })
            .collect();

        Self {
            jobs: Some(tx),
            workers,
            next_id: AtomicU64::new(0),
        }
    }

    /// Tokenize `(offset, text)` paragraphs; one result per paragraph, in order
    pub async fn tokenize(&self, paragraphs: Vec<(usize, String)>) -> TokenizationResult<Vec<ParagraphResult>> {
        let jobs = self.jobs.as_ref().ok_or(TokenizationError::PoolClosed)?;
        let count = paragraphs.len();
        if count == 0 {
            return Ok(Vec::new());
        }

        let first_id = self.next_id.fetch_add(count as u64, Ordering::SeqCst);
        let (reply_tx, mut reply_rx) = mpsc::channel(count);

        for (i, (offset, text)) in paragraphs.into_iter().enumerate() {
            let job = Job {
                id: first_id + i as u64,
                offset,
                text,
                reply: reply_tx.clone(),
            };
            jobs.send(job).await.map_err(|_| TokenizationError::PoolClosed)?;
        }
        drop(reply_tx);

        let mut reorder = ReorderBuffer::new(first_id);
        let mut results = Vec::with_capacity(count);
        while results.len() < count {
            let Some((id, result)) = reply_rx.recv().await else {
                return Err(TokenizationError::PoolClosed);
            };
            results.extend(reorder.push(id, result));
        }
        Ok(results)
    }

    /// Close the job queue and wait for every worker to stop
    pub async fn shutdown(mut self) -> Result<(), tokio::task::JoinError> {
        self.jobs.take();
        for worker in self.workers.drain(..) {
            worker.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::{SimpleTokenizer, Token};
    use std::time::Duration;

    /// Sleeps longer for shorter texts so results come back reversed
    struct SlowTokenizer;

    impl Tokenizer for SlowTokenizer {
        fn split(&self, text: &str) -> TokenizationResult<Vec<Sentence>> {
            std::thread::sleep(Duration::from_millis(40u64.saturating_sub(text.len() as u64 * 5)));
            SimpleTokenizer.split(text)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn results_come_back_in_submission_order() {
        let pool = TokenizerPool::new(Arc::new(SlowTokenizer), 4, 2);
        let paragraphs = vec![
            (0, "a".to_string()),
            (2, "bb cc".to_string()),
            (8, "dddd eeee".to_string()),
            (18, String::new()),
        ];
        let results = pool.tokenize(paragraphs).await.unwrap();

        let firsts: Vec<Option<Token>> = results
            .into_iter()
            .map(|r| r.unwrap().into_iter().flatten().next())
            .collect();
        assert_eq!(firsts[0].as_ref().map(|t| t.start), Some(0));
        assert_eq!(firsts[1].as_ref().map(|t| t.value.as_str()), Some("bb"));
        assert_eq!(firsts[2].as_ref().map(|t| t.start), Some(8));
        assert!(firsts[3].is_none());

        pool.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn failed_paragraph_does_not_fail_batch() {
        let pool = TokenizerPool::new(Arc::new(SimpleTokenizer), 2, 4);
        let results = pool
            .tokenize(vec![(0, "  ".to_string()), (3, "ok".to_string())])
            .await
            .unwrap();
        assert!(results[0].is_err());
        assert!(results[1].is_ok());
        pool.shutdown().await.unwrap();
    }
}
