use std::sync::Arc;

use tokio::sync::{
    Mutex,
    mpsc::{self, OwnedPermit, Receiver, Sender, error::TrySendError},
};
use uuid::Uuid;

use crate::engine::{error::EngineError, metrics::MetricsRegistry};

/// FIFO of submission ids. Each id handed to `enqueue` is received by
/// exactly one caller of `next`.
#[derive(Clone)]
pub struct SubmissionQueue {
    sender: Sender<Uuid>,
    receiver: Arc<Mutex<Receiver<Uuid>>>,
    metrics: Arc<MetricsRegistry>,
}

/// A reserved slot in the queue. Reserve first, store the record, then push,
/// so a full queue never leaves an orphaned `In Queue` record behind.
pub struct QueueSlot {
    permit: OwnedPermit<Uuid>,
    metrics: Arc<MetricsRegistry>,
}

impl QueueSlot {
    pub fn push(self, id: Uuid) {
        let _sender = self.permit.send(id);
        self.metrics.submitted();
    }
}

impl SubmissionQueue {
    pub fn new(capacity: usize, metrics: Arc<MetricsRegistry>) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender,
            receiver: Arc::new(Mutex::new(receiver)),
            metrics,
        }
    }

    pub fn reserve(&self) -> Result<QueueSlot, EngineError> {
        let permit = self
            .sender
            .clone()
            .try_reserve_owned()
            .map_err(|err| match err {
                TrySendError::Full(_) => EngineError::QueueFull,
                TrySendError::Closed(_) => EngineError::Internal("queue closed".to_string()),
            })?;
        Ok(QueueSlot {
            permit,
            metrics: self.metrics.clone(),
        })
    }

    pub fn enqueue(&self, id: Uuid) -> Result<(), EngineError> {
        self.reserve()?.push(id);
        Ok(())
    }

    /// Waits for the next id. `None` once every sender is gone. The id counts
    /// as off the queue from here on, whether or not it is ever claimed.
    pub async fn next(&self) -> Option<Uuid> {
        let id = self.receiver.lock().await.recv().await;
        if id.is_some() {
            self.metrics.dequeued();
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::SubmissionQueue;
    use crate::engine::{error::EngineError, metrics::MetricsRegistry};

    #[tokio::test]
    async fn preserves_fifo_order() {
        let queue = SubmissionQueue::new(8, Arc::new(MetricsRegistry::new()));
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }
        for id in &ids {
            assert_eq!(queue.next().await, Some(*id));
        }
    }

    #[tokio::test]
    async fn depth_gauge_follows_dequeues() {
        let metrics = Arc::new(MetricsRegistry::new());
        let queue = SubmissionQueue::new(8, metrics.clone());
        queue.enqueue(Uuid::new_v4()).unwrap();
        queue.enqueue(Uuid::new_v4()).unwrap();
        assert!(metrics.render_prometheus().contains("submission_queue_depth 2"));

        queue.next().await.unwrap();
        assert!(metrics.render_prometheus().contains("submission_queue_depth 1"));
    }

    #[tokio::test]
    async fn full_queue_is_reported() {
        let queue = SubmissionQueue::new(1, Arc::new(MetricsRegistry::new()));
        queue.enqueue(Uuid::new_v4()).unwrap();
        assert!(matches!(queue.reserve(), Err(EngineError::QueueFull)));
    }

    #[tokio::test]
    async fn each_id_reaches_one_consumer() {
        let queue = SubmissionQueue::new(64, Arc::new(MetricsRegistry::new()));
        let ids: Vec<Uuid> = (0..40).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id).unwrap();
        }

        let mut consumers = Vec::new();
        for _ in 0..4 {
            let queue = queue.clone();
            consumers.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(Some(id)) =
                    tokio::time::timeout(std::time::Duration::from_millis(100), queue.next()).await
                {
                    seen.push(id);
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for consumer in consumers {
            all.extend(consumer.await.unwrap());
        }
        all.sort();
        let mut expected = ids.clone();
        expected.sort();
        assert_eq!(all, expected);
    }
}
