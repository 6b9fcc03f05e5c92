//! Single-consumer FIFO work queue.
//!
//! One queue instance exists per key (the projector keys them by stream).
//! A queue guarantees strictly one worker invocation in flight and FIFO
//! ordering among its own messages; there is no ordering across queues.
//!
//! Lifecycle: `idle → working → drained`. Draining is terminal per instance:
//! the drained callback fires once, the instance retires, and later messages
//! are handed back so the owner can allocate a fresh instance under the same
//! key.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

/// Async work function applied to every message pushed onto the queue.
pub type QueueWorker<M> = Arc<dyn Fn(M) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Outcome of offering a message to a queue.
pub enum QueuePush<M> {
    /// Accepted; the receiver resolves once the worker finished the message,
    /// or closes if the message is flushed first.
    Queued(oneshot::Receiver<Result<()>>),
    /// The instance already drained; the message is handed back untouched.
    Retired(M),
}

struct QueueState<M> {
    jobs: VecDeque<(M, oneshot::Sender<Result<()>>)>,
    working: bool,
    retired: bool,
}

struct QueueInner<M> {
    state: Mutex<QueueState<M>>,
    worker: QueueWorker<M>,
    on_drained: Box<dyn Fn() + Send + Sync>,
}

/// Single-consumer FIFO queue over messages of type `M`.
pub struct SerialQueue<M> {
    inner: Arc<QueueInner<M>>,
}

impl<M> Clone for SerialQueue<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + 'static> SerialQueue<M> {
    /// Create an idle queue with the given worker and drained callback.
    pub fn new(worker: QueueWorker<M>, on_drained: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    jobs: VecDeque::new(),
                    working: false,
                    retired: false,
                }),
                worker,
                on_drained: Box::new(on_drained),
            }),
        }
    }

    /// Enqueue a message, starting the consumer if the queue is idle.
    pub fn push(&self, message: M) -> QueuePush<M> {
        let (responder, receiver) = oneshot::channel();
        {
            let mut state = self.inner.state.lock().expect("queue state poisoned");
            if state.retired {
                return QueuePush::Retired(message);
            }
            state.jobs.push_back((message, responder));
            if state.working {
                return QueuePush::Queued(receiver);
            }
            state.working = true;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut state = inner.state.lock().expect("queue state poisoned");
                    match state.jobs.pop_front() {
                        Some(job) => job,
                        None => {
                            state.working = false;
                            state.retired = true;
                            break;
                        }
                    }
                };
                let (message, responder) = job;
                let result = (inner.worker)(message).await;
                let _ = responder.send(result);
            }
            (inner.on_drained)();
        });
        QueuePush::Queued(receiver)
    }

    /// Drop queued messages: all of them, or only those matching the
    /// predicate. The in-flight message, if any, is unaffected. Dropped
    /// messages close their completion receivers.
    pub fn flush(&self, predicate: Option<&dyn Fn(&M) -> bool>) {
        let mut state = self.inner.state.lock().expect("queue state poisoned");
        match predicate {
            None => state.jobs.clear(),
            Some(predicate) => state.jobs.retain(|(message, _)| !predicate(message)),
        }
    }

    /// Whether this instance has drained and will accept no more messages.
    pub fn is_retired(&self) -> bool {
        self.inner.state.lock().expect("queue state poisoned").retired
    }

    /// Number of messages waiting behind the in-flight one.
    pub fn depth(&self) -> usize {
        self.inner.state.lock().expect("queue state poisoned").jobs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn recording_worker(
        log: Arc<Mutex<Vec<String>>>,
        in_flight: Arc<AtomicUsize>,
    ) -> QueueWorker<&'static str> {
        Arc::new(move |message| {
            let log = Arc::clone(&log);
            let in_flight = Arc::clone(&in_flight);
            Box::pin(async move {
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0, "one in flight");
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push(message.to_owned());
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn processes_fifo_with_one_in_flight() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let queue = SerialQueue::new(recording_worker(Arc::clone(&log), in_flight), || {});

        let receivers: Vec<_> = ["a", "b", "c"]
            .into_iter()
            .map(|message| match queue.push(message) {
                QueuePush::Queued(receiver) => receiver,
                QueuePush::Retired(_) => panic!("fresh queue retired"),
            })
            .collect();

        for receiver in receivers {
            receiver.await.unwrap().unwrap();
        }
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drained_queue_retires_and_notifies() {
        let drained = Arc::new(AtomicUsize::new(0));
        let drained_count = Arc::clone(&drained);
        let queue: SerialQueue<&'static str> = SerialQueue::new(
            Arc::new(|_| Box::pin(async { Ok(()) })),
            move || {
                drained_count.fetch_add(1, Ordering::SeqCst);
            },
        );

        let QueuePush::Queued(receiver) = queue.push("only") else {
            panic!("fresh queue retired");
        };
        receiver.await.unwrap().unwrap();

        // Give the consumer a beat to run the drain handshake.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(queue.is_retired());
        assert_eq!(drained.load(Ordering::SeqCst), 1);
        assert!(matches!(queue.push("late"), QueuePush::Retired("late")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn flush_drops_queued_messages() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let queue = SerialQueue::new(recording_worker(Arc::clone(&log), in_flight), || {});

        let QueuePush::Queued(first) = queue.push("keep") else {
            panic!("fresh queue retired");
        };
        let QueuePush::Queued(dropped) = queue.push("drop") else {
            panic!("fresh queue retired");
        };
        queue.flush(Some(&|message: &&str| *message == "drop"));

        first.await.unwrap().unwrap();
        assert!(dropped.await.is_err(), "flushed message closes its receiver");
        assert_eq!(*log.lock().unwrap(), vec!["keep"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn worker_failures_reach_the_receiver() {
        let queue: SerialQueue<&'static str> = SerialQueue::new(
            Arc::new(|message| {
                Box::pin(async move {
                    anyhow::bail!("boom: {message}");
                })
            }),
            || {},
        );
        let QueuePush::Queued(receiver) = queue.push("x") else {
            panic!("fresh queue retired");
        };
        let result = receiver.await.unwrap();
        assert_eq!(result.unwrap_err().to_string(), "boom: x");
    }
}
