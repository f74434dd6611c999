//! Bounded worker pool over a processing queue.
//!
//! N long-lived workers pull jobs in FIFO arrival order; each job is
//! dispatched to exactly one worker and runs the document's full pipeline.
//! Shutdown is cooperative: cancellation stops new dequeues while in-flight
//! jobs drain, and `stop` joins the workers with a timeout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::processor::{DocumentProcessor, ProcessMode};

/// One unit of work: a file and the mode to process it in.
#[derive(Debug, Clone)]
pub struct ProcessingJob {
    pub file_path: PathBuf,
    pub mode: ProcessMode,
}

/// Progress reports emitted by the workers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Started { file: PathBuf },
    Finished { file: PathBuf, document_id: i64 },
    Failed { file: PathBuf, error: String },
}

/// Thread-safe processing queue with a fixed worker pool.
pub struct ProcessingQueue {
    processor: Arc<DocumentProcessor>,
    workers: usize,
    sender: mpsc::UnboundedSender<ProcessingJob>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessingJob>>>,
    events: mpsc::UnboundedSender<QueueEvent>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl ProcessingQueue {
    /// Create a queue and the event stream its workers report on.
    pub fn new(
        processor: Arc<DocumentProcessor>,
        workers: usize,
    ) -> (Self, mpsc::UnboundedReceiver<QueueEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (events, event_rx) = mpsc::unbounded_channel();
        let queue = Self {
            processor,
            workers: workers.max(1),
            sender,
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            events,
            token: CancellationToken::new(),
            handles: Vec::new(),
        };
        (queue, event_rx)
    }

    /// Spawn the worker pool. Idempotent.
    pub fn start(&mut self) {
        if !self.handles.is_empty() {
            return;
        }
        tracing::info!(workers = self.workers, "starting processing queue");
        for worker_id in 0..self.workers {
            let processor = self.processor.clone();
            let receiver = self.receiver.clone();
            let events = self.events.clone();
            let token = self.token.clone();
            self.handles.push(tokio::spawn(async move {
                worker_loop(worker_id, processor, receiver, events, token).await;
            }));
        }
    }

    /// Add a document to the queue. Returns false once the queue is gone.
    pub fn enqueue(&self, file_path: impl Into<PathBuf>, mode: ProcessMode) -> bool {
        let job = ProcessingJob {
            file_path: file_path.into(),
            mode,
        };
        tracing::info!(file = %job.file_path.display(), "queued document");
        self.sender.send(job).is_ok()
    }

    /// Signal workers to stop and wait for them, bounded by `timeout` per
    /// worker. In-flight jobs finish; queued jobs are abandoned.
    pub async fn stop(&mut self, timeout: Duration) {
        tracing::info!("stopping processing queue");
        self.token.cancel();
        for handle in self.handles.drain(..) {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                tracing::warn!("worker did not stop within timeout");
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    processor: Arc<DocumentProcessor>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessingJob>>>,
    events: mpsc::UnboundedSender<QueueEvent>,
    token: CancellationToken,
) {
    tracing::debug!(worker_id, "worker started");
    loop {
        // Only one worker holds the dequeue lock at a time; it is released
        // before the job runs so the others keep draining the queue.
        let job = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = token.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = job else {
            break;
        };

        let _ = events.send(QueueEvent::Started {
            file: job.file_path.clone(),
        });

        match processor.process(&job.file_path, job.mode).await {
            Ok(document_id) => {
                let _ = events.send(QueueEvent::Finished {
                    file: job.file_path,
                    document_id,
                });
            }
            Err(err) => {
                tracing::error!(file = %job.file_path.display(), error = %err, "processing failed");
                let _ = events.send(QueueEvent::Failed {
                    file: job.file_path,
                    error: err.to_string(),
                });
            }
        }
    }
    tracing::debug!(worker_id, "worker stopped");
}
