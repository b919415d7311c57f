use crate::{
    outcome_for_error, AggregateError, CaptureJob, InvocationError, Metrics, RunAggregator,
    SnapshotInvoker,
};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// One execution unit of the pool. Owns at most one in-flight invocation.
pub struct CaptureWorker {
    id: usize,
    invoker: Arc<SnapshotInvoker>,
    metrics: Metrics,
    is_running: Arc<AtomicBool>,
    processed_count: Arc<AtomicUsize>,
    error_count: Arc<AtomicUsize>,
}

impl CaptureWorker {
    pub fn new(id: usize, invoker: Arc<SnapshotInvoker>, metrics: Metrics) -> Self {
        Self {
            id,
            invoker,
            metrics,
            is_running: Arc::new(AtomicBool::new(false)),
            processed_count: Arc::new(AtomicUsize::new(0)),
            error_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Pull jobs off the shared queue until it is closed and drained.
    pub async fn run_with_shared_receiver(
        &self,
        jobs: Arc<Mutex<mpsc::Receiver<CaptureJob>>>,
        results: mpsc::UnboundedSender<CaptureJob>,
    ) {
        debug!("Starting capture worker {}", self.id);
        self.is_running.store(true, Ordering::Relaxed);

        loop {
            // The lock is held only while waiting for the next job, so the
            // queue is handed out in FIFO order one job at a time.
            let job = {
                let mut receiver = jobs.lock().await;
                receiver.recv().await
            };

            let Some(job) = job else { break };
            let job = self.process_job(job).await;

            if job.status().is_terminal() && job.status() != crate::JobStatus::Succeeded {
                self.error_count.fetch_add(1, Ordering::Relaxed);
            }
            self.processed_count.fetch_add(1, Ordering::Relaxed);

            if let Err(e) = results.send(job) {
                error!("Worker {} failed to send result: {}", self.id, e);
                break;
            }
        }

        self.is_running.store(false, Ordering::Relaxed);
        debug!("Capture worker {} stopped", self.id);
    }

    async fn process_job(&self, mut job: CaptureJob) -> CaptureJob {
        if let Err(e) = job.start(Utc::now()) {
            error!("Worker {} refused job: {}", self.id, e);
            return job;
        }
        debug!("Worker {} running {}", self.id, job.name);
        self.metrics.job_started();

        // A panic inside one invocation becomes that job's failure and
        // leaves the worker alive for the rest of the queue.
        let outcome = match AssertUnwindSafe(self.invoker.invoke(&job))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("Worker {} caught panic while capturing {}: {}", self.id, job.name, message);
                outcome_for_error(InvocationError::Panicked(message))
            }
        };

        if let Err(e) = job.finish(outcome, Utc::now()) {
            error!("Worker {} could not finish job: {}", self.id, e);
        }
        self.metrics.job_finished(&job);
        job
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id,
            is_running: self.is_running(),
            processed_count: self.processed_count(),
            error_count: self.error_count(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    pub fn processed_count(&self) -> usize {
        self.processed_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> usize {
        self.error_count.load(Ordering::Relaxed)
    }
}

impl Clone for CaptureWorker {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            invoker: self.invoker.clone(),
            metrics: self.metrics,
            is_running: self.is_running.clone(),
            processed_count: self.processed_count.clone(),
            error_count: self.error_count.clone(),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStats {
    pub id: usize,
    pub is_running: bool,
    pub processed_count: usize,
    pub error_count: usize,
}

/// Fixed-size pool of capture workers sharing one FIFO queue
pub struct WorkerPool {
    workers: Vec<CaptureWorker>,
}

impl WorkerPool {
    /// `worker_count` is the concurrency bound; it is clamped to at least one.
    pub fn new(worker_count: usize, invoker: Arc<SnapshotInvoker>, metrics: Metrics) -> Self {
        let workers = (0..worker_count.max(1))
            .map(|i| CaptureWorker::new(i, invoker.clone(), metrics))
            .collect();
        Self { workers }
    }

    /// Run every job to a terminal status, feeding results to `aggregator`
    /// as they complete. Returns once the queue is drained and every worker
    /// has stopped.
    pub async fn dispatch(
        &self,
        jobs: Vec<CaptureJob>,
        aggregator: &mut RunAggregator,
    ) -> Result<(), AggregateError> {
        let total = jobs.len();
        let active = self.workers.len().min(total.max(1));
        info!("Dispatching {} jobs across {} workers", total, active);

        let (job_sender, job_receiver) = mpsc::channel(total.max(1));
        let (result_sender, mut result_receiver) = mpsc::unbounded_channel();

        for job in jobs {
            // Capacity equals the job count, so this never waits.
            if job_sender.send(job).await.is_err() {
                error!("Job queue closed before submission finished");
                break;
            }
        }
        drop(job_sender);

        let shared_receiver = Arc::new(Mutex::new(job_receiver));
        let handles: Vec<_> = self.workers[..active]
            .iter()
            .map(|worker| {
                let worker = worker.clone();
                let rx = shared_receiver.clone();
                let tx = result_sender.clone();
                tokio::spawn(async move {
                    worker.run_with_shared_receiver(rx, tx).await;
                })
            })
            .collect();
        drop(result_sender);

        let mut first_error = None;
        while let Some(job) = result_receiver.recv().await {
            if let Err(e) = aggregator.record(job) {
                error!("Dropping result: {}", e);
                first_error.get_or_insert(e);
            }
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Capture worker task ended abnormally: {}", e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn get_worker_stats(&self) -> Vec<WorkerStats> {
        self.workers.iter().map(|w| w.get_stats()).collect()
    }

    pub fn total_processed(&self) -> usize {
        self.workers.iter().map(|w| w.processed_count()).sum()
    }

    pub fn total_errors(&self) -> usize {
        self.workers.iter().map(|w| w.error_count()).sum()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}
