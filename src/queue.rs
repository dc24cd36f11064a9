//! In-process job queue with worker pool and in-flight dedup.
//!
//! Jobs are deduplicated by fingerprint from enqueue until execution
//! finishes, so re-submitting a (knowledge base, document, update) triple
//! while it is queued or running is a no-op. Jobs are never retried; a
//! failed job logs and the queue moves on.

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::QueueConfig;
use crate::error::IngestError;
use crate::models::Job;
use crate::pipeline::IngestionPipeline;

pub struct JobQueue {
    tx: Option<mpsc::UnboundedSender<Job>>,
    in_flight: Arc<StdMutex<HashSet<String>>>,
    workers: Vec<JoinHandle<()>>,
}

impl JobQueue {
    /// Start `config.workers` workers draining a shared queue.
    pub fn start(pipeline: Arc<IngestionPipeline>, config: &QueueConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));
        let in_flight: Arc<StdMutex<HashSet<String>>> = Arc::default();
        let timeout = Duration::from_secs(config.job_timeout_secs);

        let workers = (0..config.workers.max(1))
            .map(|worker| {
                let rx = rx.clone();
                let pipeline = pipeline.clone();
                let in_flight = in_flight.clone();
                tokio::spawn(async move {
                    loop {
                        // Hold the receiver lock only while waiting for the
                        // next job, so workers drain concurrently.
                        let job = { rx.lock().await.recv().await };
                        let Some(job) = job else {
                            debug!(worker, "queue closed, worker exiting");
                            break;
                        };
                        let fingerprint = job.fingerprint();
                        run_job(&pipeline, &job, timeout, worker).await;
                        in_flight.lock().unwrap().remove(&fingerprint);
                    }
                })
            })
            .collect();

        Self {
            tx: Some(tx),
            in_flight,
            workers,
        }
    }

    /// Enqueue unless an identical job is already queued or executing.
    /// Returns whether the job was accepted.
    pub fn enqueue_if_absent(&self, job: Job) -> Result<bool, IngestError> {
        if job.knowledge_base_id.trim().is_empty() {
            return Err(IngestError::Validation(
                "knowledgeBaseId must not be empty".to_string(),
            ));
        }
        if job.document_id.trim().is_empty() {
            return Err(IngestError::Validation(
                "documentId must not be empty".to_string(),
            ));
        }

        let fingerprint = job.fingerprint();
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            if !in_flight.insert(fingerprint.clone()) {
                debug!(
                    kb = %job.knowledge_base_id,
                    doc = %job.document_id,
                    "duplicate job ignored"
                );
                return Ok(false);
            }
        }

        let Some(tx) = &self.tx else {
            self.in_flight.lock().unwrap().remove(&fingerprint);
            return Err(IngestError::Validation("queue is shut down".to_string()));
        };
        if tx.send(job).is_err() {
            self.in_flight.lock().unwrap().remove(&fingerprint);
            return Err(IngestError::Validation("queue is shut down".to_string()));
        }
        Ok(true)
    }

    /// Number of jobs queued or executing.
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Stop accepting jobs and wait for workers to drain the queue.
    pub async fn shutdown(mut self) {
        self.tx.take();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                error!(error = %e, "queue worker panicked");
            }
        }
        info!("job queue drained");
    }
}

async fn run_job(pipeline: &IngestionPipeline, job: &Job, timeout: Duration, worker: usize) {
    debug!(worker, kb = %job.knowledge_base_id, doc = %job.document_id, "job started");
    match tokio::time::timeout(timeout, pipeline.execute(job)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(
                worker,
                kb = %job.knowledge_base_id,
                doc = %job.document_id,
                error = %e,
                "job failed"
            );
        }
        Err(_) => {
            // The timeout dropped the run mid-flight, so the pipeline's own
            // error handling never fired; move the document to `error` here.
            let e = IngestError::Timeout(timeout);
            error!(
                worker,
                kb = %job.knowledge_base_id,
                doc = %job.document_id,
                error = %e,
                "job timed out"
            );
            pipeline.record_failure(job, &e).await;
        }
    }
}
