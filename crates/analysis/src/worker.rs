//! Job queue and worker pool for document analysis.
//!
//! `ingest` stores the upload, inserts a PENDING report and pushes an
//! [`AnalysisJob`] onto a bounded queue; it never waits for analysis.
//! Workers share the receiving end and stop when the shutdown token fires,
//! after finishing the job in hand.

use std::sync::Arc;

use carebridge_core::report::{Report, ReportCategory, ReportQuery, ReportStatus, Upload};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::AnalysisError;
use crate::pipeline::{AnalysisOutcome, AnalysisPipeline};

/// One unit of queued work. The Report row holds the actual job state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisJob {
    pub report_id: String,
}

/// Handle used by the interactive path: ingest uploads and read status.
#[derive(Clone)]
pub struct AnalysisService {
    pipeline: Arc<AnalysisPipeline>,
    queue: mpsc::Sender<AnalysisJob>,
}

/// The running workers.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Analysis worker panicked");
            }
        }
    }
}

impl AnalysisService {
    /// Spawn `config.workers` workers and return the service handle.
    ///
    /// Workers exit when `shutdown` is cancelled or every service handle has
    /// been dropped.
    pub fn start(pipeline: Arc<AnalysisPipeline>, shutdown: CancellationToken) -> (Self, WorkerPool) {
        let workers = pipeline.config().workers.max(1);
        let capacity = pipeline.config().queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(run_worker(
                    id,
                    pipeline.clone(),
                    rx.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();
        info!(workers, capacity, "Analysis workers started");

        (
            Self {
                pipeline,
                queue: tx,
            },
            WorkerPool { handles },
        )
    }

    /// Store an upload, create its PENDING report and queue it for analysis.
    pub async fn ingest(
        &self,
        upload: Upload,
        user_id: &str,
        session_id: Option<String>,
    ) -> Result<String, AnalysisError> {
        let storage_ref = self
            .pipeline
            .files()
            .save(&upload.original_name, &upload.bytes)
            .await?;
        let report = Report::pending(user_id, session_id, &upload, storage_ref);
        let report = self.pipeline.store().insert_report(report).await?;
        info!(
            report_id = %report.id,
            file = %report.original_name,
            size = report.file_size,
            "Report ingested"
        );
        self.enqueue(&report.id).await?;
        Ok(report.id)
    }

    async fn enqueue(&self, report_id: &str) -> Result<(), AnalysisError> {
        self.queue
            .send(AnalysisJob {
                report_id: report_id.to_string(),
            })
            .await
            .map_err(|_| AnalysisError::QueueClosed)
    }

    /// Recover what an earlier process left behind: reports stuck in
    /// PROCESSING are failed, PENDING ones are queued. Returns how many were
    /// queued.
    ///
    /// Call once at startup, before any upload is ingested.
    pub async fn requeue_pending(&self) -> Result<usize, AnalysisError> {
        let failed = self.pipeline.fail_interrupted().await?;
        if failed > 0 {
            info!(count = failed, "Failed interrupted reports");
        }
        let pending = self.pipeline.store().pending_reports(0).await?;
        for report in &pending {
            self.enqueue(&report.id).await?;
        }
        if !pending.is_empty() {
            info!(count = pending.len(), "Requeued pending reports");
        }
        Ok(pending.len())
    }

    /// Current status of a report. Pure read.
    pub async fn status(&self, report_id: &str) -> Result<Option<ReportStatus>, AnalysisError> {
        Ok(self
            .pipeline
            .store()
            .get_report(report_id)
            .await?
            .map(|r| r.status_view()))
    }

    /// A user's reports, newest first, optionally restricted to one category.
    pub async fn user_reports(
        &self,
        user_id: &str,
        category: Option<ReportCategory>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Report>, AnalysisError> {
        let query = ReportQuery {
            category,
            limit,
            offset,
            ..ReportQuery::default()
        };
        Ok(self.pipeline.store().list_reports(user_id, &query).await?)
    }
}

async fn run_worker(
    id: usize,
    pipeline: Arc<AnalysisPipeline>,
    queue: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
    shutdown: CancellationToken,
) {
    debug!(worker = id, "Analysis worker running");
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = async { queue.lock().await.recv().await } => match job {
                Some(job) => job,
                None => break,
            },
        };

        match pipeline.run(&job.report_id).await {
            Ok(AnalysisOutcome::Completed { category, used_fallback }) => {
                debug!(worker = id, report_id = %job.report_id, %category, used_fallback, "Job completed");
            }
            Ok(AnalysisOutcome::Failed { reason }) => {
                debug!(worker = id, report_id = %job.report_id, reason = %reason, "Job failed");
            }
            Ok(AnalysisOutcome::Skipped) => {}
            // the pipeline has already failed the report if it was claimed
            Err(e) => {
                warn!(worker = id, report_id = %job.report_id, error = %e, "Job aborted");
            }
        }
    }
    debug!(worker = id, "Analysis worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use carebridge_core::RecordStore;
    use crate::pipeline::INTERRUPTED_REASON;
    use carebridge_core::report::AnalysisStatus;
    use std::time::Duration;

    async fn wait_for_terminal(service: &AnalysisService, report_id: &str) -> ReportStatus {
        for _ in 0..200 {
            let status = service.status(report_id).await.unwrap().unwrap();
            if status.status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("report {report_id} never finished");
    }

    #[tokio::test]
    async fn ingest_returns_pending_id_and_workers_complete_it() {
        let f = fixture(vec![analysis_json("COST_ESTIMATE", "Estimate")], fast_config());
        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());
        assert_eq!(pool.size(), 2);

        let upload = Upload::new("quote.txt", "text/plain", b"Estimated cost of surgery.".to_vec());
        let report_id = service
            .ingest(upload, "user-1", Some("s-1".into()))
            .await
            .unwrap();

        let status = wait_for_terminal(&service, &report_id).await;
        assert_eq!(status.status, AnalysisStatus::Completed);
        assert_eq!(status.summary.as_deref(), Some("Estimate"));
        assert_eq!(status.original_name, "quote.txt");

        let reports = service
            .user_reports("user-1", Some(ReportCategory::CostEstimate), 10, 0)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].session_id.as_deref(), Some("s-1"));

        shutdown.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn duplicate_jobs_run_the_report_once() {
        let f = fixture(vec![analysis_json("OTHERS", "Once")], fast_config());
        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());

        let upload = Upload::new("note.txt", "text/plain", b"A short clinical note.".to_vec());
        let report_id = service.ingest(upload, "user-1", None).await.unwrap();
        service.enqueue(&report_id).await.unwrap();
        service.enqueue(&report_id).await.unwrap();

        wait_for_terminal(&service, &report_id).await;
        // let the duplicate jobs drain
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(f.provider.call_count(), 1);

        shutdown.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn requeue_picks_up_left_over_pending_reports() {
        let f = fixture(vec![analysis_json("OTHERS", "Recovered")], fast_config());
        let report = f
            .pending_report(Upload::new("old.txt", "text/plain", b"Left from before.".to_vec()))
            .await;

        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());
        assert_eq!(service.requeue_pending().await.unwrap(), 1);

        let status = wait_for_terminal(&service, &report.id).await;
        assert_eq!(status.status, AnalysisStatus::Completed);

        shutdown.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn restart_fails_reports_left_processing() {
        let f = fixture(vec![analysis_json("OTHERS", "Recovered")], fast_config());
        let stuck = f
            .pending_report(Upload::new("stuck.txt", "text/plain", b"Claimed before a crash.".to_vec()))
            .await;
        assert!(f.store.claim_report(&stuck.id).await.unwrap());
        let waiting = f
            .pending_report(Upload::new("queued.txt", "text/plain", b"Never claimed.".to_vec()))
            .await;

        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());
        assert_eq!(service.requeue_pending().await.unwrap(), 1);

        let status = service.status(&stuck.id).await.unwrap().unwrap();
        assert_eq!(status.status, AnalysisStatus::Failed);
        assert_eq!(status.summary.as_deref(), Some(INTERRUPTED_REASON));

        let status = wait_for_terminal(&service, &waiting.id).await;
        assert_eq!(status.status, AnalysisStatus::Completed);
        assert_eq!(f.provider.call_count(), 1);

        shutdown.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn store_error_after_claim_fails_the_report() {
        let f = flaky_fixture(vec![analysis_json("OTHERS", "Lost write")]);
        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());

        let upload = Upload::new("note.txt", "text/plain", b"A short clinical note.".to_vec());
        let report_id = service.ingest(upload, "user-1", None).await.unwrap();

        let status = wait_for_terminal(&service, &report_id).await;
        assert_eq!(status.status, AnalysisStatus::Failed);
        assert!(
            status
                .summary
                .unwrap()
                .starts_with("Processing failed: ")
        );

        shutdown.cancel();
        pool.join().await;
    }

    #[tokio::test]
    async fn ingest_fails_once_workers_are_gone() {
        let f = fixture(vec![], fast_config());
        let shutdown = CancellationToken::new();
        let (service, pool) = AnalysisService::start(f.pipeline.clone(), shutdown.clone());
        shutdown.cancel();
        pool.join().await;

        let upload = Upload::new("late.txt", "text/plain", b"Too late.".to_vec());
        let err = service.ingest(upload, "user-1", None).await.unwrap_err();
        assert!(matches!(err, AnalysisError::QueueClosed));

        // the row is still there, PENDING, for a later requeue
        let pending = f.store.pending_reports(0).await.unwrap();
        assert_eq!(pending.len(), 1);
    }

    #[tokio::test]
    async fn status_of_unknown_report_is_none() {
        let f = fixture(vec![], fast_config());
        let (service, _pool) = AnalysisService::start(f.pipeline.clone(), CancellationToken::new());
        assert!(service.status("missing").await.unwrap().is_none());
    }
}
