// THEORY:
// The `parallel_pipeline` spreads independent frames across a fixed set of
// workers. Blob detection keeps no state between frames, so any worker can take
// any frame; each worker owns a full `DetectionPipeline` (and therefore its own
// preallocated forest) so nothing is shared on the hot path.
//
// Frames are dispatched round-robin over per-worker channels. Every task carries
// a oneshot sender for its result, and the frame buffer travels back with the
// report so callers can recycle it.

use crate::core_modules::yuv_frame::YuvFrame;
use crate::error::{BlobError, BlobResult};
use crate::pipeline::{BlobReport, DetectionPipeline, PipelineConfig};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{mpsc, oneshot};

/// A processed frame: the report plus the (possibly highlighted) frame buffer.
#[derive(Debug)]
pub struct FrameOutcome {
    pub report: BlobReport,
    pub frame: YuvFrame,
}

struct FrameTask {
    frame_no: u64,
    frame: YuvFrame,
    result_sender: oneshot::Sender<BlobResult<FrameOutcome>>,
}

pub struct WorkerPool {
    task_senders: Vec<mpsc::UnboundedSender<FrameTask>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    next_worker: AtomicUsize,
    next_frame_no: AtomicU64,
}

impl WorkerPool {
    /// Spawns `worker_count` workers (at least one). Must be called from within a
    /// Tokio runtime.
    pub fn new(config: PipelineConfig, worker_count: usize) -> BlobResult<Self> {
        let worker_count = worker_count.max(1);
        let mut task_senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            // Allocate up front so a bad config fails here, not inside a task.
            let mut pipeline = DetectionPipeline::new(config.clone())?;
            let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<FrameTask>();

            let worker = tokio::spawn(async move {
                while let Some(FrameTask {
                    frame_no,
                    mut frame,
                    result_sender,
                }) = task_receiver.recv().await
                {
                    let outcome = pipeline.process_yuv_frame(&mut frame).map(|mut report| {
                        report.frame_no = frame_no;
                        FrameOutcome { report, frame }
                    });
                    if let Err(err) = &outcome {
                        tracing::warn!(worker_id, frame_no, %err, "frame rejected");
                    }
                    let _ = result_sender.send(outcome);
                }
                tracing::debug!(worker_id, "worker stopped");
            });

            task_senders.push(task_sender);
            workers.push(worker);
        }

        tracing::info!(worker_count, "worker pool started");
        Ok(Self {
            task_senders,
            workers,
            next_worker: AtomicUsize::new(0),
            next_frame_no: AtomicU64::new(1),
        })
    }

    /// One worker per logical CPU.
    pub fn with_default_workers(config: PipelineConfig) -> BlobResult<Self> {
        Self::new(config, num_cpus::get())
    }

    pub fn worker_count(&self) -> usize {
        self.task_senders.len()
    }

    /// Queues a frame and waits for its report. Frame numbers follow submission order.
    pub async fn process_frame(&self, frame: YuvFrame) -> BlobResult<FrameOutcome> {
        let frame_no = self.next_frame_no.fetch_add(1, Ordering::Relaxed);
        let worker_idx = self.next_worker.fetch_add(1, Ordering::Relaxed) % self.task_senders.len();
        let (result_sender, result_receiver) = oneshot::channel();

        self.task_senders[worker_idx]
            .send(FrameTask {
                frame_no,
                frame,
                result_sender,
            })
            .map_err(|_| BlobError::PoolClosed)?;

        result_receiver.await.map_err(|_| BlobError::PoolClosed)?
    }

    /// Stops accepting frames and waits for in-flight work to finish.
    pub async fn shutdown(self) {
        drop(self.task_senders);
        for result in futures::future::join_all(self.workers).await {
            if let Err(err) = result {
                tracing::error!(%err, "worker task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::color_run::ColorThresholds;

    fn frame_with_square(offset: usize) -> YuvFrame {
        let mut frame = YuvFrame::new(32, 32).expect("valid");
        frame.fill_luma_rect(offset, offset, offset + 7, offset + 7, 200);
        frame
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            thresholds: ColorThresholds::new(100, 0, 255, 0, 255),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn frames_are_processed_concurrently() {
        let pool = WorkerPool::new(config(), 3).expect("allocation");
        assert_eq!(pool.worker_count(), 3);

        let jobs = (0..6).map(|i| pool.process_frame(frame_with_square(i * 2)));
        let outcomes = futures::future::join_all(jobs).await;

        let mut frame_numbers = Vec::new();
        for (i, outcome) in outcomes.into_iter().enumerate() {
            let outcome = outcome.expect("processed");
            assert_eq!(outcome.report.blobs.len(), 1);
            let stats = outcome.report.blobs[0];
            assert_eq!(stats.count, 64);
            assert_eq!(usize::from(stats.min_x), i * 2);
            frame_numbers.push(outcome.report.frame_no);
        }
        assert_eq!(frame_numbers, vec![1, 2, 3, 4, 5, 6]);
        pool.shutdown().await;
    }

    #[tokio::test]
    async fn zero_capacity_pools_report_overflow() {
        let config = PipelineConfig {
            max_runs: 0,
            max_blobs: 0,
            ..config()
        };
        // Zero capacity is legal; every blob simply overflows.
        let pool = WorkerPool::new(config, 1).expect("allocation");
        let outcome = pool.process_frame(frame_with_square(4)).await.expect("processed");
        assert!(outcome.report.blobs.is_empty());
        assert!(outcome.report.overflow_count > 0);
        pool.shutdown().await;
    }
}
