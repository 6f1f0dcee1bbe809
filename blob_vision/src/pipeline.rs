// THEORY:
// The `pipeline` module is the top-level API for the blob engine. It wraps the
// detector in the per-frame sequence a live camera feed needs and hands back a
// single, serializable report.
//
// Each frame goes through the same fixed steps:
// 1.  **Detect**: the `BlobDetector` scans the frame and, optionally, highlights the
//     detection mask in place.
// 2.  **Purge**: blobs smaller than the configured floor are dropped.
// 3.  **Publish Boxes**: the largest bounding boxes are copied into a shared,
//     mutex-guarded snapshot. Another thread (an overlay renderer, a network
//     sender) can read the most recent boxes without touching the detector.
// 4.  **Report**: the statistics of the largest blobs are copied into a
//     `BlobReport` stamped with a frame number and a timestamp.

use crate::core_modules::blob_detector::BlobDetector;
use crate::core_modules::yuv_frame::YuvFrame;
use crate::error::BlobResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

// Re-export key data structures for the public API.
pub use crate::core_modules::blob_stats::{BlobStats, BoundingBox};
pub use crate::core_modules::color_run::ColorThresholds;

/// Configuration for the `DetectionPipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of the union-find forest, in runs.
    pub max_runs: u16,
    /// How many blobs can be tracked at once within a frame.
    pub max_blobs: u16,
    pub thresholds: ColorThresholds,
    /// Blobs smaller than this are discarded before anything is published.
    pub min_pixels_per_blob: u32,
    /// Number of bounding boxes kept in the shared snapshot.
    pub max_boxes: usize,
    /// Number of blob statistics included in each `BlobReport`.
    pub max_telemetry_blobs: usize,
    /// Rewrite luma so the detection mask is visible in the frame.
    pub highlight_detected_pixels: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_runs: 10_000,
            max_blobs: 1_000,
            thresholds: ColorThresholds::default(),
            min_pixels_per_blob: 30,
            max_boxes: 20,
            max_telemetry_blobs: 20,
            highlight_detected_pixels: false,
        }
    }
}

impl PipelineConfig {
    /// Parses a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> BlobResult<Self> {
        Ok(toml::from_str(source)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> BlobResult<Self> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }
}

/// The output of the pipeline for a single frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlobReport {
    pub frame_no: u64,
    /// Microseconds since the pipeline was created.
    pub timestamp_micros: u64,
    /// Pixels across every detected blob, before small blobs are purged.
    pub total_pixels: u64,
    /// Blob starts dropped because the forest was full.
    pub overflow_count: u32,
    /// The largest blobs, in descending pixel count.
    pub blobs: Vec<BlobStats>,
}

/// The most recent bounding boxes, shared between the detection thread and readers.
#[derive(Debug, Clone, Default)]
pub struct BoxSnapshot {
    pub frame_no: u64,
    elements: Vec<u16>,
    element_count: usize,
}

impl BoxSnapshot {
    fn with_capacity(max_boxes: usize) -> Self {
        Self {
            frame_no: 0,
            elements: vec![0; max_boxes * 4],
            element_count: 0,
        }
    }

    /// The packed `min_x, min_y, max_x, max_y` values of the current boxes.
    pub fn elements(&self) -> &[u16] {
        &self.elements[..self.element_count]
    }

    pub fn boxes(&self) -> impl Iterator<Item = BoundingBox> + '_ {
        self.elements()
            .chunks_exact(4)
            .map(|chunk| BoundingBox::from_array([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    pub fn len(&self) -> usize {
        self.element_count / 4
    }

    pub fn is_empty(&self) -> bool {
        self.element_count == 0
    }
}

/// The main, top-level struct for the blob engine.
pub struct DetectionPipeline {
    detector: BlobDetector,
    config: PipelineConfig,
    frame_no: u64,
    started: Instant,
    shared_boxes: Arc<Mutex<BoxSnapshot>>,
    stats_scratch: Vec<BlobStats>,
}

impl DetectionPipeline {
    pub fn new(config: PipelineConfig) -> BlobResult<Self> {
        let detector = BlobDetector::new(config.max_runs, config.max_blobs)?;
        tracing::info!(
            max_runs = config.max_runs,
            max_blobs = config.max_blobs,
            min_pixels = config.min_pixels_per_blob,
            "blob detection pipeline ready"
        );
        Ok(Self {
            detector,
            shared_boxes: Arc::new(Mutex::new(BoxSnapshot::with_capacity(config.max_boxes))),
            stats_scratch: vec![BlobStats::default(); config.max_telemetry_blobs],
            frame_no: 0,
            started: Instant::now(),
            config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn detector(&self) -> &BlobDetector {
        &self.detector
    }

    /// Handle to the bounding-box snapshot updated after every frame.
    pub fn shared_boxes(&self) -> Arc<Mutex<BoxSnapshot>> {
        Arc::clone(&self.shared_boxes)
    }

    /// Number of frames processed so far.
    pub fn frames_processed(&self) -> u64 {
        self.frame_no
    }

    pub fn process_frame(&mut self, cols: usize, rows: usize, yuv: &mut [u8]) -> BlobResult<BlobReport> {
        let config = &self.config;
        self.detector.detect(
            &config.thresholds,
            config.highlight_detected_pixels,
            cols,
            rows,
            yuv,
        )?;
        self.frame_no += 1;
        let frame_no = self.frame_no;

        let forest = self.detector.forest_mut();
        let overflow_count = forest.overflow_count();
        if overflow_count > 0 {
            tracing::warn!(frame_no, overflow_count, "blob capacity exhausted, some regions were not tracked");
        }
        let total_pixels = forest.total_pixel_count();
        let kept = forest.purge_small(config.min_pixels_per_blob);

        {
            let mut snapshot = self.shared_boxes.lock().unwrap_or_else(PoisonError::into_inner);
            let snapshot = &mut *snapshot;
            snapshot.element_count = forest.copy_top_bounding_boxes(config.max_boxes * 4, &mut snapshot.elements);
            snapshot.frame_no = frame_no;
        }

        let copied = forest.copy_top_stats(config.max_telemetry_blobs, &mut self.stats_scratch);
        tracing::debug!(frame_no, total_pixels, kept, "frame processed");

        Ok(BlobReport {
            frame_no,
            timestamp_micros: self.started.elapsed().as_micros() as u64,
            total_pixels,
            overflow_count,
            blobs: self.stats_scratch[..copied].to_vec(),
        })
    }

    pub fn process_yuv_frame(&mut self, frame: &mut YuvFrame) -> BlobResult<BlobReport> {
        let (cols, rows) = (frame.cols(), frame.rows());
        self.process_frame(cols, rows, frame.data_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> YuvFrame {
        let mut frame = YuvFrame::new(64, 32).expect("valid");
        frame.fill([0, 128, 128]);
        frame.fill_luma_rect(2, 2, 11, 11, 200); // 100 px
        frame.fill_luma_rect(20, 2, 29, 6, 200); // 50 px
        frame.fill_luma_rect(40, 2, 41, 3, 200); // 4 px
        frame
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            thresholds: ColorThresholds::new(100, 0, 255, 0, 255),
            max_boxes: 1,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn reports_are_sorted_and_purged() {
        let mut pipeline = DetectionPipeline::new(config()).expect("allocation");
        let report = pipeline.process_yuv_frame(&mut scene()).expect("valid frame");

        assert_eq!(report.frame_no, 1);
        assert_eq!(report.total_pixels, 154);
        assert_eq!(report.overflow_count, 0);
        let counts: Vec<_> = report.blobs.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![100, 50]);
    }

    #[test]
    fn shared_snapshot_tracks_the_latest_frame() {
        let mut pipeline = DetectionPipeline::new(config()).expect("allocation");
        let boxes = pipeline.shared_boxes();
        pipeline.process_yuv_frame(&mut scene()).expect("valid frame");
        pipeline.process_yuv_frame(&mut scene()).expect("valid frame");

        let snapshot = boxes.lock().expect("not poisoned");
        assert_eq!(snapshot.frame_no, 2);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.elements(), &[2, 2, 11, 11]);
        assert_eq!(pipeline.frames_processed(), 2);
    }

    #[test]
    fn config_loads_from_toml_with_defaults() {
        let config = PipelineConfig::from_toml_str(
            r#"
            min_pixels_per_blob = 12
            highlight_detected_pixels = true

            [thresholds]
            y_low = 100
            u_low = 90
            u_high = 130
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.min_pixels_per_blob, 12);
        assert!(config.highlight_detected_pixels);
        assert_eq!(config.thresholds, ColorThresholds::new(100, 90, 130, 0, 255));
        assert_eq!(config.max_runs, 10_000);
        assert!(PipelineConfig::from_toml_str("max_runs = -1").is_err());
    }

    #[test]
    fn reports_serialize_to_json() {
        let mut pipeline = DetectionPipeline::new(config()).expect("allocation");
        let report = pipeline.process_yuv_frame(&mut scene()).expect("valid frame");
        let json = serde_json::to_string(&report).expect("serializable");
        let back: BlobReport = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back, report);
    }
}
