// THEORY:
// The `BlobDetector` is the engine of the detection layer. It finds 4-connected
// regions of in-range color in a planar YUV 4:2:0 frame in a single top-to-bottom
// pass, never revisiting a pixel and never allocating once it has warmed up.
//
// Key architectural principles & algorithm steps:
// 1.  **Run Extraction**: Each row is reduced to a short list of `ColorRun`s by the
//     chroma and luma scanners in `color_run`. Chroma runs are refreshed on even
//     rows only and shared with the odd row beneath.
// 2.  **Row-Pair Union**: The runs of the current row are swept against the runs
//     of the previous row with two cursors. Every pair that shares a column is
//     handed to the `BlobForest`, which labels and merges them.
// 3.  **Double Buffering**: Only two rows of runs are ever alive. After each row the
//     buffers are swapped, so the "current" runs become the next row's "previous".
// 4.  **Optional Highlight**: For debugging, the luma of in-range pixels can be
//     doubled and everything else halved, making the detection mask visible in the
//     frame itself.
// 5.  **Persistent State**: Unlike a stateless utility, the detector owns its forest
//     and scratch buffers across frames. The statistics of the last frame stay
//     queryable until the next call to `detect`.

use crate::core_modules::blob_forest::BlobForest;
use crate::core_modules::blob_stats::Coord;
use crate::core_modules::color_run::{
    ChromaRun, ColorRun, ColorThresholds, scan_chroma_row, scan_luma_row,
};
use crate::core_modules::yuv_frame::{YuvFrame, YuvGeometry};
use crate::error::{BlobError, BlobResult};

/// Single-pass color blob detector with preallocated state.
#[derive(Debug)]
pub struct BlobDetector {
    forest: BlobForest,
    chroma_runs: Vec<ChromaRun>,
    prev_runs: Vec<ColorRun>,
    curr_runs: Vec<ColorRun>,
}

impl BlobDetector {
    pub fn new(max_runs: u16, max_blobs: u16) -> BlobResult<Self> {
        Ok(Self {
            forest: BlobForest::new(max_runs, max_blobs)?,
            chroma_runs: Vec::new(),
            prev_runs: Vec::new(),
            curr_runs: Vec::new(),
        })
    }

    /// Like `new`, but also sizes the row buffers for frames up to `cols` wide so
    /// that the first frame does not allocate either.
    pub fn with_frame_width(max_runs: u16, max_blobs: u16, cols: usize) -> BlobResult<Self> {
        let mut detector = Self::new(max_runs, max_blobs)?;
        detector.reserve_row_buffers(cols)?;
        Ok(detector)
    }

    pub fn forest(&self) -> &BlobForest {
        &self.forest
    }

    pub fn forest_mut(&mut self) -> &mut BlobForest {
        &mut self.forest
    }

    /// Detects every blob of `thresholds`-colored pixels in `yuv`, replacing the
    /// results of the previous frame. `yuv` is only written when `highlight` is set.
    pub fn detect(
        &mut self,
        thresholds: &ColorThresholds,
        highlight: bool,
        cols: usize,
        rows: usize,
        yuv: &mut [u8],
    ) -> BlobResult<()> {
        let geometry = YuvGeometry::new(cols, rows)?;
        let (y_plane, u_plane, v_plane) = geometry.split_planes_mut(yuv)?;
        self.reserve_row_buffers(cols)?;

        self.forest.reset();
        self.prev_runs.clear();
        let chroma_cols = geometry.chroma_cols();

        for row in 0..rows {
            // --- 1. Chroma runs, shared by each pair of rows ---
            if row % 2 == 0 {
                let start = (row / 2) * chroma_cols;
                let span = start..start + chroma_cols;
                scan_chroma_row(
                    &u_plane[span.clone()],
                    &v_plane[span],
                    thresholds,
                    &mut self.chroma_runs,
                );
            }

            // --- 2. Luma runs for this row ---
            let y_row = &mut y_plane[row * cols..(row + 1) * cols];
            scan_luma_row(y_row, &self.chroma_runs, thresholds.y_low, &mut self.curr_runs);
            if highlight {
                highlight_row(y_row, &self.curr_runs);
            }

            // --- 3. Connect to the row above ---
            if row > 0 {
                union_run_rows(
                    &mut self.forest,
                    (row - 1) as Coord,
                    &mut self.prev_runs,
                    row as Coord,
                    &mut self.curr_runs,
                );
            }

            std::mem::swap(&mut self.prev_runs, &mut self.curr_runs);
        }
        Ok(())
    }

    /// Runs `detect` over an owned frame.
    pub fn detect_frame(
        &mut self,
        thresholds: &ColorThresholds,
        highlight: bool,
        frame: &mut YuvFrame,
    ) -> BlobResult<()> {
        let (cols, rows) = (frame.cols(), frame.rows());
        self.detect(thresholds, highlight, cols, rows, frame.data_mut())
    }

    /// Grows the row buffers when a frame is wider than any seen before.
    fn reserve_row_buffers(&mut self, cols: usize) -> BlobResult<()> {
        // Runs are separated by at least one pixel, so a row holds at most cols / 2 + 1.
        let per_row = cols / 2 + 1;
        let failed = |_| BlobError::Allocation {
            what: "row run",
            entries: per_row,
        };
        self.chroma_runs.clear();
        self.chroma_runs.try_reserve(per_row).map_err(failed)?;
        self.prev_runs.clear();
        self.prev_runs.try_reserve(per_row).map_err(failed)?;
        self.curr_runs.clear();
        self.curr_runs.try_reserve(per_row).map_err(failed)?;
        Ok(())
    }
}

/// Sweeps two sorted, disjoint run lists and unions every pair sharing a column.
fn union_run_rows(
    forest: &mut BlobForest,
    prev_row: Coord,
    prev: &mut [ColorRun],
    row: Coord,
    curr: &mut [ColorRun],
) {
    let (mut p, mut c) = (0, 0);
    while p < prev.len() && c < curr.len() {
        let (upper, lower) = (&mut prev[p], &mut curr[c]);
        if upper.overlaps(lower) {
            forest.union_runs(prev_row, upper, row, lower);
        }
        // Whichever run ends first cannot overlap anything further right.
        if upper.high < lower.high {
            p += 1;
        } else {
            c += 1;
        }
    }
}

/// Doubles luma inside the runs (saturating) and halves it everywhere else.
fn highlight_row(y_row: &mut [u8], runs: &[ColorRun]) {
    let mut x = 0;
    for run in runs {
        let (low, high) = (usize::from(run.low), usize::from(run.high));
        y_row[x..low].iter_mut().for_each(|luma| *luma /= 2);
        y_row[low..high].iter_mut().for_each(|luma| *luma = luma.saturating_mul(2));
        x = high;
    }
    y_row[x..].iter_mut().for_each(|luma| *luma /= 2);
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 16x8 frame whose chroma is in range everywhere; blobs are drawn in luma.
    fn luma_canvas() -> (YuvFrame, ColorThresholds) {
        let mut frame = YuvFrame::new(16, 8).expect("valid");
        frame.fill([0, 120, 160]);
        (frame, ColorThresholds::new(100, 100, 140, 140, 180))
    }

    #[test]
    fn rejects_bad_geometry_and_short_buffers() {
        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        let thresholds = ColorThresholds::default();
        let mut buffer = vec![0u8; 24];
        assert!(matches!(
            detector.detect(&thresholds, false, 3, 4, &mut buffer),
            Err(BlobError::InvalidGeometry { .. })
        ));
        assert!(matches!(
            detector.detect(&thresholds, false, 8, 8, &mut buffer),
            Err(BlobError::BufferTooSmall { required: 96, actual: 24 })
        ));
        assert!(detector.detect(&thresholds, false, 4, 4, &mut buffer).is_ok());
    }

    #[test]
    fn all_in_range_frame_is_one_blob() {
        let mut frame = YuvFrame::new(8, 6).expect("valid");
        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        detector
            .detect_frame(&ColorThresholds::default(), false, &mut frame)
            .expect("valid frame");
        let forest = detector.forest();
        assert_eq!(forest.blob_count(), 1);
        assert_eq!(forest.total_pixel_count(), 48);
        let stats = forest.blob(0).expect("one blob");
        assert_eq!(stats.bounding_box().to_array(), [0, 0, 7, 5]);
        forest.assert_consistent();
    }

    #[test]
    fn merges_branches_discovered_separately() {
        // A "U": two columns that only meet at the bottom row.
        let (mut frame, thresholds) = luma_canvas();
        frame.fill_luma_rect(1, 0, 2, 5, 200);
        frame.fill_luma_rect(9, 0, 10, 5, 200);
        frame.fill_luma_rect(1, 6, 10, 6, 200);

        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        detector.detect_frame(&thresholds, false, &mut frame).expect("valid frame");
        let forest = detector.forest();
        assert_eq!(forest.blob_count(), 1);
        assert_eq!(forest.total_pixel_count(), 2 * 12 + 10);
        forest.assert_consistent();
    }

    #[test]
    fn highlight_marks_the_detection_mask() {
        let (mut frame, thresholds) = luma_canvas();
        frame.fill_luma_rect(0, 0, 15, 7, 90);
        frame.fill_luma_rect(4, 2, 7, 3, 150);

        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        detector.detect_frame(&thresholds, true, &mut frame).expect("valid frame");
        assert_eq!(frame.get_pixel(4, 2).map(|p| p[0]), Some(255));
        assert_eq!(frame.get_pixel(3, 2).map(|p| p[0]), Some(45));
        assert_eq!(frame.get_pixel(0, 0).map(|p| p[0]), Some(45));
        // Chroma is never touched.
        assert_eq!(frame.get_pixel(4, 2).map(|p| p[1]), Some(120));
    }

    #[test]
    fn steady_state_frames_do_not_allocate() {
        let (mut frame, thresholds) = luma_canvas();
        frame.fill_luma_rect(2, 1, 12, 6, 200);
        let mut detector = BlobDetector::with_frame_width(100, 10, 16).expect("allocation");

        let fingerprint = |d: &BlobDetector| {
            (
                d.chroma_runs.capacity(),
                d.prev_runs.capacity(),
                d.curr_runs.capacity(),
                d.forest.storage_ptrs(),
            )
        };
        let before = fingerprint(&detector);
        for _ in 0..3 {
            detector.detect_frame(&thresholds, false, &mut frame).expect("valid frame");
        }
        assert_eq!(fingerprint(&detector), before);
    }
}
