// THEORY:
// The overlay draws one-pixel bounding boxes around detected blobs directly into
// a YUV 4:2:0 buffer, so annotated frames can be streamed or saved without a
// color-space round trip. The luma border is exact; the chroma border lands on
// the 2x2 blocks that contain the luma border.

use crate::core_modules::blob_forest::BlobForest;
use crate::core_modules::blob_stats::BlobStats;
use crate::core_modules::yuv_frame::{YuvFrame, YuvGeometry};
use crate::error::{BlobError, BlobResult};

/// The color boxes are drawn in when none is configured: magenta.
pub const DEFAULT_BOX_COLOR: [u8; 3] = [107, 202, 222];

/// Draws the bounding box of every blob with at least `min_pixels` pixels.
pub fn draw_bounding_boxes(
    forest: &BlobForest,
    min_pixels: u32,
    color: [u8; 3],
    cols: usize,
    rows: usize,
    yuv: &mut [u8],
) -> BlobResult<()> {
    let geometry = YuvGeometry::new(cols, rows)?;
    let (y_plane, u_plane, v_plane) = geometry.split_planes_mut(yuv)?;
    let chroma_cols = geometry.chroma_cols();

    let qualifies = |stats: &&BlobStats| stats.count >= min_pixels;
    // Nothing is drawn unless every box fits.
    if forest
        .blobs()
        .filter(qualifies)
        .any(|stats| usize::from(stats.max_x) >= cols || usize::from(stats.max_y) >= rows)
    {
        return Err(BlobError::geometry(cols, rows, "blob lies outside the frame"));
    }

    for stats in forest.blobs().filter(qualifies) {
        let (min_x, max_x) = (usize::from(stats.min_x), usize::from(stats.max_x));
        let (min_y, max_y) = (usize::from(stats.min_y), usize::from(stats.max_y));

        for y in [min_y, max_y] {
            y_plane[y * cols + min_x..=y * cols + max_x].fill(color[0]);
        }
        for y in min_y..=max_y {
            y_plane[y * cols + min_x] = color[0];
            y_plane[y * cols + max_x] = color[0];
        }

        let (cx0, cx1) = (min_x / 2, max_x / 2);
        let (cy0, cy1) = (min_y / 2, max_y / 2);
        for (plane, value) in [(&mut *u_plane, color[1]), (&mut *v_plane, color[2])] {
            for cy in [cy0, cy1] {
                plane[cy * chroma_cols + cx0..=cy * chroma_cols + cx1].fill(value);
            }
            for cy in cy0..=cy1 {
                plane[cy * chroma_cols + cx0] = value;
                plane[cy * chroma_cols + cx1] = value;
            }
        }
    }
    Ok(())
}

/// Runs `draw_bounding_boxes` over an owned frame.
pub fn draw_frame_boxes(
    forest: &BlobForest,
    min_pixels: u32,
    color: [u8; 3],
    frame: &mut YuvFrame,
) -> BlobResult<()> {
    let (cols, rows) = (frame.cols(), frame.rows());
    draw_bounding_boxes(forest, min_pixels, color, cols, rows, frame.data_mut())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::blob_detector::BlobDetector;
    use crate::core_modules::color_run::ColorThresholds;

    #[test]
    fn boxes_outline_large_blobs_only() {
        let mut frame = YuvFrame::new(16, 16).expect("valid");
        frame.fill([0, 128, 128]);
        frame.fill_luma_rect(2, 2, 9, 7, 200);
        frame.fill_luma_rect(12, 12, 13, 13, 200);
        let thresholds = ColorThresholds::new(100, 0, 255, 0, 255);

        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        detector.detect_frame(&thresholds, false, &mut frame).expect("valid frame");
        draw_frame_boxes(detector.forest(), 10, [50, 60, 70], &mut frame).expect("in bounds");

        // Corners and edges of the large blob.
        assert_eq!(frame.get_pixel(2, 2), Some([50, 60, 70]));
        assert_eq!(frame.get_pixel(9, 7), Some([50, 60, 70]));
        assert_eq!(frame.get_pixel(5, 2).map(|p| p[0]), Some(50));
        assert_eq!(frame.get_pixel(2, 5).map(|p| p[0]), Some(50));
        // Interior luma untouched.
        assert_eq!(frame.get_pixel(5, 5).map(|p| p[0]), Some(200));
        // The four-pixel blob is below the threshold.
        assert_eq!(frame.get_pixel(12, 12), Some([200, 128, 128]));
    }

    #[test]
    fn out_of_frame_blobs_leave_the_buffer_untouched() {
        let mut source = YuvFrame::new(32, 32).expect("valid");
        source.fill_luma_rect(1, 1, 6, 6, 200);
        source.fill_luma_rect(20, 20, 27, 27, 200);
        let thresholds = ColorThresholds::new(100, 0, 255, 0, 255);
        let mut detector = BlobDetector::new(100, 10).expect("allocation");
        detector.detect_frame(&thresholds, false, &mut source).expect("valid frame");
        assert_eq!(detector.forest().blob_count(), 2);

        // The first blob fits a 16x16 frame, the second does not.
        let mut target = YuvFrame::new(16, 16).expect("valid");
        target.fill([10, 20, 30]);
        let before = target.data().to_vec();
        let result = draw_frame_boxes(detector.forest(), 1, [50, 60, 70], &mut target);
        assert!(matches!(result, Err(BlobError::InvalidGeometry { .. })));
        assert_eq!(target.data(), &before[..]);
    }
}
