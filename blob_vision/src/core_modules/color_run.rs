// THEORY:
// The `color_run` module turns raw rows of a planar YUV 4:2:0 frame into
// run-length segments of in-range pixels. It is the first of the two passes
// that make up a single row of detection.
//
// Key architectural principles:
// 1.  **Chroma First**: U and V are stored at half resolution, so the color test
//     is evaluated once per 2x2 block on even rows. The resulting `ChromaRun`s are
//     expressed in luma columns and are reused unchanged for the odd row below.
// 2.  **Luma Refinement**: Inside each chroma run the luma row is scanned at full
//     resolution against the brightness floor. A chroma run can therefore split
//     into several `ColorRun`s, but a `ColorRun` never crosses a chroma boundary.
// 3.  **No Allocation**: Both scanners write into caller-owned vectors that are
//     cleared, never shrunk. Once those vectors have been reserved for the widest
//     frame, scanning a row does not touch the allocator.

use crate::core_modules::blob_forest::{BlobSetIndex, UNLABELED};
use crate::core_modules::blob_stats::Coord;
use serde::{Deserialize, Serialize};

/// The color window a pixel must fall inside to count as part of a blob.
/// The chroma bounds are inclusive; luma has only a lower bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorThresholds {
    pub y_low: u8,
    pub u_low: u8,
    pub u_high: u8,
    pub v_low: u8,
    pub v_high: u8,
}

impl Default for ColorThresholds {
    /// Accepts every pixel.
    fn default() -> Self {
        Self {
            y_low: 0,
            u_low: 0,
            u_high: u8::MAX,
            v_low: 0,
            v_high: u8::MAX,
        }
    }
}

impl ColorThresholds {
    pub fn new(y_low: u8, u_low: u8, u_high: u8, v_low: u8, v_high: u8) -> Self {
        Self {
            y_low,
            u_low,
            u_high,
            v_low,
            v_high,
        }
    }

    /// Builds a window from per-channel `[y, u, v]` minimums and maximums.
    /// The luma maximum is not used by the detector.
    pub fn from_yuv_bounds(min: [u8; 3], max: [u8; 3]) -> Self {
        Self::new(min[0], min[1], max[1], min[2], max[2])
    }

    #[inline]
    pub fn chroma_matches(&self, u: u8, v: u8) -> bool {
        (self.u_low..=self.u_high).contains(&u) && (self.v_low..=self.v_high).contains(&v)
    }
}

/// A half-open span of luma columns whose 2x2 chroma blocks are all in range.
/// `low` and `high` are always even.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChromaRun {
    pub low: Coord,
    pub high: Coord,
}

/// A half-open span `[low, high)` of in-range pixels on one row, tagged with
/// the blob set it has been attached to (`UNLABELED` until it touches a run on
/// an adjacent row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorRun {
    pub low: Coord,
    pub high: Coord,
    pub(crate) set: BlobSetIndex,
}

impl ColorRun {
    pub fn new(low: Coord, high: Coord) -> Self {
        Self {
            low,
            high,
            set: UNLABELED,
        }
    }

    pub fn len(&self) -> u32 {
        u32::from(self.high - self.low)
    }

    pub fn is_empty(&self) -> bool {
        self.high <= self.low
    }

    /// The blob set this run belongs to, or `UNLABELED`.
    pub fn set(&self) -> BlobSetIndex {
        self.set
    }

    /// True when the two runs share at least one column.
    #[inline]
    pub fn overlaps(&self, other: &ColorRun) -> bool {
        self.low < other.high && other.low < self.high
    }
}

/// Finds the chroma runs of one chroma row. `u_row` and `v_row` hold `cols / 2`
/// samples each; the emitted runs are in luma columns.
pub fn scan_chroma_row(
    u_row: &[u8],
    v_row: &[u8],
    thresholds: &ColorThresholds,
    runs: &mut Vec<ChromaRun>,
) {
    debug_assert_eq!(u_row.len(), v_row.len());
    runs.clear();
    let width = u_row.len();
    let in_range = |c: usize| thresholds.chroma_matches(u_row[c], v_row[c]);

    let mut c = 0;
    while c < width {
        if !in_range(c) {
            c += 1;
            continue;
        }
        let start = c;
        while c < width && in_range(c) {
            c += 1;
        }
        // The run ends after the odd column of its last chroma block.
        runs.push(ChromaRun {
            low: (start * 2) as Coord,
            high: (c * 2) as Coord,
        });
    }
}

/// Splits each chroma run into luma runs where `y_row[x] >= y_low`.
pub fn scan_luma_row(y_row: &[u8], chroma_runs: &[ChromaRun], y_low: u8, runs: &mut Vec<ColorRun>) {
    runs.clear();
    for chroma in chroma_runs {
        let high = usize::from(chroma.high);
        let mut x = usize::from(chroma.low);
        while x < high {
            if y_row[x] < y_low {
                x += 1;
                continue;
            }
            let start = x;
            while x < high && y_row[x] >= y_low {
                x += 1;
            }
            runs.push(ColorRun::new(start as Coord, x as Coord));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window() -> ColorThresholds {
        ColorThresholds::new(100, 90, 130, 140, 200)
    }

    #[test]
    fn chroma_runs_cover_whole_blocks() {
        let u = [100, 100, 50, 100, 100, 100, 200, 100];
        let v = [150, 150, 150, 150, 150, 150, 150, 150];
        let mut runs = Vec::with_capacity(8);
        scan_chroma_row(&u, &v, &window(), &mut runs);
        assert_eq!(
            runs,
            vec![
                ChromaRun { low: 0, high: 4 },
                ChromaRun { low: 6, high: 12 },
                ChromaRun { low: 14, high: 16 },
            ]
        );
    }

    #[test]
    fn chroma_bounds_are_inclusive() {
        let thresholds = window();
        assert!(thresholds.chroma_matches(90, 140));
        assert!(thresholds.chroma_matches(130, 200));
        assert!(!thresholds.chroma_matches(89, 150));
        assert!(!thresholds.chroma_matches(100, 201));
    }

    #[test]
    fn luma_splits_chroma_runs() {
        //           0    1    2    3   4    5    6    7    8    9
        let y = [200, 200, 10, 150, 99, 100, 255, 255, 255, 255];
        let chroma = [ChromaRun { low: 0, high: 6 }, ChromaRun { low: 8, high: 10 }];
        let mut runs = Vec::with_capacity(6);
        scan_luma_row(&y, &chroma, 100, &mut runs);
        let spans: Vec<_> = runs.iter().map(|r| (r.low, r.high)).collect();
        assert_eq!(spans, vec![(0, 2), (3, 4), (5, 6), (8, 10)]);
        assert!(runs.iter().all(|r| r.set() == UNLABELED));
    }

    #[test]
    fn runs_are_disjoint_and_ordered() {
        let y: Vec<u8> = (0..64).map(|x| if x % 3 == 0 { 0 } else { 200 }).collect();
        let chroma = [ChromaRun { low: 0, high: 30 }, ChromaRun { low: 34, high: 64 }];
        let mut runs = Vec::with_capacity(33);
        scan_luma_row(&y, &chroma, 100, &mut runs);
        assert!(!runs.is_empty());
        for pair in runs.windows(2) {
            assert!(pair[0].low < pair[0].high);
            assert!(pair[0].high < pair[1].low, "runs must not touch or overlap");
        }
    }

    #[test]
    fn overlap_requires_a_shared_column() {
        let a = ColorRun::new(2, 6);
        assert!(a.overlaps(&ColorRun::new(5, 9)));
        assert!(!a.overlaps(&ColorRun::new(6, 9)));
        assert!(!a.overlaps(&ColorRun::new(0, 2)));
    }
}
