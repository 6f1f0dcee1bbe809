// THEORY:
// `BlobStats` is the rolling summary kept for every live blob. It is the only
// per-blob state that survives a frame, so it is deliberately small and `Copy`:
// a bounding box, the coordinate sums needed for a center of mass, and a pixel
// count.
//
// Key architectural principles:
// 1.  **Run Granularity**: Statistics are never updated per pixel. A horizontal
//     run of `n` pixels contributes its whole extent at once, and the x-sum of the
//     run is the closed form of an arithmetic series.
// 2.  **Mergeable**: Two summaries of disjoint pixel sets combine by min/max on the
//     extents and addition on the sums. This is what lets the union-find forest
//     fold one blob into another in constant time.
// 3.  **Stateless Data Container**: Like the rest of the per-frame output, a
//     `BlobStats` has no memory of previous frames.

use serde::{Deserialize, Serialize};

/// A pixel coordinate. Frames are limited to 16-bit dimensions.
pub type Coord = u16;

/// An inclusive, axis-aligned rectangle in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: Coord,
    pub min_y: Coord,
    pub max_x: Coord,
    pub max_y: Coord,
}

impl BoundingBox {
    /// The packed wire order: `min_x, min_y, max_x, max_y`.
    pub fn to_array(self) -> [Coord; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn from_array(values: [Coord; 4]) -> Self {
        Self {
            min_x: values[0],
            min_y: values[1],
            max_x: values[2],
            max_y: values[3],
        }
    }

    pub fn width(&self) -> u32 {
        u32::from(self.max_x) - u32::from(self.min_x) + 1
    }

    pub fn height(&self) -> u32 {
        u32::from(self.max_y) - u32::from(self.min_y) + 1
    }

    pub fn contains(&self, x: Coord, y: Coord) -> bool {
        (self.min_x..=self.max_x).contains(&x) && (self.min_y..=self.max_y).contains(&y)
    }
}

/// Rolling statistics for one connected region of in-range pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlobStats {
    pub min_x: Coord,
    pub max_x: Coord,
    pub min_y: Coord,
    pub max_y: Coord,
    /// Sum of the x coordinate of every pixel in the blob.
    pub sum_x: u64,
    /// Sum of the y coordinate of every pixel in the blob.
    pub sum_y: u64,
    /// Number of pixels in the blob.
    pub count: u32,
}

impl BlobStats {
    /// Statistics for the single run `[low, high)` on `row`.
    pub fn from_run(row: Coord, low: Coord, high: Coord) -> Self {
        debug_assert!(low < high, "a run covers at least one pixel");
        let width = u64::from(high - low);
        Self {
            min_x: low,
            max_x: high - 1,
            min_y: row,
            max_y: row,
            sum_x: run_x_sum(low, high),
            sum_y: u64::from(row) * width,
            count: width as u32,
        }
    }

    /// Folds the run `[low, high)` on `row` into these statistics.
    pub fn add_run(&mut self, row: Coord, low: Coord, high: Coord) {
        debug_assert!(low < high, "a run covers at least one pixel");
        let width = u64::from(high - low);
        self.min_x = self.min_x.min(low);
        self.max_x = self.max_x.max(high - 1);
        self.min_y = self.min_y.min(row);
        self.max_y = self.max_y.max(row);
        self.sum_x += run_x_sum(low, high);
        self.sum_y += u64::from(row) * width;
        self.count += width as u32;
    }

    /// Absorbs the statistics of a disjoint pixel set.
    pub fn merge(&mut self, other: &BlobStats) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.sum_x += other.sum_x;
        self.sum_y += other.sum_y;
        self.count += other.count;
    }

    /// The center of mass, rounded to the nearest pixel. `None` for an empty blob.
    pub fn centroid(&self) -> Option<(u32, u32)> {
        if self.count == 0 {
            return None;
        }
        let count = u64::from(self.count);
        let cx = (self.sum_x + count / 2) / count;
        let cy = (self.sum_y + count / 2) / count;
        Some((cx as u32, cy as u32))
    }

    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x,
            min_y: self.min_y,
            max_x: self.max_x,
            max_y: self.max_y,
        }
    }
}

/// Sum of `low + (low + 1) + ... + (high - 1)`.
fn run_x_sum(low: Coord, high: Coord) -> u64 {
    let (low, high) = (u64::from(low), u64::from(high));
    (low + high - 1) * (high - low) / 2
}
