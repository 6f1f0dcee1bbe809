// THEORY:
// The `BlobForest` is the connectivity engine behind the detector. It is a
// disjoint-set (union-find) forest whose nodes are small integer handles, paired
// with a dense list holding the statistics of every current root.
//
// Key architectural principles:
// 1.  **Handles, not Pointers**: Every node is a `u16` index into a preallocated
//     table. Handle 0 is a reserved sentinel meaning "unlabeled", which lets a
//     freshly scanned run carry its membership in a single integer.
// 2.  **Union by Rank, Path Compression**: `find_root` flattens every path it
//     walks, and `link` hangs the shallower tree under the deeper one, so the
//     amortized cost of both is effectively constant.
// 3.  **Root-Only Statistics**: Only roots own a `BlobStats`. The root list is kept
//     dense: when a root stops being a root its statistics are folded into the
//     new parent and the last entry of the list is moved into the vacated slot.
//     A back-reference on each set entry keeps the two tables in agreement.
// 4.  **Bounded Capacity**: Both tables are sized once. When either is exhausted
//     `make_set` hands back the sentinel and bumps an overflow counter; the runs
//     involved simply stay unlabeled and detection carries on.
// 5.  **Frame Lifetime**: `reset` empties both tables without touching the
//     allocator, so one forest serves an unbounded stream of frames.

use crate::core_modules::blob_stats::{BlobStats, Coord};
use crate::core_modules::color_run::ColorRun;
use crate::error::{BlobError, BlobResult};

/// A handle into the blob-set table.
pub type BlobSetIndex = u16;
/// A position in the dense root list.
pub type RootListIndex = u16;

/// The reserved handle carried by runs that belong to no set yet.
pub const UNLABELED: BlobSetIndex = 0;

const NOT_A_ROOT: RootListIndex = RootListIndex::MAX;

#[derive(Debug, Clone, Copy)]
struct BlobSetEntry {
    parent: BlobSetIndex,
    /// Position of this set's statistics in the root list, or `NOT_A_ROOT`.
    root_index: RootListIndex,
    rank: u16,
}

impl Default for BlobSetEntry {
    fn default() -> Self {
        Self {
            parent: UNLABELED,
            root_index: NOT_A_ROOT,
            rank: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct RootEntry {
    stats: BlobStats,
    set_index: BlobSetIndex,
}

/// A fixed-capacity union-find forest of pixel runs with per-root statistics.
#[derive(Debug)]
pub struct BlobForest {
    sets: Box<[BlobSetEntry]>,
    used_sets: usize,
    roots: Box<[RootEntry]>,
    used_roots: usize,
    overflow_count: u32,
}

impl BlobForest {
    /// Preallocates room for `max_runs` set entries (plus the sentinel) and
    /// `max_blobs` simultaneous roots.
    pub fn new(max_runs: u16, max_blobs: u16) -> BlobResult<Self> {
        let sets = preallocate("blob-set", usize::from(max_runs) + 1)?;
        // The root list must stay addressable below the `NOT_A_ROOT` marker.
        let roots = preallocate("root-list", usize::from(max_blobs.min(NOT_A_ROOT - 1)))?;
        let mut forest = Self {
            sets,
            used_sets: 1,
            roots,
            used_roots: 0,
            overflow_count: 0,
        };
        forest.reset();
        Ok(forest)
    }

    /// Empties the forest for a new frame. Capacity is unchanged.
    pub fn reset(&mut self) {
        self.sets[0] = BlobSetEntry::default();
        self.used_sets = 1;
        self.used_roots = 0;
        self.overflow_count = 0;
    }

    pub fn max_runs(&self) -> usize {
        self.sets.len() - 1
    }

    pub fn max_blobs(&self) -> usize {
        self.roots.len()
    }

    /// Number of set entries handed out since the last reset.
    pub fn set_count(&self) -> usize {
        self.used_sets - 1
    }

    /// Number of live roots, i.e. distinct blobs.
    pub fn blob_count(&self) -> usize {
        self.used_roots
    }

    /// How many times `make_set` has failed since the last reset.
    pub fn overflow_count(&self) -> u32 {
        self.overflow_count
    }

    /// Statistics of every live blob, in root-list order.
    pub fn blobs(&self) -> impl ExactSizeIterator<Item = &BlobStats> + '_ {
        self.roots[..self.used_roots].iter().map(|root| &root.stats)
    }

    pub fn blob(&self, index: usize) -> Option<&BlobStats> {
        self.roots[..self.used_roots].get(index).map(|root| &root.stats)
    }

    /// The statistics owned by `root`, if it is a live root.
    pub fn root_stats(&self, root: BlobSetIndex) -> Option<&BlobStats> {
        self.live_root_index(root).map(|rx| &self.roots[rx].stats)
    }

    /// Starts a new singleton set seeded with `run`. Returns `UNLABELED` and
    /// records an overflow when either table is full.
    pub fn make_set(&mut self, row: Coord, run: &ColorRun) -> BlobResult<BlobSetIndex> {
        check_run(run)?;
        Ok(self.new_set(row, run))
    }

    fn new_set(&mut self, row: Coord, run: &ColorRun) -> BlobSetIndex {
        if self.used_sets >= self.sets.len() || self.used_roots >= self.roots.len() {
            self.overflow_count = self.overflow_count.saturating_add(1);
            return UNLABELED;
        }
        let bx = self.used_sets;
        self.used_sets += 1;
        let rx = self.used_roots;
        self.used_roots += 1;

        self.sets[bx] = BlobSetEntry {
            parent: bx as BlobSetIndex,
            root_index: NOT_A_ROOT,
            rank: 0,
        };
        self.roots[rx].stats = BlobStats::from_run(row, run.low, run.high);
        self.bind_root(rx, bx);
        bx as BlobSetIndex
    }

    /// Returns the root of the set containing `handle`, compressing the path.
    pub fn find_root(&mut self, handle: BlobSetIndex) -> BlobResult<BlobSetIndex> {
        self.check_handle(handle)?;
        Ok(self.find_root_unchecked(handle))
    }

    /// Merges the sets rooted at `a` and `b` and returns the surviving root.
    /// Both handles must be live roots.
    pub fn union(&mut self, a: BlobSetIndex, b: BlobSetIndex) -> BlobResult<BlobSetIndex> {
        for handle in [a, b] {
            self.check_handle(handle)?;
            if handle == UNLABELED {
                return Err(BlobError::InvalidHandle {
                    handle,
                    used: self.used_sets,
                });
            }
            if self.live_root_index(handle).is_none() {
                return Err(BlobError::NotARoot { handle });
            }
        }
        if a == b {
            return Ok(a);
        }
        Ok(self.link(a, b))
    }

    /// Folds `run` on `row` into the statistics of `root`, which must be a live root.
    pub fn add_run_to_root(&mut self, root: BlobSetIndex, row: Coord, run: &ColorRun) -> BlobResult<()> {
        check_run(run)?;
        self.check_handle(root)?;
        let rx = self
            .live_root_index(root)
            .ok_or(BlobError::NotARoot { handle: root })?;
        self.roots[rx].stats.add_run(row, run.low, run.high);
        Ok(())
    }

    fn grow_root(&mut self, root: BlobSetIndex, row: Coord, run: &ColorRun) {
        let rx = self.sets[usize::from(root)].root_index;
        debug_assert_ne!(rx, NOT_A_ROOT, "statistics live on roots only");
        self.roots[usize::from(rx)].stats.add_run(row, run.low, run.high);
    }

    /// Connects two vertically adjacent runs that share a column, labeling both
    /// with the root of the merged set. Both runs must come from the current
    /// frame's scan: their labels are trusted as-is.
    pub(crate) fn union_runs(&mut self, a_row: Coord, a: &mut ColorRun, b_row: Coord, b: &mut ColorRun) {
        let root = match (a.set, b.set) {
            (UNLABELED, UNLABELED) => {
                let root = self.new_set(a_row, a);
                if root != UNLABELED {
                    self.grow_root(root, b_row, b);
                }
                root
            }
            (UNLABELED, member) => {
                let root = self.find_root_unchecked(member);
                self.grow_root(root, a_row, a);
                root
            }
            (member, UNLABELED) => {
                let root = self.find_root_unchecked(member);
                self.grow_root(root, b_row, b);
                root
            }
            (a_set, b_set) => {
                let a_root = self.find_root_unchecked(a_set);
                let b_root = self.find_root_unchecked(b_set);
                if a_root == b_root {
                    return;
                }
                self.link(a_root, b_root)
            }
        };
        a.set = root;
        b.set = root;
    }

    /// Total pixels across all live blobs.
    pub fn total_pixel_count(&self) -> u64 {
        self.blobs().map(|stats| u64::from(stats.count)).sum()
    }

    /// Orders the root list by descending pixel count.
    pub fn sort_by_size(&mut self) {
        let used = self.used_roots;
        self.roots[..used].sort_unstable_by(|a, b| b.stats.count.cmp(&a.stats.count));
        for rx in 0..used {
            let bx = self.roots[rx].set_index;
            self.sets[usize::from(bx)].root_index = rx as RootListIndex;
        }
    }

    /// Drops every blob smaller than `min_pixels`, keeping the relative order of
    /// the rest. Returns the number of blobs kept.
    pub fn purge_small(&mut self, min_pixels: u32) -> usize {
        let mut kept = 0;
        for rx in 0..self.used_roots {
            let entry = self.roots[rx];
            let set = &mut self.sets[usize::from(entry.set_index)];
            if entry.stats.count >= min_pixels {
                set.root_index = kept as RootListIndex;
                self.roots[kept] = entry;
                kept += 1;
            } else {
                set.root_index = NOT_A_ROOT;
            }
        }
        self.used_roots = kept;
        kept
    }

    /// Sorts by size, then writes `min_x, min_y, max_x, max_y` for the largest
    /// blobs into `out`. At most `max_elements` values are written (whole boxes
    /// only) and never more than `out` holds. Returns the number of values written.
    pub fn copy_top_bounding_boxes(&mut self, max_elements: usize, out: &mut [u16]) -> usize {
        self.sort_by_size();
        let limit = max_elements.min(out.len());
        let mut written = 0;
        for (root, slot) in self.roots[..self.used_roots]
            .iter()
            .zip(out[..limit].chunks_exact_mut(4))
        {
            slot.copy_from_slice(&root.stats.bounding_box().to_array());
            written += 4;
        }
        written
    }

    /// Sorts by size, then copies the statistics of the largest blobs into `out`,
    /// bounded by both `max_entries` and `out.len()`. Returns the number copied.
    pub fn copy_top_stats(&mut self, max_entries: usize, out: &mut [BlobStats]) -> usize {
        self.sort_by_size();
        let count = self.used_roots.min(max_entries).min(out.len());
        for (slot, root) in out[..count].iter_mut().zip(&self.roots[..count]) {
            *slot = root.stats;
        }
        count
    }

    pub(crate) fn find_root_unchecked(&mut self, handle: BlobSetIndex) -> BlobSetIndex {
        let mut root = handle;
        while self.sets[usize::from(root)].parent != root {
            root = self.sets[usize::from(root)].parent;
        }
        // Non-root nodes carry no statistics, so re-parenting them is a plain store.
        let mut node = handle;
        while node != root {
            let next = self.sets[usize::from(node)].parent;
            self.sets[usize::from(node)].parent = root;
            node = next;
        }
        root
    }

    fn link(&mut self, a: BlobSetIndex, b: BlobSetIndex) -> BlobSetIndex {
        let a_rank = self.sets[usize::from(a)].rank;
        let b_rank = self.sets[usize::from(b)].rank;
        if a_rank > b_rank {
            self.set_parent(b, a);
            a
        } else {
            if a_rank == b_rank {
                self.sets[usize::from(b)].rank += 1;
            }
            self.set_parent(a, b);
            b
        }
    }

    /// Hangs `child` under `parent`. If `child` was a root its statistics move to
    /// `parent` and its root-list slot is released.
    fn set_parent(&mut self, child: BlobSetIndex, parent: BlobSetIndex) {
        let child_rx = self.sets[usize::from(child)].root_index;
        if child_rx != NOT_A_ROOT {
            let parent_rx = self.sets[usize::from(parent)].root_index;
            debug_assert_ne!(parent_rx, NOT_A_ROOT);
            let child_stats = self.roots[usize::from(child_rx)].stats;
            self.roots[usize::from(parent_rx)].stats.merge(&child_stats);
            self.release_root(usize::from(child_rx));
            self.sets[usize::from(child)].root_index = NOT_A_ROOT;
        }
        self.sets[usize::from(child)].parent = parent;
    }

    /// Removes root-list slot `rx` by moving the last entry into it.
    fn release_root(&mut self, rx: usize) {
        let last = self.used_roots - 1;
        if rx != last {
            self.roots[rx] = self.roots[last];
            let moved = self.roots[rx].set_index;
            self.sets[usize::from(moved)].root_index = rx as RootListIndex;
        }
        self.used_roots = last;
    }

    fn bind_root(&mut self, rx: usize, bx: usize) {
        self.roots[rx].set_index = bx as BlobSetIndex;
        self.sets[bx].root_index = rx as RootListIndex;
    }

    fn check_handle(&self, handle: BlobSetIndex) -> BlobResult<()> {
        if usize::from(handle) < self.used_sets {
            Ok(())
        } else {
            Err(BlobError::InvalidHandle {
                handle,
                used: self.used_sets,
            })
        }
    }

    fn live_root_index(&self, handle: BlobSetIndex) -> Option<usize> {
        if handle == UNLABELED || usize::from(handle) >= self.used_sets {
            return None;
        }
        let entry = &self.sets[usize::from(handle)];
        (entry.parent == handle && entry.root_index != NOT_A_ROOT).then_some(usize::from(entry.root_index))
    }

    #[cfg(test)]
    pub(crate) fn storage_ptrs(&self) -> (*const u8, *const u8) {
        (self.sets.as_ptr().cast(), self.roots.as_ptr().cast())
    }

    /// Panics if the set table and the root list disagree.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        for (rx, root) in self.roots[..self.used_roots].iter().enumerate() {
            let entry = &self.sets[usize::from(root.set_index)];
            assert_eq!(usize::from(entry.root_index), rx, "stale back-reference");
            assert_eq!(entry.parent, root.set_index, "statistics on a non-root");
        }
        let owners = self.sets[1..self.used_sets]
            .iter()
            .filter(|entry| entry.root_index != NOT_A_ROOT)
            .count();
        assert_eq!(owners, self.used_roots, "orphaned root-list entries");
    }
}

fn check_run(run: &ColorRun) -> BlobResult<()> {
    if run.is_empty() {
        return Err(BlobError::EmptyRun {
            low: run.low,
            high: run.high,
        });
    }
    Ok(())
}

fn preallocate<T: Default + Clone>(what: &'static str, entries: usize) -> BlobResult<Box<[T]>> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(entries)
        .map_err(|_| BlobError::Allocation { what, entries })?;
    storage.resize(entries, T::default());
    Ok(storage.into_boxed_slice())
}
