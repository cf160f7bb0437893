//! Dirty-region bookkeeping for descriptors.
//!
//! A [`Region`] is the union of every rectangle added to it, stored as a set
//! of pairwise-disjoint rectangles so the covered area can be uploaded
//! without touching any texel twice. [`ByteRanges`] is the one-dimensional
//! counterpart used by buffers.

/// Axis-aligned rectangle in texel coordinates. For 3D textures `z`/`depth`
/// select the slice range; 1D and 2D rectangles use `z = 0, depth = 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            z: 0,
            width,
            height,
            depth: 1,
        }
    }

    pub const fn new_3d(x: u32, y: u32, z: u32, width: u32, height: u32, depth: u32) -> Self {
        Self {
            x,
            y,
            z,
            width,
            height,
            depth,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.depth == 0
    }

    pub fn volume(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    fn x1(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    fn y1(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    fn z1(&self) -> u32 {
        self.z.saturating_add(self.depth)
    }

    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let z0 = self.z.max(other.z);
        let x1 = self.x1().min(other.x1());
        let y1 = self.y1().min(other.y1());
        let z1 = self.z1().min(other.z1());
        (x0 < x1 && y0 < y1 && z0 < z1)
            .then(|| Rect::new_3d(x0, y0, z0, x1 - x0, y1 - y0, z1 - z0))
    }

    /// Clamp to `(0, 0, 0) .. size`.
    pub fn clamped(&self, size: (u32, u32, u32)) -> Option<Rect> {
        self.intersection(&Rect::new_3d(0, 0, 0, size.0, size.1, size.2))
    }

    pub fn union_bounds(&self, other: &Rect) -> Rect {
        let x0 = self.x.min(other.x);
        let y0 = self.y.min(other.y);
        let z0 = self.z.min(other.z);
        let x1 = self.x1().max(other.x1());
        let y1 = self.y1().max(other.y1());
        let z1 = self.z1().max(other.z1());
        Rect::new_3d(x0, y0, z0, x1 - x0, y1 - y0, z1 - z0)
    }

    /// `self` minus `other`, as up to six disjoint boxes.
    fn subtract(&self, other: &Rect, out: &mut Vec<Rect>) {
        let Some(hole) = self.intersection(other) else {
            out.push(*self);
            return;
        };
        // slabs in front of and behind the hole
        if hole.z > self.z {
            out.push(Rect::new_3d(self.x, self.y, self.z, self.width, self.height, hole.z - self.z));
        }
        if hole.z1() < self.z1() {
            out.push(Rect::new_3d(self.x, self.y, hole.z1(), self.width, self.height, self.z1() - hole.z1()));
        }
        // rows above and below, limited to the hole's depth
        if hole.y > self.y {
            out.push(Rect::new_3d(self.x, self.y, hole.z, self.width, hole.y - self.y, hole.depth));
        }
        if hole.y1() < self.y1() {
            out.push(Rect::new_3d(self.x, hole.y1(), hole.z, self.width, self.y1() - hole.y1(), hole.depth));
        }
        // columns left and right of the hole
        if hole.x > self.x {
            out.push(Rect::new_3d(self.x, hole.y, hole.z, hole.x - self.x, hole.height, hole.depth));
        }
        if hole.x1() < self.x1() {
            out.push(Rect::new_3d(hole.x1(), hole.y, hole.z, self.x1() - hole.x1(), hole.height, hole.depth));
        }
    }
}

/// Union of rectangles, kept as disjoint pieces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `rect` to the union. Only the part not already covered is stored.
    pub fn add(&mut self, rect: Rect) {
        if rect.is_empty() {
            return;
        }
        let mut pieces = vec![rect];
        let mut scratch = Vec::new();
        for existing in &self.rects {
            scratch.clear();
            for piece in &pieces {
                piece.subtract(existing, &mut scratch);
            }
            std::mem::swap(&mut pieces, &mut scratch);
            if pieces.is_empty() {
                return;
            }
        }
        self.rects.extend(pieces);
    }

    pub fn merge(&mut self, other: &Region) {
        for rect in &other.rects {
            self.add(*rect);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    /// Number of texels covered by the union.
    pub fn volume(&self) -> u64 {
        self.rects.iter().map(Rect::volume).sum()
    }

    pub fn bounds(&self) -> Option<Rect> {
        let mut iter = self.rects.iter();
        let first = *iter.next()?;
        Some(iter.fold(first, |acc, r| acc.union_bounds(r)))
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }
}

/// Sorted, non-overlapping, non-adjacent half-open byte ranges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRanges {
    ranges: Vec<std::ops::Range<usize>>,
}

impl ByteRanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, range: std::ops::Range<usize>) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        let mut out = Vec::with_capacity(self.ranges.len() + 1);
        let mut inserted = false;
        for r in self.ranges.drain(..) {
            if r.end < merged.start {
                out.push(r);
            } else if merged.end < r.start {
                if !inserted {
                    out.push(merged.clone());
                    inserted = true;
                }
                out.push(r);
            } else {
                merged = merged.start.min(r.start)..merged.end.max(r.end);
            }
        }
        if !inserted {
            out.push(merged);
        }
        self.ranges = out;
    }

    pub fn merge(&mut self, other: &ByteRanges) {
        for r in &other.ranges {
            self.add(r.clone());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn ranges(&self) -> &[std::ops::Range<usize>] {
        &self.ranges
    }

    pub fn total_len(&self) -> usize {
        self.ranges.iter().map(|r| r.len()).sum()
    }
}

/// One pending-change accumulator per render thread.
///
/// Every render thread consumes changes at its own pace, so a change is
/// recorded in every existing slot and a slot is emptied only by its own
/// thread through [`take`](Self::take). A slot created after a change was
/// recorded starts empty; the mirror object for that thread does a full
/// upload on first sync anyway.
#[derive(Debug, Clone, Default)]
pub struct PerThread<T> {
    slots: Vec<T>,
}

impl<T: Default> PerThread<T> {
    pub fn new(threads: usize) -> Self {
        Self {
            slots: (0..threads).map(|_| T::default()).collect(),
        }
    }

    pub fn for_each(&mut self, mut f: impl FnMut(&mut T)) {
        self.slots.iter_mut().for_each(&mut f);
    }

    pub fn take(&mut self, thread: usize) -> T {
        if thread >= self.slots.len() {
            self.slots.resize_with(thread + 1, T::default);
        }
        std::mem::take(&mut self.slots[thread])
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = T::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rects_at_the_coordinate_limit_saturate() {
        let edge = Rect::new(u32::MAX - 1, 0, 10, 4);
        assert_eq!(edge.clamped((16, 16, 1)), None);
        assert_eq!(
            edge.intersection(&Rect::new(u32::MAX - 4, 0, 8, 8)),
            Some(Rect::new(u32::MAX - 1, 0, 1, 4))
        );
        let mut region = Region::new();
        region.add(edge);
        region.add(Rect::new(u32::MAX - 2, 0, 10, 4));
        assert_eq!(region.volume(), 10 * 4 + 4);
    }

    #[test]
    fn overlapping_rects_cover_their_union() {
        let mut region = Region::new();
        region.add(Rect::new(0, 0, 10, 10));
        region.add(Rect::new(5, 5, 10, 10));
        region.add(Rect::new(2, 2, 3, 3));
        assert_eq!(region.volume(), 100 + 100 - 25);
        assert_eq!(region.bounds(), Some(Rect::new(0, 0, 15, 15)));

        let rects = region.rects();
        for (i, a) in rects.iter().enumerate() {
            for b in &rects[i + 1..] {
                assert!(a.intersection(b).is_none(), "{a:?} overlaps {b:?}");
            }
        }
    }

    #[test]
    fn covered_rect_adds_nothing() {
        let mut region = Region::new();
        region.add(Rect::new(0, 0, 8, 8));
        region.add(Rect::new(1, 1, 2, 2));
        assert_eq!(region.rects().len(), 1);
        region.add(Rect::new(0, 0, 0, 4));
        assert_eq!(region.volume(), 64);
    }

    #[test]
    fn boxes_subtract_in_depth() {
        let mut region = Region::new();
        region.add(Rect::new_3d(0, 0, 0, 4, 4, 4));
        region.add(Rect::new_3d(2, 2, 2, 4, 4, 4));
        assert_eq!(region.volume(), 64 + 64 - 8);
    }

    #[test]
    fn byte_ranges_merge_overlaps_and_neighbours() {
        let mut ranges = ByteRanges::new();
        ranges.add(10..20);
        ranges.add(30..40);
        ranges.add(15..25);
        assert_eq!(ranges.ranges(), &[10..25, 30..40]);
        ranges.add(25..30);
        assert_eq!(ranges.ranges(), &[10..40]);
        ranges.add(0..2);
        assert_eq!(ranges.ranges(), &[0..2, 10..40]);
        assert_eq!(ranges.total_len(), 32);
    }

    #[test]
    fn per_thread_slots_are_independent() {
        let mut slots: PerThread<Region> = PerThread::new(2);
        slots.for_each(|r| r.add(Rect::new(0, 0, 2, 2)));
        assert_eq!(slots.take(0).volume(), 4);
        assert!(slots.take(0).is_empty());
        assert_eq!(slots.take(1).volume(), 4);
        assert!(slots.take(5).is_empty());
    }
}
