//! # Group Availability Map
//!
//! A quad-tree over physical frames, stored as one packed bitmap per level.
//!
//! ```text
//! level 2   [            g0            ][            g1            ] ...
//! level 1   [  g0  ][  g1  ][  g2  ][  g3  ][  g4  ][  g5  ] ...
//! level 0   f0 f1 f2 f3 f4 f5 f6 f7 f8 ...
//! ```
//!
//! Group `g` at level `s` covers frames `[g·4^s, (g+1)·4^s)`. For every group
//! the map stores an availability code ([`Avail`]): `0` if nothing beneath is
//! free, otherwise `order + 1` of the largest free block beneath it.
//!
//! Codes are 1 bit wide at level 0, 2 bits at level 1 and 4 bits above, so a
//! `u64` word holds 64, 32 or 16 codes respectively.

use core::fmt;
use kernel_info::memory::MAX_PAGE_ORDER;

/// Upper bound on the number of tree levels.
pub const MAX_LEVELS: usize = 16;

/// A level of the group tree; level 0 groups are single frames.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Level(u8);

impl Level {
    /// Single frames.
    pub const FRAME: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn new(v: u8) -> Self {
        debug_assert!((v as usize) < MAX_LEVELS);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Width of one code at this level.
    #[inline]
    const fn bits(self) -> u32 {
        match self.0 {
            0 => 1,
            1 => 2,
            _ => 4,
        }
    }

    #[inline]
    const fn codes_per_word(self) -> usize {
        (u64::BITS / self.bits()) as usize
    }

    #[inline]
    const fn mask(self) -> u64 {
        (1 << self.bits()) - 1
    }

    /// `(word index, bit offset)` of `group`'s code.
    #[inline]
    const fn slot(self, group: usize) -> (usize, u32) {
        let per_word = self.codes_per_word();
        #[allow(clippy::cast_possible_truncation)]
        let offset = (group % per_word) as u32 * self.bits();
        (group / per_word, offset)
    }

    /// Words needed to hold `groups` codes at this level.
    #[inline]
    #[must_use]
    pub const fn words_for(self, groups: usize) -> usize {
        groups.div_ceil(self.codes_per_word())
    }

    /// The code of a group at this level that is free as a whole.
    #[inline]
    #[must_use]
    pub const fn whole_free(self) -> Avail {
        Avail::clipped(2 * self.0 + 1)
    }

    /// The level above.
    #[inline]
    #[must_use]
    pub const fn parent(self) -> Self {
        Self::new(self.0 + 1)
    }

    /// The level below. Must not be called on [`Level::FRAME`].
    #[inline]
    #[must_use]
    pub const fn child(self) -> Self {
        Self(self.0 - 1)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Availability code of one group.
///
/// `0` means nothing beneath the group is free; `v > 0` means a free block of
/// order `v - 1` exists beneath it.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Avail(u8);

impl Avail {
    /// Nothing free.
    pub const NONE: Self = Self(0);

    /// Largest representable code.
    pub const MAX: Self = Self(MAX_PAGE_ORDER + 1);

    #[inline]
    #[must_use]
    pub const fn new(v: u8) -> Self {
        Self(v)
    }

    /// `v` capped at [`Avail::MAX`].
    #[inline]
    #[must_use]
    pub const fn clipped(v: u8) -> Self {
        if v > Self::MAX.0 { Self::MAX } else { Self(v) }
    }

    /// Code of a free block of `order`.
    #[inline]
    #[must_use]
    pub const fn free_block(order: u8) -> Self {
        Self::clipped(order + 1)
    }

    #[inline]
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Code of a level-`level` group derived from its four children.
    ///
    /// If every child is free as a whole, the parent is free as a whole
    /// (clipped at [`Avail::MAX`]); otherwise it inherits the best child code.
    #[must_use]
    pub fn merge(level: Level, children: [Self; 4]) -> Self {
        debug_assert!(level > Level::FRAME);
        let child_whole_free = 2 * (level.0 - 1) + 1;
        if children.iter().all(|c| c.0 == child_whole_free) {
            return Self::clipped(2 * level.0 + 1);
        }
        children.into_iter().max().unwrap_or(Self::NONE)
    }
}

/// Shape of one level of the tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct LevelLayout {
    pub level: Level,
    /// Number of groups at this level.
    pub groups: usize,
    /// Number of `u64` words backing this level.
    pub words: usize,
}

/// Shape of the whole tree for a given frame count.
///
/// Starting with one group per frame, a level exists while it has at least
/// four groups; the next level has `ceil(groups / 4)` groups. The last
/// generated level is the top of the tree.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TreeLayout {
    levels: [LevelLayout; MAX_LEVELS],
    len: usize,
}

/// The frame count cannot be covered by a tree.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum TreeLayoutError {
    #[error("{0} frames are too few for a group tree (need at least 4)")]
    TooFewFrames(usize),
    #[error("{0} frames need more than 16 tree levels")]
    TooManyLevels(usize),
}

impl TreeLayout {
    /// # Errors
    /// [`TreeLayoutError`] if fewer than 4 frames are given or the tree would
    /// need more than [`MAX_LEVELS`] levels.
    pub fn new(frame_count: usize) -> Result<Self, TreeLayoutError> {
        if frame_count < 4 {
            return Err(TreeLayoutError::TooFewFrames(frame_count));
        }

        let empty = LevelLayout {
            level: Level::FRAME,
            groups: 0,
            words: 0,
        };
        let mut levels = [empty; MAX_LEVELS];
        let mut len = 0;
        let mut groups = frame_count;
        while groups >= 4 {
            if len == MAX_LEVELS {
                return Err(TreeLayoutError::TooManyLevels(frame_count));
            }
            #[allow(clippy::cast_possible_truncation)]
            let level = Level::new(len as u8);
            levels[len] = LevelLayout {
                level,
                groups,
                words: level.words_for(groups),
            };
            len += 1;
            groups = groups.div_ceil(4);
        }

        Ok(Self { levels, len })
    }

    /// All levels, bottom to top.
    #[must_use]
    pub fn levels(&self) -> &[LevelLayout] {
        &self.levels[..self.len]
    }

    /// The top level (`max_group_size`).
    #[must_use]
    pub fn max_level(&self) -> Level {
        self.levels[self.len - 1].level
    }

    /// Number of groups at the top level.
    #[must_use]
    pub fn top_groups(&self) -> usize {
        self.levels[self.len - 1].groups
    }

    #[must_use]
    pub fn total_words(&self) -> usize {
        self.levels().iter().map(|l| l.words).sum()
    }
}

/// Packed per-level availability codes.
///
/// Accesses are not bounds-checked against the tree shape beyond slice
/// indexing; callers only address groups that exist.
pub struct GroupAvailabilityMap<'m> {
    levels: [&'m mut [u64]; MAX_LEVELS],
}

impl<'m> GroupAvailabilityMap<'m> {
    /// Split `storage` into per-level bitmaps following `layout` and clear
    /// them, so that every group starts out as fully allocated.
    ///
    /// ### Panics
    /// If `storage` is shorter than [`TreeLayout::total_words`].
    #[must_use]
    pub fn new(storage: &'m mut [u64], layout: &TreeLayout) -> Self {
        let mut levels: [&'m mut [u64]; MAX_LEVELS] = core::array::from_fn(|_| Default::default());
        let mut rest = storage;
        for l in layout.levels() {
            let (head, tail) = core::mem::take(&mut rest).split_at_mut(l.words);
            head.fill(0);
            levels[usize::from(l.level.get())] = head;
            rest = tail;
        }
        Self { levels }
    }

    #[inline]
    #[must_use]
    pub fn get(&self, group: usize, level: Level) -> Avail {
        let (word, offset) = level.slot(group);
        #[allow(clippy::cast_possible_truncation)]
        let code = ((self.levels[usize::from(level.0)][word] >> offset) & level.mask()) as u8;
        Avail(code)
    }

    #[inline]
    pub fn set(&mut self, group: usize, level: Level, avail: Avail) {
        debug_assert!(u64::from(avail.0) <= level.mask());
        let (word, offset) = level.slot(group);
        let entry = &mut self.levels[usize::from(level.0)][word];
        *entry &= !(level.mask() << offset);
        *entry |= u64::from(avail.0) << offset;
    }

    /// Codes of the four level-`level - 1` children of `group`.
    #[inline]
    #[must_use]
    pub fn children(&self, group: usize, level: Level) -> [Avail; 4] {
        let child = level.child();
        [0, 1, 2, 3].map(|i| self.get(4 * group + i, child))
    }

    /// Set `count` consecutive groups starting at `first` to `avail`.
    pub fn fill(&mut self, level: Level, first: usize, count: usize, avail: Avail) {
        for group in first..first + count {
            self.set(group, level, avail);
        }
    }

    /// Number of set bits at level 0, i.e. free frames.
    #[must_use]
    pub fn free_frames(&self) -> usize {
        self.levels[0].iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Render codes `range` of `level` as one hex digit each.
    #[must_use]
    pub fn row(&self, level: Level, range: core::ops::Range<usize>) -> Row<'_, 'm> {
        Row {
            map: self,
            level,
            range,
        }
    }
}

/// [`fmt::Display`] of a run of codes at one level, without allocating.
pub struct Row<'a, 'm> {
    map: &'a GroupAvailabilityMap<'m>,
    level: Level,
    range: core::ops::Range<usize>,
}

impl fmt::Display for Row<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for group in self.range.clone() {
            write!(f, "{:x}", self.map.get(group, self.level).get())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_for_sixteen_frames() {
        let layout = TreeLayout::new(16).unwrap();
        assert_eq!(layout.max_level(), Level::new(1));
        assert_eq!(layout.top_groups(), 4);
        assert_eq!(
            layout.levels(),
            &[
                LevelLayout {
                    level: Level::new(0),
                    groups: 16,
                    words: 1
                },
                LevelLayout {
                    level: Level::new(1),
                    groups: 4,
                    words: 1
                },
            ]
        );
    }

    #[test]
    fn layout_rounds_partial_groups_up() {
        let layout = TreeLayout::new(1025).unwrap();
        let groups: Vec<_> = layout.levels().iter().map(|l| l.groups).collect();
        assert_eq!(groups, [1025, 257, 65, 17, 5]);
        let words: Vec<_> = layout.levels().iter().map(|l| l.words).collect();
        assert_eq!(words, [17, 9, 5, 2, 1]);
        assert_eq!(layout.total_words(), 34);
        assert_eq!(layout.max_level(), Level::new(4));
    }

    #[test]
    fn layout_rejects_tiny_memory() {
        assert_eq!(TreeLayout::new(3), Err(TreeLayoutError::TooFewFrames(3)));
        assert!(TreeLayout::new(4).is_ok());
    }

    #[test]
    fn packed_codes_do_not_clobber_neighbours() {
        let layout = TreeLayout::new(256).unwrap();
        let mut storage = vec![u64::MAX; layout.total_words()];
        let mut map = GroupAvailabilityMap::new(&mut storage, &layout);

        let l0 = Level::new(0);
        let l1 = Level::new(1);
        let l2 = Level::new(2);

        map.set(63, l0, Avail::new(1));
        map.set(64, l0, Avail::new(1));
        map.set(31, l1, Avail::new(3));
        map.set(4, l2, Avail::new(5));
        map.set(5, l2, Avail::new(0xf));

        assert_eq!(map.get(62, l0), Avail::NONE);
        assert_eq!(map.get(63, l0), Avail::new(1));
        assert_eq!(map.get(64, l0), Avail::new(1));
        assert_eq!(map.get(30, l1), Avail::NONE);
        assert_eq!(map.get(31, l1), Avail::new(3));
        assert_eq!(map.get(32, l1), Avail::NONE);
        assert_eq!(map.get(3, l2), Avail::NONE);
        assert_eq!(map.get(4, l2), Avail::new(5));
        assert_eq!(map.get(5, l2), Avail::new(0xf));
        assert_eq!(map.get(6, l2), Avail::NONE);

        map.set(4, l2, Avail::new(2));
        assert_eq!(map.get(4, l2), Avail::new(2));
        assert_eq!(map.get(5, l2), Avail::new(0xf));
        assert_eq!(map.free_frames(), 2);
    }

    #[test]
    fn new_map_is_fully_allocated() {
        let layout = TreeLayout::new(100).unwrap();
        let mut storage = vec![0xAAAA_AAAA_AAAA_AAAA; layout.total_words() + 3];
        let map = GroupAvailabilityMap::new(&mut storage, &layout);
        for l in layout.levels() {
            for g in 0..l.groups {
                assert_eq!(map.get(g, l.level), Avail::NONE);
            }
        }
        assert_eq!(map.free_frames(), 0);
    }

    #[test]
    fn merge_promotes_only_when_all_children_are_whole() {
        let l1 = Level::new(1);
        let one = Avail::new(1);
        assert_eq!(Avail::merge(l1, [one; 4]), Avail::new(3));
        assert_eq!(Avail::merge(l1, [one, one, one, Avail::NONE]), one);
        assert_eq!(Avail::merge(l1, [Avail::NONE; 4]), Avail::NONE);

        let l2 = Level::new(2);
        let three = Avail::new(3);
        assert_eq!(Avail::merge(l2, [three; 4]), Avail::new(5));
        assert_eq!(Avail::merge(l2, [three, three, one, three]), three);
    }

    #[test]
    fn merge_clips_at_max_order() {
        let l5 = Level::new(5);
        assert_eq!(Avail::merge(l5, [Avail::new(9); 4]), Avail::MAX);

        let l6 = Level::new(6);
        assert_eq!(Avail::merge(l6, [Avail::MAX; 4]), Avail::MAX);

        let l7 = Level::new(7);
        assert_eq!(Avail::merge(l7, [Avail::MAX; 4]), Avail::MAX);
        assert_eq!(l7.whole_free(), Avail::MAX);
    }

    #[test]
    fn row_renders_hex_codes() {
        let layout = TreeLayout::new(64).unwrap();
        let mut storage = vec![0; layout.total_words()];
        let mut map = GroupAvailabilityMap::new(&mut storage, &layout);
        let l2 = Level::new(2);
        map.set(1, l2, Avail::new(5));
        map.set(3, l2, Avail::new(0xb));
        assert_eq!(map.row(l2, 0..4).to_string(), "050b");
    }
}
