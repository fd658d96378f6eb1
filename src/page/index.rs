/// Cube-sphere quadtree page indexing
///
/// Pages are numbered breadth-first across all six faces: the six roots are
/// 0..6, and the children of page `i` are `6 + 4i + k` for `k` in 0..4. Within
/// a depth, the pages of one face are contiguous and ordered by the
/// interleaved bits of their row and column, row bit high.

use std::fmt;
use crate::constants::layout::{CHILDREN_PER_PAGE, FACE_COUNT, MAX_DEPTH};

/// Stable 64-bit page identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PageIndex(pub u64);

/// First page index at `depth`: 6 * (4^d - 1) / 3
#[inline]
fn first_at_depth(depth: u32) -> u64 {
    2 * ((1u64 << (2 * depth)) - 1)
}

/// Number of pages at `depth` across all faces
#[inline]
pub fn pages_at_depth(depth: u32) -> u64 {
    FACE_COUNT << (2 * depth)
}

impl PageIndex {
    /// Root page of a cube face
    pub fn root(face: u32) -> Self {
        debug_assert!((face as u64) < FACE_COUNT);
        PageIndex(face as u64)
    }

    /// Page at the given face, depth and row/column within the face
    pub fn from_face_row_col(face: u32, depth: u32, row: u64, col: u64) -> Option<Self> {
        if face as u64 >= FACE_COUNT || depth > MAX_DEPTH {
            return None;
        }
        let side = 1u64 << depth;
        if row >= side || col >= side {
            return None;
        }

        let mut local = 0u64;
        for bit in (0..depth).rev() {
            let k = (((row >> bit) & 1) << 1) | ((col >> bit) & 1);
            local = local * CHILDREN_PER_PAGE + k;
        }

        Some(PageIndex(
            first_at_depth(depth) + ((face as u64) << (2 * depth)) + local,
        ))
    }

    pub fn is_root(self) -> bool {
        self.0 < FACE_COUNT
    }

    /// Child `k` (0..4); `None` past the deepest representable level
    pub fn child(self, k: u32) -> Option<Self> {
        debug_assert!((k as u64) < CHILDREN_PER_PAGE);
        if self.depth() >= MAX_DEPTH {
            return None;
        }
        Some(PageIndex(FACE_COUNT + CHILDREN_PER_PAGE * self.0 + k as u64))
    }

    pub fn children(self) -> Option<[PageIndex; 4]> {
        Some([self.child(0)?, self.child(1)?, self.child(2)?, self.child(3)?])
    }

    pub fn parent(self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            Some(PageIndex((self.0 - FACE_COUNT) / CHILDREN_PER_PAGE))
        }
    }

    /// Which of its parent's four children this page is
    pub fn child_slot(self) -> Option<u32> {
        if self.is_root() {
            None
        } else {
            Some(((self.0 - FACE_COUNT) % CHILDREN_PER_PAGE) as u32)
        }
    }

    pub fn depth(self) -> u32 {
        let mut depth = 0;
        while depth < MAX_DEPTH && self.0 >= first_at_depth(depth + 1) {
            depth += 1;
        }
        depth
    }

    fn local(self) -> (u32, u64) {
        let depth = self.depth();
        (depth, self.0 - first_at_depth(depth))
    }

    pub fn face(self) -> u32 {
        let (depth, local) = self.local();
        (local >> (2 * depth)) as u32
    }

    /// Row within the face at this page's depth
    pub fn row(self) -> u64 {
        self.row_col().0
    }

    /// Column within the face at this page's depth
    pub fn col(self) -> u64 {
        self.row_col().1
    }

    pub fn row_col(self) -> (u64, u64) {
        let (depth, local) = self.local();
        let mut row = 0;
        let mut col = 0;
        for bit in 0..depth {
            let k = local >> (2 * bit);
            row |= ((k >> 1) & 1) << bit;
            col |= (k & 1) << bit;
        }
        (row, col)
    }

    /// Ancestors from the parent up to the face root
    pub fn ancestors(self) -> Ancestors {
        Ancestors { next: self.parent() }
    }
}

impl fmt::Display for PageIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageIndex {
    fn from(value: u64) -> Self {
        PageIndex(value)
    }
}

/// Iterator over a page's ancestors, nearest first
pub struct Ancestors {
    next: Option<PageIndex>,
}

impl Iterator for Ancestors {
    type Item = PageIndex;

    fn next(&mut self) -> Option<PageIndex> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roots() {
        for face in 0..6 {
            let root = PageIndex::root(face);
            assert!(root.is_root());
            assert_eq!(root.depth(), 0);
            assert_eq!(root.face(), face);
            assert_eq!(root.parent(), None);
        }
    }

    #[test]
    fn test_child_parent_relation() {
        let root = PageIndex::root(2);
        let children = root.children().unwrap();
        assert_eq!(children[0], PageIndex(14));
        assert_eq!(children[3], PageIndex(17));
        for (k, child) in children.iter().enumerate() {
            assert_eq!(child.parent(), Some(root));
            assert_eq!(child.child_slot(), Some(k as u32));
            assert_eq!(child.depth(), 1);
            assert_eq!(child.face(), 2);
        }
    }

    #[test]
    fn test_depth_boundaries() {
        assert_eq!(PageIndex(5).depth(), 0);
        assert_eq!(PageIndex(6).depth(), 1);
        assert_eq!(PageIndex(29).depth(), 1);
        assert_eq!(PageIndex(30).depth(), 2);
        assert_eq!(pages_at_depth(2), 96);
    }

    #[test]
    fn test_row_col_round_trip_at_depth_three() {
        for face in [0, 5] {
            for row in 0..8 {
                for col in 0..8 {
                    let page = PageIndex::from_face_row_col(face, 3, row, col).unwrap();
                    assert_eq!(page.depth(), 3);
                    assert_eq!(page.face(), face);
                    assert_eq!(page.row_col(), (row, col));
                }
            }
        }
    }

    #[test]
    fn test_child_quadrant_layout() {
        let root = PageIndex::root(1);
        // k = (row << 1) | col
        assert_eq!(root.child(0).unwrap().row_col(), (0, 0));
        assert_eq!(root.child(1).unwrap().row_col(), (0, 1));
        assert_eq!(root.child(2).unwrap().row_col(), (1, 0));
        assert_eq!(root.child(3).unwrap().row_col(), (1, 1));
    }

    #[test]
    fn test_ancestors_nearest_first() {
        let page = PageIndex::from_face_row_col(4, 3, 5, 2).unwrap();
        let chain: Vec<_> = page.ancestors().collect();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain[0], page.parent().unwrap());
        assert_eq!(chain[2], PageIndex::root(4));
        assert_eq!(chain[1].row_col(), (1, 0));
    }

    #[test]
    fn test_out_of_range_coordinates() {
        assert!(PageIndex::from_face_row_col(6, 0, 0, 0).is_none());
        assert!(PageIndex::from_face_row_col(0, 2, 4, 0).is_none());
        assert!(PageIndex::from_face_row_col(0, MAX_DEPTH + 1, 0, 0).is_none());
    }
}
