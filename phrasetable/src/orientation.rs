//! Reordering orientation of a phrase pair relative to its neighbours.
//!
//! Orientations are found by growing a consistent alignment block from the
//! cell diagonally adjacent to the phrase pair: a block that can be grown
//! after (or before) the phrase on both sides is monotonic, one that crosses
//! it is a swap, anything else is discontinuous.

use serde::{Deserialize, Serialize};

use mmt_core::Alignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Orientation {
    Monotonic = 0,
    Swap = 1,
    DiscontinuousLeft = 2,
    DiscontinuousRight = 3,
    None = 4,
}

pub const ORIENTATION_COUNT: usize = 5;

impl Orientation {
    pub const ALL: [Orientation; ORIENTATION_COUNT] = [
        Orientation::Monotonic,
        Orientation::Swap,
        Orientation::DiscontinuousLeft,
        Orientation::DiscontinuousRight,
        Orientation::None,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrientationCounts {
    pub forward: [u32; ORIENTATION_COUNT],
    pub backward: [u32; ORIENTATION_COUNT],
}

impl OrientationCounts {
    pub fn add(&mut self, forward: Orientation, backward: Orientation) {
        self.forward[forward.index()] += 1;
        self.backward[backward.index()] += 1;
    }

    pub fn forward_count(&self, orientation: Orientation) -> u32 {
        self.forward[orientation.index()]
    }

    pub fn backward_count(&self, orientation: Orientation) -> u32 {
        self.backward[orientation.index()]
    }
}

/// Alignment of one sentence pair indexed both ways, rows are source words.
#[derive(Debug, Clone)]
pub struct AlignmentMatrix {
    row2col: Vec<Vec<usize>>,
    col2row: Vec<Vec<usize>>,
}

impl AlignmentMatrix {
    /// Points outside `source_len` x `target_len` are ignored.
    pub fn new(alignment: &Alignment, source_len: usize, target_len: usize) -> Self {
        let mut row2col = vec![Vec::new(); source_len];
        let mut col2row = vec![Vec::new(); target_len];
        for &(s, t) in alignment {
            let (s, t) = (s as usize, t as usize);
            if s < source_len && t < target_len {
                row2col[s].push(t);
                col2row[t].push(s);
            }
        }
        for cells in row2col.iter_mut().chain(col2row.iter_mut()) {
            cells.sort_unstable();
            cells.dedup();
        }
        Self { row2col, col2row }
    }

    pub fn rows(&self) -> usize {
        self.row2col.len()
    }

    pub fn cols(&self) -> usize {
        self.col2row.len()
    }

    /// Grows a block from the seed `(row, col)` within the hard limits
    /// `top..=bot` x `lft..=rgt`. Returns the number of alignment points in
    /// the block, `None` if it cannot be grown without crossing a limit.
    pub fn expand_block(
        &self,
        mut row: usize,
        mut col: usize,
        top: usize,
        lft: usize,
        bot: usize,
        rgt: usize,
    ) -> Option<usize> {
        if row < top || row > bot || col < lft || col > rgt {
            return None;
        }
        if row >= self.rows() || col >= self.cols() {
            return None;
        }
        let (r2c, c2r) = (&self.row2col, &self.col2row);

        if r2c[row].is_empty() && c2r[col].is_empty() {
            if row == top {
                while row < bot && row + 1 < r2c.len() {
                    row += 1;
                    if !r2c[row].is_empty() {
                        break;
                    }
                }
            } else if row == bot {
                while row > top {
                    row -= 1;
                    if !r2c[row].is_empty() {
                        break;
                    }
                }
            }
            if col == lft {
                while col < rgt && col + 1 < c2r.len() {
                    col += 1;
                    if !c2r[col].is_empty() {
                        break;
                    }
                }
            } else if col == rgt {
                while col > lft {
                    col -= 1;
                    if !c2r[col].is_empty() {
                        break;
                    }
                }
            }
            if r2c[row].is_empty() && c2r[col].is_empty() {
                return Some(0);
            }
        }
        if r2c[row].is_empty() {
            row = c2r[col][0];
        }
        if c2r[col].is_empty() {
            col = r2c[row][0];
        }

        let (mut t, mut b) = bounds(&c2r[col])?;
        let (mut l, mut r) = bounds(&r2c[row])?;
        if t < top || b > bot || l < lft || r > rgt {
            return None;
        }
        if b == t && r == l {
            return Some(1);
        }

        let (mut rs, mut re, mut cs, mut ce) = (row, row, col, col);
        loop {
            let mut added = 0;
            while rs > t {
                rs -= 1;
                grow(&r2c[rs], lft, rgt, &mut l, &mut r, &mut added)?;
            }
            while re < b {
                re += 1;
                grow(&r2c[re], lft, rgt, &mut l, &mut r, &mut added)?;
            }
            while cs > l {
                cs -= 1;
                grow(&c2r[cs], top, bot, &mut t, &mut b, &mut added)?;
            }
            while ce < r {
                ce += 1;
                grow(&c2r[ce], top, bot, &mut t, &mut b, &mut added)?;
            }
            if added == 0 {
                return Some((rs..=re).map(|row| r2c[row].len()).sum());
            }
        }
    }

    /// Orientation of the block following the phrase pair covering source
    /// `s1..e1` and ending at target `e2`.
    pub fn forward_orientation(&self, s1: usize, e1: usize, mut e2: usize) -> Orientation {
        let cols = self.cols();
        if e2 >= cols {
            return Orientation::Monotonic;
        }
        let last_row = self.rows().saturating_sub(1);
        if e1 < self.rows() && self.expand_block(e1, e2, e1, e2, last_row, cols - 1).is_some() {
            return Orientation::Monotonic;
        }
        if s1 > 0 && self.expand_block(s1 - 1, e2, 0, e2, s1 - 1, cols - 1).is_some() {
            return Orientation::Swap;
        }
        while e2 < cols && self.col2row[e2].is_empty() {
            e2 += 1;
        }
        match self.col2row.get(e2).and_then(|rows| bounds(rows)) {
            Some((_, last)) if last < s1 => Orientation::DiscontinuousLeft,
            Some((first, _)) if first >= e1 => Orientation::DiscontinuousRight,
            _ => Orientation::None,
        }
    }

    /// Orientation of the block preceding the phrase pair covering source
    /// `s1..e1` and starting at target `s2`.
    pub fn backward_orientation(&self, s1: usize, e1: usize, s2: usize) -> Orientation {
        match (s1, s2) {
            (0, 0) => return Orientation::Monotonic,
            (_, 0) => return Orientation::DiscontinuousRight,
            (0, _) => return Orientation::DiscontinuousLeft,
            _ => {}
        }
        if self.expand_block(s1 - 1, s2 - 1, 0, 0, s1 - 1, s2 - 1).is_some() {
            return Orientation::Monotonic;
        }
        let last_row = self.rows().saturating_sub(1);
        if self.expand_block(e1, s2 - 1, e1, 0, last_row, s2 - 1).is_some() {
            return Orientation::Swap;
        }
        let previous = (0..s2).rev().find(|&col| !self.col2row[col].is_empty());
        match previous.and_then(|col| bounds(&self.col2row[col])) {
            Some((_, last)) if last < s1 => Orientation::DiscontinuousRight,
            Some((first, _)) if first >= e1 => Orientation::DiscontinuousLeft,
            _ => Orientation::None,
        }
    }
}

fn bounds(cells: &[usize]) -> Option<(usize, usize)> {
    Some((*cells.first()?, *cells.last()?))
}

/// Widens `lo..=hi` to cover `cells`; fails when the result crosses the
/// hard limits `min..=max`, or when `cells` is an unaligned row or column.
fn grow(cells: &[usize], min: usize, max: usize, lo: &mut usize, hi: &mut usize, added: &mut usize) -> Option<()> {
    let (first, last) = bounds(cells)?;
    if *lo > first {
        *lo = first;
        if first < min {
            return None;
        }
    }
    if *hi < last {
        *hi = last;
        if last > max {
            return None;
        }
    }
    *added += cells.len();
    Some(())
}
