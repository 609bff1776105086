//! Selectively-acknowledged byte range tracking (TCP SACK option, RFC 2018).

use crate::seq;

/// A single selectively-acknowledged byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SackRange {
    pub start: u32,
    pub end: u32,
}

impl SackRange {
    fn width(&self) -> u32 {
        self.end.wrapping_sub(self.start)
    }

    fn touches_or_overlaps(&self, other: &SackRange) -> bool {
        !seq::after(self.start, other.end) && !seq::after(other.start, self.end)
    }

    fn union(&self, other: &SackRange) -> SackRange {
        let start = if seq::before(self.start, other.start) { self.start } else { other.start };
        let end = if seq::after(self.end, other.end) { self.end } else { other.end };
        SackRange { start, end }
    }
}

/// A sorted, coalesced set of SACK ranges plus byte accounting.
///
/// The option block of a captured packet can be truncated, so the number of
/// blocks the TCP header *declared* (`num_sacks_captured`) may exceed the
/// number actually stored here.
#[derive(Debug, Clone, Default)]
pub struct TcpSacks {
    ranges: Vec<SackRange>,
    num_sacks_captured: u32,
    num_bytes: u32,
}

impl TcpSacks {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn num_sacks_captured(&self) -> u32 {
        self.num_sacks_captured
    }

    pub fn num_bytes(&self) -> u32 {
        self.num_bytes
    }

    pub fn ranges(&self) -> &[SackRange] {
        &self.ranges
    }

    /// Decodes a SACK option. `opt_size` is the option's declared total
    /// length (kind + length + blocks, per the TCP option header);
    /// `captured` holds whatever bytes of the block body actually made it
    /// into the capture (which may be fewer than `opt_size - 2` if the
    /// capture snap length truncated the packet).
    ///
    /// Returns `Err(())` if the option is malformed: the block body isn't an
    /// 8-byte-aligned size, or it declares more than the maximum five blocks
    /// (40 option bytes).
    pub fn parse(opt_size: usize, captured: &[u8]) -> Result<TcpSacks, ()> {
        if opt_size < 2 {
            return Err(());
        }
        let body_len = opt_size - 2;
        if body_len % 8 != 0 || opt_size > 40 {
            return Err(());
        }

        let mut sacks = TcpSacks { num_sacks_captured: (body_len / 8) as u32, ..Default::default() };
        let available_blocks = captured.len() / 8;
        let declared_blocks = sacks.num_sacks_captured as usize;
        for i in 0..available_blocks.min(declared_blocks) {
            let off = i * 8;
            let start = u32::from_be_bytes(captured[off..off + 4].try_into().unwrap());
            let end = u32::from_be_bytes(captured[off + 4..off + 8].try_into().unwrap());
            sacks.add(SackRange { start, end });
        }
        Ok(sacks)
    }

    /// Inserts a single range, merging with any overlapping or adjacent
    /// range and keeping the list sorted by start. Always leaves
    /// `num_bytes()` consistent with the resulting set.
    pub fn add(&mut self, new_range: SackRange) {
        let mut insert_at = self.ranges.len();
        let mut merged = new_range;
        let mut i = 0;
        while i < self.ranges.len() {
            if self.ranges[i].touches_or_overlaps(&merged) {
                merged = merged.union(&self.ranges[i]);
                self.ranges.remove(i);
                continue;
            }
            if seq::before(merged.end, self.ranges[i].start) && insert_at == self.ranges.len() {
                insert_at = i;
            }
            i += 1;
        }
        let pos = insert_at.min(self.ranges.len());
        self.ranges.insert(pos, merged);
        self.merge();
        self.update_num_bytes();
    }

    /// Adds every range from `other`, merging as it goes.
    pub fn add_all(&mut self, other: &TcpSacks) {
        for range in &other.ranges {
            self.add(*range);
        }
    }

    /// Coalesces adjacent/overlapping ranges in place. `add` already keeps
    /// the set coalesced, so this is mostly useful after bulk mutation.
    pub fn merge(&mut self) {
        self.ranges.sort_by(|a, b| {
            if a.start == b.start {
                std::cmp::Ordering::Equal
            } else if seq::before(a.start, b.start) {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Greater
            }
        });
        let mut merged: Vec<SackRange> = Vec::with_capacity(self.ranges.len());
        for range in self.ranges.drain(..) {
            if let Some(last) = merged.last_mut() {
                if last.touches_or_overlaps(&range) {
                    *last = last.union(&range);
                    continue;
                }
            }
            merged.push(range);
        }
        self.ranges = merged;
        self.update_num_bytes();
    }

    /// Drops ranges fully covered by `seq_acked`, clipping the one range (if
    /// any) that straddles it.
    pub fn remove_acked(&mut self, seq_acked: u32) {
        let mut kept = Vec::with_capacity(self.ranges.len());
        for mut range in self.ranges.drain(..) {
            if !seq::after(range.end, seq_acked) {
                // Fully acked already; drop.
                continue;
            }
            if seq::after(seq_acked, range.start) {
                range.start = seq_acked;
            }
            kept.push(range);
        }
        self.ranges = kept;
        self.update_num_bytes();
    }

    fn update_num_bytes(&mut self) {
        self.num_bytes = self.ranges.iter().map(|r| r.width()).sum();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_merges_overlapping_ranges() {
        let mut sacks = TcpSacks::empty();
        sacks.add(SackRange { start: 100, end: 200 });
        sacks.add(SackRange { start: 150, end: 250 });
        assert_eq!(sacks.ranges(), &[SackRange { start: 100, end: 250 }]);
        assert_eq!(sacks.num_bytes(), 150);
    }

    #[test]
    fn add_keeps_disjoint_ranges_sorted() {
        let mut sacks = TcpSacks::empty();
        sacks.add(SackRange { start: 500, end: 600 });
        sacks.add(SackRange { start: 100, end: 200 });
        assert_eq!(
            sacks.ranges(),
            &[SackRange { start: 100, end: 200 }, SackRange { start: 500, end: 600 }]
        );
        assert_eq!(sacks.num_bytes(), 200);
    }

    #[test]
    fn remove_acked_clips_straddling_range() {
        let mut sacks = TcpSacks::empty();
        sacks.add(SackRange { start: 100, end: 300 });
        sacks.remove_acked(200);
        assert_eq!(sacks.ranges(), &[SackRange { start: 200, end: 300 }]);
        assert_eq!(sacks.num_bytes(), 100);
    }

    #[test]
    fn remove_acked_drops_fully_covered_ranges() {
        let mut sacks = TcpSacks::empty();
        sacks.add(SackRange { start: 100, end: 150 });
        sacks.add(SackRange { start: 400, end: 500 });
        sacks.remove_acked(200);
        assert_eq!(sacks.ranges(), &[SackRange { start: 400, end: 500 }]);
    }

    #[test]
    fn parse_rejects_misaligned_option() {
        assert!(TcpSacks::parse(11, &[0u8; 9]).is_err());
        assert!(TcpSacks::parse(42, &[0u8; 40]).is_err());
    }

    #[test]
    fn parse_tolerates_truncated_capture() {
        // Declares two blocks (18 bytes) but only one block's worth captured.
        let mut body = [0u8; 8];
        body[0..4].copy_from_slice(&100u32.to_be_bytes());
        body[4..8].copy_from_slice(&200u32.to_be_bytes());
        let sacks = TcpSacks::parse(18, &body).unwrap();
        assert_eq!(sacks.num_sacks_captured(), 2);
        assert_eq!(sacks.ranges().len(), 1);
    }
}
