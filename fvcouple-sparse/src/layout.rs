use crate::BackendError;
use std::ops::Range;

/// The global rows owned by a single partition.
///
/// Owned rows are stored as sorted, disjoint, non-empty ranges. Local row indices enumerate
/// the owned rows in increasing global order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    global_size: usize,
    ranges: Vec<Range<usize>>,
    // offsets[i] is the local index of ranges[i].start, with a final entry holding the total
    offsets: Vec<usize>,
}

impl RowLayout {
    pub fn try_new(
        global_size: usize,
        ranges: impl IntoIterator<Item = Range<usize>>,
    ) -> Result<Self, BackendError> {
        let mut ranges: Vec<_> = ranges.into_iter().filter(|r| !r.is_empty()).collect();
        ranges.sort_unstable_by_key(|r| r.start);

        for pair in ranges.windows(2) {
            if pair[0].end > pair[1].start {
                return Err(BackendError::InvalidLayout {
                    reason: format!("ranges {:?} and {:?} overlap", pair[0], pair[1]),
                });
            }
        }
        if let Some(last) = ranges.last() {
            if last.end > global_size {
                return Err(BackendError::InvalidLayout {
                    reason: format!("range {last:?} exceeds global size {global_size}"),
                });
            }
        }

        let mut offsets = Vec::with_capacity(ranges.len() + 1);
        offsets.push(0);
        for range in &ranges {
            offsets.push(offsets.last().unwrap() + range.len());
        }

        Ok(Self {
            global_size,
            ranges,
            offsets,
        })
    }

    /// A layout owning all rows `0 .. global_size`.
    pub fn serial(global_size: usize) -> Self {
        Self::try_new(global_size, [0..global_size]).expect("A single range is always valid")
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    pub fn num_local_rows(&self) -> usize {
        *self.offsets.last().unwrap()
    }

    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Returns the local index of the given global row, if it is owned.
    pub fn local_index(&self, global_row: usize) -> Option<usize> {
        let idx = self.ranges.partition_point(|r| r.end <= global_row);
        let range = self.ranges.get(idx)?;
        range
            .contains(&global_row)
            .then(|| self.offsets[idx] + (global_row - range.start))
    }

    /// Returns the global row corresponding to the given local index.
    pub fn global_index(&self, local_row: usize) -> Option<usize> {
        if local_row >= self.num_local_rows() {
            return None;
        }
        let idx = self.offsets.partition_point(|&offset| offset <= local_row) - 1;
        Some(self.ranges[idx].start + (local_row - self.offsets[idx]))
    }

    pub fn owns(&self, global_row: usize) -> bool {
        self.local_index(global_row).is_some()
    }

    /// Owned global rows in local order.
    pub fn global_rows(&self) -> impl '_ + Iterator<Item = usize> {
        self.ranges.iter().cloned().flatten()
    }
}

/// The owned row ranges of every partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnershipTable {
    global_size: usize,
    // (range, owner rank), sorted by range start
    owners: Vec<(Range<usize>, usize)>,
}

impl OwnershipTable {
    pub fn try_from_rank_ranges(
        global_size: usize,
        rank_ranges: impl IntoIterator<Item = Vec<Range<usize>>>,
    ) -> Result<Self, BackendError> {
        let mut owners: Vec<_> = rank_ranges
            .into_iter()
            .enumerate()
            .flat_map(|(rank, ranges)| ranges.into_iter().map(move |r| (r, rank)))
            .filter(|(r, _)| !r.is_empty())
            .collect();
        owners.sort_unstable_by_key(|(r, _)| r.start);

        for pair in owners.windows(2) {
            let ((a, rank_a), (b, rank_b)) = (&pair[0], &pair[1]);
            if a.end > b.start {
                return Err(BackendError::InvalidLayout {
                    reason: format!("range {a:?} of rank {rank_a} overlaps range {b:?} of rank {rank_b}"),
                });
            }
        }
        if let Some((last, rank)) = owners.last() {
            if last.end > global_size {
                return Err(BackendError::InvalidLayout {
                    reason: format!("range {last:?} of rank {rank} exceeds global size {global_size}"),
                });
            }
        }

        Ok(Self { global_size, owners })
    }

    pub fn global_size(&self) -> usize {
        self.global_size
    }

    /// Returns the rank owning the given global row.
    pub fn owner(&self, global_row: usize) -> Option<usize> {
        let idx = self.owners.partition_point(|(r, _)| r.end <= global_row);
        let (range, rank) = self.owners.get(idx)?;
        range.contains(&global_row).then_some(*rank)
    }

    /// Whether every global row is owned by some rank.
    pub fn is_complete(&self) -> bool {
        let owned: usize = self.owners.iter().map(|(r, _)| r.len()).sum();
        owned == self.global_size
    }
}
