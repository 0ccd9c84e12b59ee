//! Per-segment statistics and collection figures.

use std::collections::BTreeMap;

use crate::types::{FileId, Tick};

/// Alive/dead bookkeeping of one log segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatafileStatistics {
    /// Document markers that are the visible revision.
    pub number_alive: u64,
    /// Document markers superseded or removed.
    pub number_dead: u64,
    /// Bytes of alive markers.
    pub size_alive: u64,
    /// Bytes of dead markers.
    pub size_dead: u64,
    /// Remove markers in the segment.
    pub number_deletions: u64,
    /// Smallest tick seen, 0 if none.
    pub tick_min: Tick,
    /// Largest tick seen.
    pub tick_max: Tick,
}

impl DatafileStatistics {
    /// Extends the tick range by `tick`.
    pub fn observe_tick(&mut self, tick: Tick) {
        if self.tick_min == 0 || tick < self.tick_min {
            self.tick_min = tick;
        }
        self.tick_max = self.tick_max.max(tick);
    }

    fn add_alive(&mut self, size: u64) {
        self.number_alive += 1;
        self.size_alive += size;
    }

    fn kill(&mut self, size: u64) {
        self.number_alive = self.number_alive.saturating_sub(1);
        self.size_alive = self.size_alive.saturating_sub(size);
        self.number_dead += 1;
        self.size_dead += size;
    }
}

/// Statistics of every segment, keyed by file id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentStatistics {
    segments: BTreeMap<FileId, DatafileStatistics>,
}

impl SegmentStatistics {
    /// Empty statistics.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Statistics of one segment.
    #[must_use]
    pub fn get(&self, fid: FileId) -> Option<&DatafileStatistics> {
        self.segments.get(&fid)
    }

    /// Every segment in file order.
    pub fn iter(&self) -> impl Iterator<Item = (FileId, &DatafileStatistics)> {
        self.segments.iter().map(|(fid, stats)| (*fid, stats))
    }

    /// Number of segments with statistics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True if no segment was seen.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Records any marker at `tick` in `fid`.
    pub fn observe(&mut self, fid: FileId, tick: Tick) {
        self.segments.entry(fid).or_default().observe_tick(tick);
    }

    /// A new visible revision of `size` bytes in `fid`.
    pub fn alive(&mut self, fid: FileId, size: u64) {
        self.segments.entry(fid).or_default().add_alive(size);
    }

    /// The revision of `size` bytes in `fid` was superseded.
    pub fn dead(&mut self, fid: FileId, size: u64) {
        self.segments.entry(fid).or_default().kill(size);
    }

    /// A remove marker in `fid`.
    pub fn deletion(&mut self, fid: FileId) {
        self.segments.entry(fid).or_default().number_deletions += 1;
    }

    /// Sum over all segments.
    #[must_use]
    pub fn total(&self) -> DatafileStatistics {
        self.segments.values().fold(DatafileStatistics::default(), |mut acc, s| {
            acc.number_alive += s.number_alive;
            acc.number_dead += s.number_dead;
            acc.size_alive += s.size_alive;
            acc.size_dead += s.size_dead;
            acc.number_deletions += s.number_deletions;
            if s.tick_min != 0 {
                acc.observe_tick(s.tick_min);
            }
            acc.tick_max = acc.tick_max.max(s.tick_max);
            acc
        })
    }
}

/// Point-in-time figures of a collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectionFigures {
    /// Alive document markers.
    pub alive_count: u64,
    /// Bytes of alive markers.
    pub alive_size: u64,
    /// Dead document markers.
    pub dead_count: u64,
    /// Bytes of dead markers.
    pub dead_size: u64,
    /// Remove markers.
    pub deletions: u64,
    /// Segments with statistics.
    pub datafile_count: usize,
    /// Indexes, primary included.
    pub index_count: usize,
    /// Memory used by all indexes.
    pub index_memory: usize,
    /// Largest tick seen.
    pub last_tick: Tick,
    /// Live documents.
    pub document_count: u64,
}
