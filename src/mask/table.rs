//! Mask table - per-stream interval store
//!
//! Classification inserts `(interval, policy)` entries per stream while the
//! table is open. `finalize()` merges compatible neighbours and freezes the
//! table; from then on packets are matched against it by sequence overlap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{MaskError, Result};
use crate::flow::StreamId;
use super::entry::{MaskEntry, MaskMatch};
use super::spec::{ByteRange, MaskSpec};

/// Size of the 32-bit TCP sequence space
pub const SEQ_SPACE: u64 = 1 << 32;

/// Entries of one stream, sorted by `seq_start`
#[derive(Debug, Default)]
struct StreamEntries {
    entries: Vec<MaskEntry>,
    /// Longest entry; bounds the backwards search window
    max_len: u64,
    /// Largest `seq_end`; tells whether the stream crosses 2^32
    max_end: u64,
}

impl StreamEntries {
    fn insert(&mut self, entry: MaskEntry) {
        let idx = self
            .entries
            .partition_point(|e| e.seq_start <= entry.seq_start);
        self.max_len = self.max_len.max(entry.len());
        self.max_end = self.max_end.max(entry.seq_end);
        self.entries.insert(idx, entry);
    }

    /// Merge runs of adjacent compatible entries; returns how many were folded
    ///
    /// Compatibility is judged between neighbours as inserted. The merged
    /// entry keeps every member's preserve-header ranges, shifted to its
    /// own start.
    fn merge_adjacent(&mut self) -> usize {
        let before = self.entries.len();
        let joins: Vec<bool> = self
            .entries
            .windows(2)
            .map(|w| w[0].can_merge_with(&w[1]))
            .collect();
        let mut merged: Vec<MaskEntry> = Vec::with_capacity(before);

        for (i, entry) in self.entries.drain(..).enumerate() {
            let joins_previous = i > 0 && joins[i - 1];
            if let Some(last) = merged.last_mut().filter(|_| joins_previous) {
                if fold_into(last, &entry) {
                    continue;
                }
            }
            merged.push(entry);
        }

        self.max_len = merged.iter().map(MaskEntry::len).max().unwrap_or(0);
        self.max_end = merged.iter().map(|e| e.seq_end).max().unwrap_or(0);
        self.entries = merged;
        before - self.entries.len()
    }

    /// Append matches for `[seq, seq + len)` in interval order
    fn collect<'a>(&'a self, seq: u64, len: usize, out: &mut Vec<MaskMatch<'a>>) {
        // Nothing is addressable past u64::MAX
        let end = seq.saturating_add(len as u64);
        // Nothing starting this far back can reach `seq`
        let lo = self
            .entries
            .partition_point(|e| e.seq_start.saturating_add(self.max_len) <= seq);
        let hi = self.entries.partition_point(|e| e.seq_start < end);

        for entry in self.entries[lo..hi.max(lo)].iter() {
            if entry.seq_end <= seq {
                continue;
            }
            out.push(MaskMatch {
                entry,
                packet_seq: seq,
                start: (entry.seq_start.max(seq) - seq) as usize,
                end: (entry.seq_end.min(end) - seq) as usize,
            });
        }
    }
}

/// Extend `last` over `next`, carrying `next`'s header ranges along
///
/// Returns false, leaving `last` untouched, when the shifted ranges do not
/// fit in `usize`.
fn fold_into(last: &mut MaskEntry, next: &MaskEntry) -> bool {
    let Ok(shift) = usize::try_from(next.seq_start - last.seq_start) else {
        return false;
    };
    let mut shifted = Vec::with_capacity(next.preserve_headers.len());
    for h in &next.preserve_headers {
        match (h.start.checked_add(shift), h.end.checked_add(shift)) {
            (Some(start), Some(end)) => shifted.push(ByteRange { start, end }),
            _ => return false,
        }
    }
    last.preserve_headers.extend(shifted);
    last.seq_end = next.seq_end;
    true
}

/// Counters reported alongside the diagnostic export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskTableStats {
    pub entries_added: u64,
    pub entries_merged: u64,
    pub lookups_performed: u64,
    pub matches_found: u64,
}

/// Per-stream store of mask intervals with an open/finalized lifecycle
#[derive(Debug, Default)]
pub struct MaskTable {
    streams: HashMap<StreamId, StreamEntries>,
    finalized: bool,
    entries_added: u64,
    entries_merged: u64,
    lookups: AtomicU64,
    matches: AtomicU64,
}

impl MaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn ensure_open(&self) -> Result<()> {
        if self.finalized {
            return Err(MaskError::state("mask table is finalized; inserts are no longer allowed"));
        }
        Ok(())
    }

    fn ensure_finalized(&self) -> Result<()> {
        if !self.finalized {
            return Err(MaskError::state("mask table must be finalized before matching"));
        }
        Ok(())
    }

    /// Insert a policy for `[seq_start, seq_end)` of `stream_id`
    pub fn add_mask_range(
        &mut self,
        stream_id: StreamId,
        seq_start: u64,
        seq_end: u64,
        mask_type: &str,
        spec: MaskSpec,
    ) -> Result<()> {
        self.ensure_open()?;
        self.add_entry(MaskEntry::new(stream_id, seq_start, seq_end, mask_type, spec)?)
    }

    /// Insert a policy whose `preserve_headers` ranges always survive
    pub fn add_mask_range_with_headers(
        &mut self,
        stream_id: StreamId,
        seq_start: u64,
        seq_end: u64,
        mask_type: &str,
        spec: MaskSpec,
        preserve_headers: &[(usize, usize)],
    ) -> Result<()> {
        self.ensure_open()?;
        let entry = MaskEntry::new(stream_id, seq_start, seq_end, mask_type, spec)?
            .with_preserve_headers(preserve_headers)?;
        self.add_entry(entry)
    }

    /// Insert an entry, re-validating it
    pub fn add_entry(&mut self, entry: MaskEntry) -> Result<()> {
        self.ensure_open()?;
        entry.validate()?;
        debug!(
            "Mask {} [{}, {}) {} ({})",
            entry.stream_id, entry.seq_start, entry.seq_end, entry.mask_type, entry.spec
        );
        self.streams.entry(entry.stream_id).or_default().insert(entry);
        self.entries_added += 1;
        Ok(())
    }

    /// Move every entry of an open shard into this open table
    ///
    /// Lets classification run one writer per stream shard and still end
    /// with a single finalize.
    pub fn absorb(&mut self, shard: MaskTable) -> Result<()> {
        self.ensure_open()?;
        shard.ensure_open()?;
        for (_, stream) in shard.streams {
            for entry in stream.entries {
                self.add_entry(entry)?;
            }
        }
        Ok(())
    }

    /// Merge adjacent compatible entries and freeze the table
    ///
    /// Calling it again is a no-op.
    pub fn finalize(&mut self) {
        if self.finalized {
            debug!("Mask table already finalized");
            return;
        }

        let mut merged = 0usize;
        for stream in self.streams.values_mut() {
            merged += stream.merge_adjacent();
        }
        self.entries_merged += merged as u64;
        self.finalized = true;

        info!(
            "Mask table finalized: {} streams, {} entries ({} merged)",
            self.streams.len(),
            self.len(),
            merged
        );
    }

    /// Entries overlapping a packet's payload, in interval order
    ///
    /// `packet_seq` is the sequence number of the first payload byte. An
    /// unknown stream yields no matches. For streams whose intervals cross
    /// 2^32, a 32-bit `packet_seq` is also tried in the next sequence cycle.
    pub fn match_packet(
        &self,
        stream_id: &StreamId,
        packet_seq: u64,
        payload_len: usize,
    ) -> Result<Vec<MaskMatch<'_>>> {
        self.ensure_finalized()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let matches = self.collect_matches(stream_id, packet_seq, payload_len);
        self.matches.fetch_add(matches.len() as u64, Ordering::Relaxed);
        Ok(matches)
    }

    fn collect_matches(
        &self,
        stream_id: &StreamId,
        packet_seq: u64,
        payload_len: usize,
    ) -> Vec<MaskMatch<'_>> {
        let mut out = Vec::new();
        if payload_len == 0 {
            return out;
        }
        let Some(stream) = self.streams.get(stream_id) else {
            debug!("No mask entries for stream {}", stream_id);
            return out;
        };

        stream.collect(packet_seq, payload_len, &mut out);
        if packet_seq < SEQ_SPACE && stream.max_end > SEQ_SPACE {
            let mut shifted = Vec::new();
            stream.collect(packet_seq + SEQ_SPACE, payload_len, &mut shifted);
            // An entry longer than one cycle is already matched
            shifted.retain(|m| !out.iter().any(|o| std::ptr::eq(o.entry, m.entry)));
            if !shifted.is_empty() {
                out.extend(shifted);
                out.sort_by_key(|m| (m.start, m.entry.seq_start));
            }
        }
        out
    }

    /// Single best policy for `[seq, seq + length)`
    ///
    /// The entry with the largest overlap wins; ties go to the earlier
    /// interval.
    pub fn lookup(&self, stream_id: &StreamId, seq: u64, length: usize) -> Result<Option<&MaskSpec>> {
        self.ensure_finalized()?;
        self.lookups.fetch_add(1, Ordering::Relaxed);

        let mut best: Option<MaskMatch<'_>> = None;
        for m in self.collect_matches(stream_id, seq, length) {
            if best.as_ref().map_or(true, |b| m.len() > b.len()) {
                best = Some(m);
            }
        }
        if best.is_some() {
            self.matches.fetch_add(1, Ordering::Relaxed);
        }
        Ok(best.map(|m| &m.entry.spec))
    }

    /// Entries stored for one stream
    pub fn entries(&self, stream_id: &StreamId) -> &[MaskEntry] {
        self.streams
            .get(stream_id)
            .map(|s| s.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = &StreamId> {
        self.streams.keys()
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Total number of stored entries
    pub fn len(&self) -> usize {
        self.streams.values().map(|s| s.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> MaskTableStats {
        MaskTableStats {
            entries_added: self.entries_added,
            entries_merged: self.entries_merged,
            lookups_performed: self.lookups.load(Ordering::Relaxed),
            matches_found: self.matches.load(Ordering::Relaxed),
        }
    }
}
