//! Stored mask intervals

use serde::{Deserialize, Serialize};

use crate::error::{MaskError, Result};
use crate::flow::StreamId;
use super::spec::{ByteRange, MaskSpec};

/// One `(interval, policy)` pair for one stream
///
/// `seq_start..seq_end` is half-open in the stream's unwrapped sequence
/// space; an interval may extend past 2^32 when the stream wraps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskEntry {
    pub stream_id: StreamId,
    pub seq_start: u64,
    pub seq_end: u64,
    /// Record type reported by classification (e.g. `tls_application_data`)
    pub mask_type: String,
    pub spec: MaskSpec,
    /// Ranges relative to `seq_start` that always survive verbatim
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preserve_headers: Vec<ByteRange>,
}

impl MaskEntry {
    pub fn new(
        stream_id: StreamId,
        seq_start: u64,
        seq_end: u64,
        mask_type: impl Into<String>,
        spec: MaskSpec,
    ) -> Result<Self> {
        let entry = Self {
            stream_id,
            seq_start,
            seq_end,
            mask_type: mask_type.into(),
            spec,
            preserve_headers: Vec::new(),
        };
        entry.validate()?;
        Ok(entry)
    }

    /// Check interval, spec parameters and header ranges
    ///
    /// Fields are public, so the table repeats this on insert.
    pub fn validate(&self) -> Result<()> {
        if self.seq_end <= self.seq_start {
            return Err(MaskError::validation(format!(
                "mask interval for {} must satisfy start < end, got [{}, {})",
                self.stream_id, self.seq_start, self.seq_end
            )));
        }
        self.spec.validate()?;
        if let Some(h) = self.preserve_headers.iter().find(|h| h.is_empty()) {
            return Err(MaskError::validation(format!(
                "preserve header range [{}, {}) is empty or inverted",
                h.start, h.end
            )));
        }
        Ok(())
    }

    /// Attach write-protected ranges given as `(start, end)` pairs
    pub fn with_preserve_headers(mut self, headers: &[(usize, usize)]) -> Result<Self> {
        self.preserve_headers = headers
            .iter()
            .map(|&(start, end)| ByteRange::new(start, end))
            .collect::<Result<Vec<_>>>()?;
        Ok(self)
    }

    pub fn len(&self) -> u64 {
        self.seq_end - self.seq_start
    }

    pub fn is_empty(&self) -> bool {
        self.seq_end <= self.seq_start
    }

    /// True when `[start, end)` shares at least one sequence number
    pub fn overlaps(&self, start: u64, end: u64) -> bool {
        self.seq_start < end && start < self.seq_end
    }

    /// True when `next` can be folded into this entry during finalize
    pub fn can_merge_with(&self, next: &MaskEntry) -> bool {
        self.seq_end == next.seq_start
            && self.mask_type == next.mask_type
            && self.spec.can_merge_with(&next.spec)
            && self.preserve_headers == next.preserve_headers
    }
}

/// One entry matched against one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskMatch<'a> {
    pub entry: &'a MaskEntry,
    /// Sequence number of the packet's first payload byte (unwrapped)
    pub packet_seq: u64,
    /// Packet-relative offset where the overlap begins
    pub start: usize,
    /// Packet-relative offset where the overlap ends (exclusive)
    pub end: usize,
}

impl MaskMatch<'_> {
    pub fn spec(&self) -> &MaskSpec {
        &self.entry.spec
    }

    pub fn mask_type(&self) -> &str {
        &self.entry.mask_type
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Preserved header ranges mapped onto the packet buffer
    ///
    /// Only the parts inside this match's `[start, end)` are returned.
    pub fn preserved_in_packet(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let entry_start = self.entry.seq_start;
        self.entry.preserve_headers.iter().filter_map(move |h| {
            let abs_start = entry_start.saturating_add(h.start as u64);
            let abs_end = entry_start.saturating_add(h.end as u64);
            let lo = abs_start.max(self.packet_seq + self.start as u64);
            let hi = abs_end.min(self.packet_seq + self.end as u64);
            (lo < hi).then(|| ((lo - self.packet_seq) as usize, (hi - self.packet_seq) as usize))
        })
    }
}
