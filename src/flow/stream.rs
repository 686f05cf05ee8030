//! Directional byte streams
//!
//! A `DirectionalFlow` is one direction of a TCP connection. It owns the
//! stream's sequence origin and converts between absolute (on-the-wire)
//! and relative sequence numbers modulo 2^32.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{debug, warn};

use crate::core::{Connection, Direction, FlowEndpoint4Tuple};
use crate::error::{MaskError, Result};

/// Stable identifier of one direction of one connection
///
/// The connection is always stored in canonical orientation (smaller
/// endpoint first), so `(A->B, Forward)` and `(B->A, Reverse)` name the
/// same stream. The string form exists for logs and export only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId {
    connection: Connection,
    direction: Direction,
}

impl StreamId {
    /// Stream travelling in `direction` on `connection`
    pub fn new(connection: Connection, direction: Direction) -> Self {
        let sender = connection.tuple_for(direction);
        Self::for_sender(sender)
    }

    /// Stream whose packets carry `tuple` as (src, dst)
    pub fn for_sender(tuple: FlowEndpoint4Tuple) -> Self {
        let connection = Connection::canonical(tuple);
        let direction = if tuple.is_ordered() {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        Self {
            connection,
            direction,
        }
    }

    /// Canonically oriented connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Endpoints as carried by packets of this stream
    pub fn sender_tuple(&self) -> FlowEndpoint4Tuple {
        self.connection.tuple_for(self.direction)
    }

    /// The opposite direction of the same connection
    pub fn peer(&self) -> Self {
        Self {
            connection: self.connection,
            direction: self.direction.flip(),
        }
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.connection, self.direction)
    }
}

impl FromStr for StreamId {
    type Err = MaskError;

    /// Parse the `src:port-dst:port:dir` form produced by `Display`
    fn from_str(s: &str) -> Result<Self> {
        let bad = || MaskError::validation(format!("malformed stream id '{}'", s));

        let (endpoints, dir) = s.rsplit_once(':').ok_or_else(bad)?;
        let direction: Direction = dir.parse()?;
        let (src, dst) = endpoints.split_once('-').ok_or_else(bad)?;
        let (src_ip, src_port) = parse_endpoint(src).ok_or_else(bad)?;
        let (dst_ip, dst_port) = parse_endpoint(dst).ok_or_else(bad)?;

        let tuple = FlowEndpoint4Tuple::new(src_ip, src_port, dst_ip, dst_port)?;
        Ok(Self::new(Connection::from_tuple(tuple), direction))
    }
}

fn parse_endpoint(s: &str) -> Option<(IpAddr, u16)> {
    let (ip, port) = s.rsplit_once(':')?;
    let ip = ip.trim_start_matches('[').trim_end_matches(']');
    Some((ip.parse().ok()?, port.parse().ok()?))
}

impl Serialize for StreamId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Relative offsets at or above this are treated as lying before the origin
const BEHIND_ORIGIN: u32 = 1 << 31;

/// One direction of a connection with its sequence-space bookkeeping
#[derive(Debug, Clone)]
pub struct DirectionalFlow {
    id: StreamId,
    initial_seq: Option<u32>,
    /// Number of times the origin was replaced by a different value
    isn_changes: u32,
    /// Furthest end offset seen, relative to the origin
    highest_end: Option<u64>,
    /// Sorted, disjoint relative sub-ranges `[start, end)` seen so far
    observed: Vec<(u64, u64)>,
}

impl DirectionalFlow {
    pub fn new(id: StreamId) -> Self {
        Self {
            id,
            initial_seq: None,
            isn_changes: 0,
            highest_end: None,
            observed: Vec::new(),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.id.direction()
    }

    pub fn initial_seq(&self) -> Option<u32> {
        self.initial_seq
    }

    /// True once the origin has been replaced by a different value
    pub fn is_isn_anomalous(&self) -> bool {
        self.isn_changes > 0
    }

    pub fn isn_changes(&self) -> u32 {
        self.isn_changes
    }

    /// Establish (or replace) the stream's sequence origin
    ///
    /// A differing later value is accepted and logged; retransmitted
    /// handshakes and restarted streams legitimately produce one.
    pub fn set_initial_seq(&mut self, seq: u32) {
        match self.initial_seq {
            None => {
                debug!("Stream {} initial sequence set to {}", self.id, seq);
                self.initial_seq = Some(seq);
            }
            Some(current) if current == seq => {}
            Some(current) => {
                warn!(
                    "Stream {} initial sequence changed from {} to {}",
                    self.id, current, seq
                );
                self.isn_changes += 1;
                self.initial_seq = Some(seq);
                self.highest_end = None;
                self.observed.clear();
            }
        }
    }

    fn origin(&self) -> Result<u32> {
        self.initial_seq.ok_or_else(|| {
            MaskError::state(format!("stream {} has no initial sequence number", self.id))
        })
    }

    /// Absolute sequence number to an offset from the origin (mod 2^32)
    pub fn to_relative(&self, absolute: u32) -> Result<u32> {
        Ok(absolute.wrapping_sub(self.origin()?))
    }

    /// Offset from the origin back to an absolute sequence number (mod 2^32)
    pub fn to_absolute(&self, relative: u32) -> Result<u32> {
        Ok(self.origin()?.wrapping_add(relative))
    }

    /// Record a segment covering `[seq, seq + len)`
    ///
    /// Returns false, recording nothing, when the stream has no origin yet
    /// or the segment sits behind the origin (relative offset in the upper
    /// half of the sequence space).
    pub fn observe_segment(&mut self, seq: u32, len: u32) -> bool {
        let start = match self.to_relative(seq) {
            Ok(rel) if rel < BEHIND_ORIGIN => u64::from(rel),
            Ok(rel) => {
                debug!(
                    "Stream {} segment at {} lies {} bytes before origin",
                    self.id,
                    seq,
                    rel.wrapping_neg()
                );
                return false;
            }
            Err(_) => {
                debug!("Stream {} segment at {} seen before origin", self.id, seq);
                return false;
            }
        };
        if len == 0 {
            return true;
        }
        let end = start + u64::from(len);

        if self.highest_end.map_or(true, |h| end > h) {
            self.highest_end = Some(end);
        }

        // Merge with any overlapping or touching ranges
        let first = self.observed.partition_point(|&(_, e)| e < start);
        let mut merged = (start, end);
        let mut last = first;
        while last < self.observed.len() && self.observed[last].0 <= merged.1 {
            merged.0 = merged.0.min(self.observed[last].0);
            merged.1 = merged.1.max(self.observed[last].1);
            last += 1;
        }
        self.observed.splice(first..last, std::iter::once(merged));
        true
    }

    /// Highest observed end sequence, as an absolute sequence number
    pub fn highest_end_seq(&self) -> Option<u32> {
        let origin = self.initial_seq?;
        // truncation to 32 bits is the wrap itself
        self.highest_end.map(|end| origin.wrapping_add(end as u32))
    }

    /// Observed contiguous ranges relative to the origin
    pub fn observed_ranges(&self) -> &[(u64, u64)] {
        &self.observed
    }

    /// Number of relative bytes not yet covered between 0 and the highest end
    pub fn gap_bytes(&self) -> u64 {
        let covered: u64 = self.observed.iter().map(|(s, e)| e - s).sum();
        self.highest_end.unwrap_or(0).saturating_sub(covered)
    }
}
