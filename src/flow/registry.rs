//! Flow registry
//!
//! Owns every `DirectionalFlow` of one processing run, keyed by stream id.
//! Flows are created lazily on first reference and live until the registry
//! is dropped.

use std::collections::HashMap;

use tracing::debug;

use crate::core::{Connection, Direction, FlowEndpoint4Tuple};
use crate::error::Result;
use super::stream::{DirectionalFlow, StreamId};

/// Registry statistics
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub lookups: u64,
    pub hits: u64,
    pub created: u64,
}

/// Per-run store of directional flows
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: HashMap<StreamId, DirectionalFlow>,
    pub stats: RegistryStats,
}

impl FlowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Identifier of the stream travelling in `direction` on the connection
    /// oriented as `tuple`
    pub fn stream_id(tuple: FlowEndpoint4Tuple, direction: Direction) -> StreamId {
        StreamId::new(Connection::from_tuple(tuple), direction)
    }

    /// Identifier of the stream a packet carrying `tuple` belongs to
    ///
    /// This is the one normalization rule shared by classification and
    /// rewriting.
    pub fn stream_for_packet(tuple: FlowEndpoint4Tuple) -> StreamId {
        StreamId::for_sender(tuple)
    }

    /// Parse an externally supplied stream id string
    pub fn parse_stream_id(s: &str) -> Result<StreamId> {
        s.parse()
    }

    /// Get or create the flow for `(tuple, direction)`
    pub fn get_or_create(
        &mut self,
        tuple: FlowEndpoint4Tuple,
        direction: Direction,
    ) -> &mut DirectionalFlow {
        self.get_or_create_by_id(Self::stream_id(tuple, direction))
    }

    /// Get or create the flow a packet carrying `tuple` belongs to
    pub fn flow_for_packet(&mut self, tuple: FlowEndpoint4Tuple) -> &mut DirectionalFlow {
        self.get_or_create_by_id(Self::stream_for_packet(tuple))
    }

    pub fn get_or_create_by_id(&mut self, id: StreamId) -> &mut DirectionalFlow {
        self.stats.lookups += 1;
        let stats = &mut self.stats;
        self.flows
            .entry(id)
            .and_modify(|_| stats.hits += 1)
            .or_insert_with(|| {
                debug!("Registered stream {}", id);
                stats.created += 1;
                DirectionalFlow::new(id)
            })
    }

    pub fn get(&self, id: &StreamId) -> Option<&DirectionalFlow> {
        self.flows.get(id)
    }

    pub fn get_mut(&mut self, id: &StreamId) -> Option<&mut DirectionalFlow> {
        self.flows.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DirectionalFlow> {
        self.flows.values()
    }

    /// Streams whose initial sequence number changed during the run
    pub fn anomalous(&self) -> Vec<&DirectionalFlow> {
        self.flows.values().filter(|f| f.is_isn_anomalous()).collect()
    }
}
