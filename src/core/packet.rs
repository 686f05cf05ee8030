//! Minimal TCP segment representation
//!
//! Captures are parsed outside this crate; the rewrite path only needs the
//! endpoints, the absolute sequence number, a few flags and the payload.

use serde::{Deserialize, Serialize};

use super::endpoint::FlowEndpoint4Tuple;

/// TCP flags relevant to sequence tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpFlags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlags {
    pub fn is_syn(&self) -> bool {
        self.syn && !self.ack
    }

    pub fn is_syn_ack(&self) -> bool {
        self.syn && self.ack
    }
}

/// One captured TCP segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpSegment {
    /// Frame index in the capture (1-based, informational)
    pub frame: u64,
    /// Endpoints as carried by the packet
    pub tuple: FlowEndpoint4Tuple,
    /// Absolute 32-bit sequence number
    pub seq: u32,
    /// TCP flags
    #[serde(default)]
    pub flags: TcpFlags,
    /// TCP payload bytes
    #[serde(default)]
    pub payload: Vec<u8>,
}

impl TcpSegment {
    pub fn new(frame: u64, tuple: FlowEndpoint4Tuple, seq: u32, payload: Vec<u8>) -> Self {
        Self {
            frame,
            tuple,
            seq,
            flags: TcpFlags::default(),
            payload,
        }
    }

    pub fn with_flags(mut self, flags: TcpFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    /// Initial sequence number of the sending stream, if this segment opens it
    ///
    /// SYN and SYN-ACK consume one sequence number, so the first payload
    /// byte sits at `seq + 1`.
    pub fn initial_seq(&self) -> Option<u32> {
        if self.flags.syn {
            Some(self.seq)
        } else {
            None
        }
    }
}
