//! Core shared types for the masking engine
//!
//! - `FlowEndpoint4Tuple`: validated endpoint 4-tuple
//! - `Connection`: oriented connection with reversal and a base id
//! - `Direction` / `detect_direction`: stream direction within a connection
//! - `TcpSegment`: the per-packet view the rewrite stage works on

pub mod endpoint;
pub mod packet;

pub use endpoint::{detect_direction, Connection, ConnectionKey, Direction, FlowEndpoint4Tuple};
pub use packet::{TcpFlags, TcpSegment};
