//! Directional flow tracking
//!
//! Identifies the two byte streams of every TCP connection and tracks
//! their sequence spaces.
//!
//! # Example
//!
//! ```
//! use seqmask::core::FlowEndpoint4Tuple;
//! use seqmask::flow::FlowRegistry;
//!
//! let tuple = FlowEndpoint4Tuple::parse("10.0.0.2", 51000, "10.0.0.1", 443).unwrap();
//! let mut registry = FlowRegistry::new();
//!
//! let flow = registry.flow_for_packet(tuple);
//! flow.set_initial_seq(u32::MAX - 99);
//! assert_eq!(flow.to_relative(50).unwrap(), 150);
//! ```

pub mod registry;
pub mod stream;

pub use registry::{FlowRegistry, RegistryStats};
pub use stream::{DirectionalFlow, StreamId};

pub use crate::core::Direction;
