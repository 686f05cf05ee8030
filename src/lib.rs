//! seqmask: stream-directional, sequence-range payload masking for TCP captures
//!
//! A classifier decides which sequence ranges of each directional TCP stream
//! carry which kind of record and how each must be redacted. Those decisions
//! land in a [`MaskTable`]; the rewrite stage then asks the table, for every
//! packet, which byte ranges of its payload to transform and applies them in
//! place. A small sequential [`Pipeline`] drives the stages and guarantees
//! temporary resources are released however a run ends.

pub mod config;
pub mod core;
pub mod error;
pub mod flow;
pub mod logging;
pub mod mask;
pub mod pipeline;

pub use config::Config;
pub use error::{MaskError, Result};
pub use flow::{FlowRegistry, StreamId};
pub use mask::{apply_masks, MaskEntry, MaskSpec, MaskTable};
pub use pipeline::{Pipeline, RunContext, RunReport, RunState, Stage};
