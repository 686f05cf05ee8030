//! Sequence-range masking
//!
//! # Overview
//!
//! - `MaskSpec`: closed set of redaction policies (keep, keep prefix, zero ranges)
//! - `MaskEntry`: one policy bound to a half-open sequence interval of a stream
//! - `MaskTable`: per-stream interval store (open -> finalized)
//! - `apply_masks`: in-place transform of one payload from its matches
//!
//! # Example
//!
//! ```
//! use seqmask::core::FlowEndpoint4Tuple;
//! use seqmask::flow::FlowRegistry;
//! use seqmask::mask::{apply_masks, MaskSpec, MaskTable};
//!
//! let tuple = FlowEndpoint4Tuple::parse("10.0.0.1", 443, "10.0.0.2", 50000).unwrap();
//! let stream = FlowRegistry::stream_for_packet(tuple);
//!
//! let mut table = MaskTable::new();
//! table.add_mask_range(stream, 1000, 1500, "tls_application_data", MaskSpec::mask_after(5)).unwrap();
//! table.finalize();
//!
//! let mut payload = vec![0xAB; 50];
//! let matches = table.match_packet(&stream, 1100, payload.len()).unwrap();
//! apply_masks(&mut payload, &matches);
//! assert!(payload[5..].iter().all(|&b| b == 0));
//! ```

pub mod applier;
pub mod entry;
pub mod export;
pub mod spec;
pub mod table;

pub use applier::{apply_masks, ApplyOutcome};
pub use entry::{MaskEntry, MaskMatch};
pub use export::{ExportedEntry, MaskTableExport};
pub use spec::{ByteRange, MaskSpec};
pub use table::{MaskTable, MaskTableStats, SEQ_SPACE};
