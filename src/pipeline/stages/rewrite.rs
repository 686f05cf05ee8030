//! Payload rewriting
//!
//! For every segment with payload: resolve its directional stream, update
//! the stream's origin and observed ranges, query the finalized mask table
//! and apply the matched policies in place.

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::flow::FlowRegistry;
use crate::mask::apply_masks;
use crate::pipeline::{RunContext, Stage};

/// Counters produced by one rewrite pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteStats {
    pub segments_seen: u64,
    pub payload_segments: u64,
    pub matched_segments: u64,
    pub modified_segments: u64,
    pub matches: u64,
    pub bytes_masked: u64,
    pub bytes_preserved: u64,
}

#[derive(Debug, Default)]
pub struct RewriteStage;

impl RewriteStage {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for RewriteStage {
    fn name(&self) -> &str {
        "rewrite"
    }

    fn validate_inputs(&self, ctx: &RunContext) -> anyhow::Result<()> {
        ctx.finalized_table()?;
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()> {
        let table = ctx
            .mask_table
            .as_ref()
            .filter(|t| t.is_finalized())
            .ok_or_else(|| anyhow!("rewrite requires a finalized mask table"))?;
        let learn_isn = ctx.config.rewrite.learn_isn_from_syn;
        let track_ranges = ctx.config.rewrite.track_flow_ranges;
        let mut stats = RewriteStats::default();

        for segment in ctx.segments.iter_mut() {
            stats.segments_seen += 1;
            let stream = FlowRegistry::stream_for_packet(segment.tuple);
            let flow = ctx.flows.get_or_create_by_id(stream);

            if learn_isn {
                if let Some(isn) = segment.initial_seq() {
                    flow.set_initial_seq(isn);
                }
            }
            if !segment.has_payload() {
                continue;
            }
            stats.payload_segments += 1;

            let len = segment.payload.len();
            if track_ranges {
                // payloads never exceed 2^32 bytes inside one segment
                flow.observe_segment(segment.seq, len as u32);
            }

            let matches = table.match_packet(&stream, u64::from(segment.seq), len)?;
            if matches.is_empty() {
                continue;
            }
            stats.matched_segments += 1;
            stats.matches += matches.len() as u64;

            let outcome = apply_masks(&mut segment.payload, &matches);
            if outcome.modified() {
                stats.modified_segments += 1;
            }
            stats.bytes_masked += outcome.bytes_changed as u64;
            stats.bytes_preserved += outcome.bytes_restored as u64;
            debug!(
                "Frame {}: {} matches, {} bytes masked",
                segment.frame,
                matches.len(),
                outcome.bytes_changed
            );
        }

        info!(
            "Rewrote {} of {} payload segments ({} bytes masked)",
            stats.modified_segments, stats.payload_segments, stats.bytes_masked
        );
        ctx.rewrite_stats = Some(stats);
        Ok(())
    }
}
