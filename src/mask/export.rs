//! Diagnostic export of a mask table
//!
//! Produces `{stream_id -> [entry]}` plus summary counters as JSON.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use super::spec::ByteRange;
use super::table::{MaskTable, MaskTableStats};

/// One exported interval
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedEntry {
    pub seq_start: u64,
    pub seq_end: u64,
    pub mask_type: String,
    pub spec_type: String,
    pub spec_params: serde_json::Value,
    pub preserve_headers: Vec<(usize, usize)>,
}

/// Full diagnostic document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskTableExport {
    pub generated_at: DateTime<Utc>,
    pub finalized: bool,
    pub streams: BTreeMap<String, Vec<ExportedEntry>>,
    pub summary: MaskTableStats,
}

impl MaskTable {
    /// Snapshot the table for diagnostics
    pub fn export(&self) -> MaskTableExport {
        let mut streams = BTreeMap::new();
        for id in self.stream_ids() {
            let entries = self
                .entries(id)
                .iter()
                .map(|e| ExportedEntry {
                    seq_start: e.seq_start,
                    seq_end: e.seq_end,
                    mask_type: e.mask_type.clone(),
                    spec_type: e.spec.kind().to_string(),
                    spec_params: e.spec.params(),
                    preserve_headers: e
                        .preserve_headers
                        .iter()
                        .map(|&r: &ByteRange| r.into())
                        .collect(),
                })
                .collect();
            streams.insert(id.to_string(), entries);
        }

        MaskTableExport {
            generated_at: Utc::now(),
            finalized: self.is_finalized(),
            streams,
            summary: self.stats(),
        }
    }

    /// Write the diagnostic export as pretty JSON
    pub fn write_export<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let export = self.export();
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &export)?;
        writer.flush()?;

        info!(
            "Exported {} streams to {}",
            export.streams.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}
