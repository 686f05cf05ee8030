//! Diagnostic export stage

use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use crate::pipeline::{RunContext, Stage};

/// Artifact key under which the export path is recorded
pub const EXPORT_ARTIFACT: &str = "mask_table_export";

const DEFAULT_FILE_NAME: &str = "mask_table.json";

/// Writes the finalized mask table as JSON
///
/// Disabled unless `export.enabled` is set or an explicit destination was
/// given. The destination is, in order: the explicit path, `export.path`,
/// `mask_table.json` in the output directory, a temp file in the run's
/// scratch area.
#[derive(Debug, Default)]
pub struct ExportStage {
    destination: Option<PathBuf>,
}

impl ExportStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            destination: Some(path.into()),
        }
    }

    fn enabled(&self, ctx: &RunContext) -> bool {
        self.destination.is_some() || ctx.config.export.enabled
    }

    fn resolve_destination(&self, ctx: &mut RunContext) -> anyhow::Result<PathBuf> {
        if let Some(path) = self.destination.as_ref().or(ctx.config.export.path.as_ref()) {
            return Ok(path.clone());
        }
        if let Some(dir) = &ctx.output_dir {
            return Ok(dir.join(DEFAULT_FILE_NAME));
        }
        Ok(ctx.temp_file("mask_table")?)
    }
}

impl Stage for ExportStage {
    fn name(&self) -> &str {
        "export"
    }

    fn validate_inputs(&self, ctx: &RunContext) -> anyhow::Result<()> {
        if self.enabled(ctx) {
            ctx.finalized_table()?;
        }
        Ok(())
    }

    fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()> {
        if !self.enabled(ctx) {
            debug!("Mask table export disabled");
            return Ok(());
        }

        let path = self.resolve_destination(ctx)?;
        ctx.finalized_table()?
            .write_export(&path)
            .with_context(|| format!("Failed to export mask table to {}", path.display()))?;
        ctx.artifacts.insert(EXPORT_ARTIFACT.to_string(), path);
        Ok(())
    }
}
