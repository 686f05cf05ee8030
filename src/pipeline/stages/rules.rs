//! Classification hand-off
//!
//! The upstream classifier describes which sequence ranges of which stream
//! hold which record type, and how each must be masked. This stage inserts
//! those assignments into the run's mask table and finalizes it exactly
//! once.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::{Direction, FlowEndpoint4Tuple};
use crate::error::{MaskError, Result};
use crate::flow::{FlowRegistry, StreamId};
use crate::mask::{MaskEntry, MaskSpec, MaskTable};
use crate::pipeline::{RunContext, Stage};

/// One interval -> policy assignment
///
/// The stream is named either by `stream` (its string id) or by `tuple`
/// plus an optional `direction` (forward when omitted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuple: Option<FlowEndpoint4Tuple>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    pub seq_start: u64,
    pub seq_end: u64,
    pub mask_type: String,
    pub spec: MaskSpec,
    #[serde(default)]
    pub preserve_headers: Vec<(usize, usize)>,
}

impl MaskRule {
    pub fn stream_id(&self) -> Result<StreamId> {
        match (&self.stream, &self.tuple) {
            (Some(id), None) => FlowRegistry::parse_stream_id(id),
            (None, Some(tuple)) => Ok(FlowRegistry::stream_id(
                *tuple,
                self.direction.unwrap_or(Direction::Forward),
            )),
            (Some(_), Some(_)) => Err(MaskError::validation(
                "rule names its stream twice; use either 'stream' or 'tuple'",
            )),
            (None, None) => Err(MaskError::validation("rule has neither 'stream' nor 'tuple'")),
        }
    }

    pub fn to_entry(&self) -> Result<MaskEntry> {
        MaskEntry::new(
            self.stream_id()?,
            self.seq_start,
            self.seq_end,
            self.mask_type.as_str(),
            self.spec.clone(),
        )?
        .with_preserve_headers(&self.preserve_headers)
    }
}

/// Rules document produced by the classifier
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaskRuleSet {
    #[serde(default)]
    pub rules: Vec<MaskRule>,
}

impl MaskRuleSet {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read rules file: {}", path.as_ref().display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse rules file: {}", path.as_ref().display()))
    }

    /// Insert every rule into `table`, registering the streams in `flows`
    pub fn populate(&self, table: &mut MaskTable, flows: &mut FlowRegistry) -> anyhow::Result<usize> {
        for (i, rule) in self.rules.iter().enumerate() {
            let entry = rule.to_entry().with_context(|| format!("rule #{}", i))?;
            flows.get_or_create_by_id(entry.stream_id);
            table.add_entry(entry).with_context(|| format!("rule #{}", i))?;
        }
        Ok(self.rules.len())
    }
}

/// Loads mask rules into the context's table and finalizes it
///
/// Rules come from an explicit path, else from the context's input path.
/// Entries a caller already inserted into an open table are kept.
#[derive(Debug, Default)]
pub struct RuleLoadStage {
    rules_path: Option<PathBuf>,
}

impl RuleLoadStage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            rules_path: Some(path.into()),
        }
    }

    fn source<'a>(&'a self, ctx: &'a RunContext) -> Option<&'a Path> {
        self.rules_path.as_deref().or(ctx.input_path.as_deref())
    }
}

impl Stage for RuleLoadStage {
    fn name(&self) -> &str {
        "classify"
    }

    fn validate_inputs(&self, ctx: &RunContext) -> anyhow::Result<()> {
        if ctx.mask_table.as_ref().map_or(false, MaskTable::is_finalized) {
            bail!("mask table is already finalized");
        }
        match self.source(ctx) {
            Some(path) if !path.is_file() => bail!("rules file not found: {}", path.display()),
            None if ctx.mask_table.is_none() => bail!("no rules file and no mask table to finalize"),
            _ => Ok(()),
        }
    }

    fn execute(&mut self, ctx: &mut RunContext) -> anyhow::Result<()> {
        let mut table = ctx.mask_table.take().unwrap_or_default();

        if let Some(path) = self.source(ctx).map(Path::to_path_buf) {
            let rules = MaskRuleSet::load(&path)?;
            let count = rules.populate(&mut table, &mut ctx.flows)?;
            info!("Loaded {} mask rules from {}", count, path.display());
        }

        table.finalize();
        ctx.mask_table = Some(table);
        Ok(())
    }
}
