//! Shared run context
//!
//! Carries input/output locations, the scratch area and the stage-to-stage
//! hand-off fields for one pipeline run. Temporary resources allocated here
//! are released when the run ends, whatever the outcome.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::{Builder, TempDir, TempPath};
use tracing::{debug, warn};

use crate::config::Config;
use crate::core::TcpSegment;
use crate::error::{MaskError, Result};
use crate::flow::FlowRegistry;
use crate::mask::MaskTable;

use super::stages::RewriteStats;

/// A temporary file or directory owned by the run
#[derive(Debug)]
enum TempResource {
    File(TempPath),
    Dir(TempDir),
}

impl TempResource {
    fn path(&self) -> &Path {
        match self {
            TempResource::File(p) => &**p,
            TempResource::Dir(d) => d.path(),
        }
    }

    fn release(self) -> std::io::Result<()> {
        match self {
            TempResource::File(p) => p.close(),
            TempResource::Dir(d) => d.close(),
        }
    }
}

/// State shared by all stages of one run
#[derive(Debug)]
pub struct RunContext {
    /// Capture or rules input the run starts from
    pub input_path: Option<PathBuf>,
    /// Directory where stages place their outputs
    pub output_dir: Option<PathBuf>,
    /// Run configuration
    pub config: Config,

    /// Directional flows seen during the run
    pub flows: FlowRegistry,
    /// Mask table handed from classification to rewriting
    pub mask_table: Option<MaskTable>,
    /// Segments to rewrite, supplied by the capture reader
    pub segments: Vec<TcpSegment>,
    /// Rewrite counters, set by the rewrite stage
    pub rewrite_stats: Option<RewriteStats>,
    /// Named files produced by stages
    pub artifacts: BTreeMap<String, PathBuf>,

    scratch: Option<TempDir>,
    temp_resources: Vec<TempResource>,
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl RunContext {
    pub fn new(config: Config) -> Self {
        Self {
            input_path: None,
            output_dir: None,
            config,
            flows: FlowRegistry::new(),
            mask_table: None,
            segments: Vec::new(),
            rewrite_stats: None,
            artifacts: BTreeMap::new(),
            scratch: None,
            temp_resources: Vec::new(),
        }
    }

    pub fn with_input<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.input_path = Some(path.into());
        self
    }

    pub fn with_output_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.into());
        self
    }

    pub fn with_segments(mut self, segments: Vec<TcpSegment>) -> Self {
        self.segments = segments;
        self
    }

    /// Finalized mask table, or a state error if classification has not run
    pub fn finalized_table(&self) -> Result<&MaskTable> {
        match &self.mask_table {
            Some(table) if table.is_finalized() => Ok(table),
            Some(_) => Err(MaskError::state("mask table has not been finalized")),
            None => Err(MaskError::state("no mask table in run context")),
        }
    }

    /// Per-run scratch directory, created on first use
    pub fn scratch_dir(&mut self) -> Result<&Path> {
        if self.scratch.is_none() {
            let mut builder = Builder::new();
            builder.prefix(&self.config.pipeline.temp_prefix);
            let dir = match &self.config.pipeline.scratch_root {
                Some(root) => builder.tempdir_in(root)?,
                None => builder.tempdir()?,
            };
            debug!("Created scratch directory {}", dir.path().display());
            self.scratch = Some(dir);
        }
        match &self.scratch {
            Some(dir) => Ok(dir.path()),
            None => Err(MaskError::state("scratch directory unavailable")),
        }
    }

    /// Allocate a temporary file inside the scratch area
    pub fn temp_file(&mut self, hint: &str) -> Result<PathBuf> {
        let scratch = self.scratch_dir()?.to_path_buf();
        let file = Builder::new().prefix(hint).tempfile_in(&scratch)?;
        let path = file.into_temp_path();
        let owned = path.to_path_buf();
        self.temp_resources.push(TempResource::File(path));
        Ok(owned)
    }

    /// Allocate a temporary directory inside the scratch area
    pub fn temp_dir(&mut self, hint: &str) -> Result<PathBuf> {
        let scratch = self.scratch_dir()?.to_path_buf();
        let dir = Builder::new().prefix(hint).tempdir_in(&scratch)?;
        let owned = dir.path().to_path_buf();
        self.temp_resources.push(TempResource::Dir(dir));
        Ok(owned)
    }

    /// Paths of temp resources still alive, scratch directory included
    pub fn live_temp_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .temp_resources
            .iter()
            .map(|r| r.path().to_path_buf())
            .collect();
        if let Some(dir) = &self.scratch {
            paths.push(dir.path().to_path_buf());
        }
        paths
    }

    /// Delete every temp resource and the scratch directory
    pub fn release_resources(&mut self) {
        let count = self.temp_resources.len();
        for resource in self.temp_resources.drain(..).rev() {
            let path = resource.path().to_path_buf();
            if let Err(e) = resource.release() {
                warn!("Failed to remove temp resource {}: {}", path.display(), e);
            }
        }
        if let Some(dir) = self.scratch.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to remove scratch directory {}: {}", path.display(), e);
            }
        }
        if count > 0 {
            debug!("Released {} temp resources", count);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FlowEndpoint4Tuple;
    use crate::flow::StreamId;
    use crate::mask::MaskSpec;

    fn context_in(root: &Path) -> RunContext {
        let mut config = Config::default();
        config.pipeline.scratch_root = Some(root.to_path_buf());
        RunContext::new(config)
    }

    #[test]
    fn test_temp_resources_released() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context_in(root.path());

        let file = ctx.temp_file("segments").unwrap();
        let dir = ctx.temp_dir("reassembly").unwrap();
        std::fs::write(&file, b"data").unwrap();
        std::fs::write(dir.join("inner.bin"), b"data").unwrap();
        assert!(file.exists());
        assert!(dir.exists());
        assert_eq!(ctx.live_temp_paths().len(), 3);

        ctx.release_resources();
        assert!(!file.exists());
        assert!(!dir.exists());
        assert!(ctx.live_temp_paths().is_empty());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_scratch_dir_reused() {
        let root = tempfile::tempdir().unwrap();
        let mut ctx = context_in(root.path());
        let a = ctx.scratch_dir().unwrap().to_path_buf();
        let b = ctx.scratch_dir().unwrap().to_path_buf();
        assert_eq!(a, b);
        assert!(a
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("seqmask-"));
    }

    #[test]
    fn test_finalized_table_required() {
        let mut ctx = RunContext::default();
        assert!(ctx.finalized_table().is_err());

        let mut table = MaskTable::new();
        let sid = StreamId::for_sender(
            FlowEndpoint4Tuple::parse("10.0.0.1", 443, "10.0.0.2", 50000).unwrap(),
        );
        table.add_mask_range(sid, 0, 10, "x", MaskSpec::keep_all()).unwrap();
        ctx.mask_table = Some(table);
        assert!(ctx.finalized_table().is_err());

        if let Some(t) = ctx.mask_table.as_mut() {
            t.finalize();
        }
        assert_eq!(ctx.finalized_table().unwrap().len(), 1);
    }
}
