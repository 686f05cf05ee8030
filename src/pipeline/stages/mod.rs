//! Built-in stages
//!
//! - `RuleLoadStage`: loads classification results into the mask table and
//!   finalizes it
//! - `RewriteStage`: masks every segment payload in the run context
//! - `ExportStage`: writes the mask table diagnostic export

pub mod export;
pub mod rewrite;
pub mod rules;

pub use export::{ExportStage, EXPORT_ARTIFACT};
pub use rewrite::{RewriteStage, RewriteStats};
pub use rules::{MaskRule, MaskRuleSet, RuleLoadStage};
