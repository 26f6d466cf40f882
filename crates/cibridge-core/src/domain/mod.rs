//! Domain model: references, mirror targets, pipelines, and status reports.

pub mod error;
pub mod merge;
pub mod pipeline;
pub mod reference;
pub mod status;

pub use error::{BridgeError, ErrorClass, Result};
pub use merge::{merge_message, parse_merge_message, MergeOutcome};
pub use pipeline::{PipelineHandle, PipelineStatus};
pub use reference::{
    mirror_branch_name, BranchNaming, CommitSha, MergePolicy, MirrorTarget, ProjectPath,
    SourceReference,
};
pub use status::{map_pipeline_status, ReportState, StatusReport, DEFAULT_STATUS_CONTEXT};
