//! cibridge core library
//!
//! Mirrors source branches and pull requests onto a CI platform and relays
//! pipeline status back as commit statuses. All external effects go through
//! the capability traits in [`ports`]; concrete git and HTTP adapters live in
//! `cibridge-git` and `cibridge-forge`.

pub mod domain;
pub mod events;
pub mod fakes;
pub mod mirror;
pub mod obs;
pub mod poll;
pub mod ports;
pub mod publish;
pub mod relay;
pub mod telemetry;
pub mod workspace;

pub use domain::{
    map_pipeline_status, merge_message, mirror_branch_name, parse_merge_message, BranchNaming,
    BridgeError, CommitSha, ErrorClass, MergeOutcome, MergePolicy, MirrorTarget, PipelineHandle,
    PipelineStatus, ProjectPath, ReportState, Result, SourceReference, StatusReport,
    DEFAULT_STATUS_CONTEXT,
};

pub use events::{EventError, TriggerEvent};

pub use mirror::{BranchMirror, MirrorRequest, MirrorRun, MirrorState};
pub use relay::{PipelineSelection, RelayEnd, RelayOutcome, RelayRequest, StatusRelay};

pub use poll::PollPolicy;
pub use ports::{
    BranchInfo, CiPlatform, CiProject, PipelineOptions, PlatformError, PlatformResult,
    PullRequestInfo, SourcePlatform, StatusSink, VcsError, VcsResult, VersionControl,
};
pub use publish::publish_status;
pub use workspace::WorkingCopy;

/// Crate version, reported by `cibridge --version`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
