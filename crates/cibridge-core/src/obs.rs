//! Structured observability hooks for mirror and relay runs.
//!
//! This module provides:
//! - Run-scoped tracing spans via the `RunSpan` RAII guard
//! - Emission functions for key lifecycle events: state transitions, status
//!   reports, pipeline discovery, timeouts
//!
//! Events are emitted at `info!` unless noted. Filter with `CIBRIDGE_LOG`.

use tracing::{info, warn};

use crate::domain::{CommitSha, ReportState};

/// RAII guard that enters a run-scoped tracing span for the duration of a run.
///
/// # Example
///
/// ```ignore
/// let _span = RunSpan::enter("mirror", "pr-42");
/// // every event below carries run_id, kind=mirror, target=pr-42
/// ```
pub struct RunSpan {
    run_id: String,
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with a fresh run id.
    pub fn enter(kind: &str, target: &str) -> Self {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = tracing::info_span!("cibridge.run", run_id = %run_id, kind = %kind, target = %target);
        Self {
            run_id,
            _span: span.entered(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }
}

/// Emit event: the mirror state machine entered `state`.
pub fn emit_mirror_state(branch: &str, state: &str) {
    info!(event = "mirror.state", branch = %branch, state = %state);
}

/// Emit event: stale remote branch could not be deleted (warning level).
pub fn emit_purge_failed(remote: &str, branch: &str, error: &dyn std::fmt::Display) {
    warn!(event = "mirror.purge_failed", remote = %remote, branch = %branch, error = %error);
}

/// Emit event: a commit status was accepted by the sink.
pub fn emit_status_sent(sha: &CommitSha, state: ReportState, description: &str, code: u16) {
    info!(
        event = "status.sent",
        sha = %sha,
        state = %state,
        description = %description,
        code = code,
    );
}

/// Emit event: a pipeline was found for `ref_name`.
pub fn emit_pipeline_discovered(ref_name: &str, pipeline_id: u64, status: &str, attempts: u32) {
    info!(
        event = "pipeline.discovered",
        ref_name = %ref_name,
        pipeline_id = pipeline_id,
        status = %status,
        attempts = attempts,
    );
}

/// Emit event: the pipeline reached a terminal status.
pub fn emit_pipeline_finished(pipeline_id: u64, status: &str, polls: u32) {
    info!(
        event = "pipeline.finished",
        pipeline_id = pipeline_id,
        status = %status,
        polls = polls,
    );
}

/// Emit event: the relay gave up waiting (error level).
pub fn emit_relay_timeout(pipeline_id: u64, polls: u32) {
    tracing::error!(
        event = "relay.timeout",
        pipeline_id = pipeline_id,
        polls = polls,
        "Pipeline {pipeline_id}: Timeout reached"
    );
}
