//! Sending commit statuses and surfacing sink rejections.

use crate::domain::{BridgeError, ProjectPath, Result, StatusReport};
use crate::obs;
use crate::ports::StatusSink;

/// Submit `report` and turn a `>= 400` response into [`BridgeError::StatusRejected`].
pub async fn publish_status(
    sink: &dyn StatusSink,
    project: &ProjectPath,
    report: &StatusReport,
) -> Result<u16> {
    let code = sink
        .submit(project, report)
        .await
        .map_err(BridgeError::platform("submit commit status"))?;
    if code >= 400 {
        return Err(BridgeError::StatusRejected {
            sha: report.commit_sha.to_string(),
            code,
        });
    }
    obs::emit_status_sent(&report.commit_sha, report.state, &report.description, code);
    Ok(code)
}
