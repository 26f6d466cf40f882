//! Result of mirroring a pull request head, with or without a merge.

use serde::{Deserialize, Serialize};

use super::reference::CommitSha;

/// Outcome of reproducing a source reference in the working copy.
///
/// A [`MergeOutcome::Conflict`] is not an error: the mirror reports it as a
/// `failure` status for the head commit and stops before pushing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    HeadOnly {
        head: CommitSha,
    },
    Merged {
        base: CommitSha,
        head: CommitSha,
        merge_commit: CommitSha,
    },
    Conflict {
        head: CommitSha,
        /// The base ref name, or its sha when the ref was already resolved.
        base: String,
    },
}

impl MergeOutcome {
    /// The commit statuses are addressed to, in every outcome.
    pub fn head(&self) -> &CommitSha {
        match self {
            MergeOutcome::HeadOnly { head }
            | MergeOutcome::Merged { head, .. }
            | MergeOutcome::Conflict { head, .. } => head,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeOutcome::Conflict { .. })
    }
}

/// Commit message for the synthetic merge of `head` onto `base_ref`.
///
/// The relay parses this back with [`parse_merge_message`] to find the head
/// commit a CI pipeline really tested.
pub fn merge_message(head: &CommitSha, base_ref: &str) -> String {
    format!("Merge {head} into {base_ref}")
}

/// Extract the head sha from a message produced by [`merge_message`].
pub fn parse_merge_message(message: &str) -> Option<CommitSha> {
    let mut words = message.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some("Merge"), Some(head), Some("into")) if is_hex_sha(head) => Some(CommitSha::new(head)),
        _ => None,
    }
}

fn is_hex_sha(candidate: &str) -> bool {
    use std::sync::OnceLock;
    static SHA: OnceLock<regex::Regex> = OnceLock::new();
    SHA.get_or_init(|| regex::Regex::new(r"^[0-9a-fA-F]{6,64}$").expect("valid sha pattern"))
        .is_match(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_is_reported_for_every_outcome() {
        let head = CommitSha::new("def456");
        let merged = MergeOutcome::Merged {
            base: CommitSha::new("aaa111"),
            head: head.clone(),
            merge_commit: CommitSha::new("abc123"),
        };
        assert_eq!(merged.head(), &head);

        let conflict = MergeOutcome::Conflict {
            head: head.clone(),
            base: "master".to_string(),
        };
        assert_eq!(conflict.head(), &head);
        assert!(conflict.is_conflict());
    }

    #[test]
    fn test_merge_message_parses_back() {
        let head = CommitSha::new("0f3c9a1d2e");
        let message = merge_message(&head, "release4.2");
        assert_eq!(message, "Merge 0f3c9a1d2e into release4.2");
        assert_eq!(parse_merge_message(&message), Some(head));
    }

    #[test]
    fn test_ordinary_messages_are_not_merges() {
        assert_eq!(parse_merge_message("Fix typo in README"), None);
        assert_eq!(parse_merge_message("Merge branch 'main' into dev"), None);
        assert_eq!(parse_merge_message("Merge"), None);
    }
}
