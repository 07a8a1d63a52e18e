use serde::Serialize;

/// Where a target is in its reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishState {
    Resolving,
    Diffing,
    Committing,
    OpeningPr,
    Done,
    NoChange,
    Failed,
}

impl PublishState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::NoChange | Self::Failed)
    }
}

impl std::fmt::Display for PublishState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Resolving => "resolving",
            Self::Diffing => "diffing",
            Self::Committing => "committing",
            Self::OpeningPr => "opening_pr",
            Self::Done => "done",
            Self::NoChange => "no_change",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reason code attached to a failed target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AuthError,
    UnresolvedTarget,
    FetchError,
    ExhaustedRetries,
    PermanentError,
    /// The publish branch holds commits the pipeline did not write.
    DivergedBranch,
    ConcurrentUpdate,
    Cancelled,
}

impl FailureReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::AuthError => "auth_error",
            Self::UnresolvedTarget => "unresolved_target",
            Self::FetchError => "fetch_error",
            Self::ExhaustedRetries => "exhausted_retries",
            Self::PermanentError => "permanent_error",
            Self::DivergedBranch => "diverged_branch",
            Self::ConcurrentUpdate => "concurrent_update",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Terminal state of one (vocabulary, repository) target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TargetOutcome {
    Published {
        pr_number: u64,
        url: String,
        /// False when an existing open pull request was reused.
        created: bool,
    },
    NoChange,
    Failed {
        reason: FailureReason,
        message: String,
    },
}

impl TargetOutcome {
    pub fn failed(reason: FailureReason, message: impl Into<String>) -> Self {
        Self::Failed {
            reason,
            message: message.into(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Failed { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Terminal state this outcome corresponds to.
    pub fn state(&self) -> PublishState {
        match self {
            Self::Published { .. } => PublishState::Done,
            Self::NoChange => PublishState::NoChange,
            Self::Failed { .. } => PublishState::Failed,
        }
    }
}

/// Outcome of one target, as collected by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetResult {
    pub vocabulary: String,
    /// `owner/name`, when the vocabulary resolved.
    pub repository: Option<String>,
    pub outcome: TargetOutcome,
}
