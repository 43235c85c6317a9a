// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Install state machine and history statuses.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status stored on an installed app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallStatus {
    /// Rows written, nothing pushed yet.
    DeployInit,
    /// Chart and values committed to the gitops repository.
    GitSuccess,
    GitError,
    /// Release controller application created and synced.
    AcdSuccess,
    AcdError,
    DeploySuccess,
    /// The deploy stage could not be started.
    TriggerError,
    /// Publishing to the bulk stream failed.
    QueError,
    /// Waiting on the bulk stream.
    Enqueued,
    DequeError,
    HelmError,
    RequestAccepted,
    WfUnknown,
}

impl InstallStatus {
    /// Every status, in declaration order.
    pub const ALL: [InstallStatus; 13] = [
        InstallStatus::DeployInit,
        InstallStatus::GitSuccess,
        InstallStatus::GitError,
        InstallStatus::AcdSuccess,
        InstallStatus::AcdError,
        InstallStatus::DeploySuccess,
        InstallStatus::TriggerError,
        InstallStatus::QueError,
        InstallStatus::Enqueued,
        InstallStatus::DequeError,
        InstallStatus::HelmError,
        InstallStatus::RequestAccepted,
        InstallStatus::WfUnknown,
    ];

    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallStatus::DeployInit => "DEPLOY_INIT",
            InstallStatus::GitSuccess => "GIT_SUCCESS",
            InstallStatus::GitError => "GIT_ERROR",
            InstallStatus::AcdSuccess => "ACD_SUCCESS",
            InstallStatus::AcdError => "ACD_ERROR",
            InstallStatus::DeploySuccess => "DEPLOY_SUCCESS",
            InstallStatus::TriggerError => "TRIGGER_ERROR",
            InstallStatus::QueError => "QUE_ERROR",
            InstallStatus::Enqueued => "ENQUEUED",
            InstallStatus::DequeError => "DEQUE_ERROR",
            InstallStatus::HelmError => "HELM_ERROR",
            InstallStatus::RequestAccepted => "REQUEST_ACCEPTED",
            InstallStatus::WfUnknown => "WF_UNKNOWN",
        }
    }

    /// Statuses a row must be in for a write of `self` to take effect.
    ///
    /// The storage layer turns this into the WHERE clause of the status
    /// update, so a write from any other status changes nothing.
    pub fn predecessors(&self) -> &'static [InstallStatus] {
        use InstallStatus::*;
        match self {
            Enqueued => &[DeployInit, QueError],
            QueError => &[DeployInit, Enqueued],
            GitSuccess | GitError => &[DeployInit, Enqueued, QueError, GitError],
            AcdSuccess | AcdError => &[GitSuccess, AcdError],
            DeploySuccess => &[DeployInit, Enqueued, QueError, AcdSuccess, HelmError],
            HelmError => &[DeployInit, Enqueued, QueError],
            TriggerError => &[DeployInit, Enqueued, QueError, GitError, GitSuccess, AcdSuccess],
            DequeError => &[Enqueued],
            RequestAccepted => &[DeployInit],
            DeployInit | WfUnknown => &[],
        }
    }

    /// Storage strings of [`InstallStatus::predecessors`].
    pub fn predecessor_strs(&self) -> Vec<&'static str> {
        self.predecessors().iter().map(|s| s.as_str()).collect()
    }

    /// Whether a row in `from` may move to `self`.
    pub fn can_follow(&self, from: InstallStatus) -> bool {
        self.predecessors().contains(&from)
    }

    /// The GIT phase still has to run from this status.
    pub fn needs_git(&self) -> bool {
        matches!(
            self,
            InstallStatus::DeployInit
                | InstallStatus::Enqueued
                | InstallStatus::QueError
                | InstallStatus::GitError
        )
    }

    /// The ACD phase still has to run from this status.
    pub fn needs_acd(&self) -> bool {
        self.needs_git() || matches!(self, InstallStatus::GitSuccess | InstallStatus::AcdError)
    }

    /// A deploy stage that ends here has nothing left to do until someone
    /// retries it explicitly.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            InstallStatus::DeploySuccess
                | InstallStatus::GitError
                | InstallStatus::AcdError
                | InstallStatus::HelmError
                | InstallStatus::TriggerError
                | InstallStatus::DequeError
        )
    }
}

impl fmt::Display for InstallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InstallStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A stored status string no enum variant matches.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown status: {0}")]
pub struct UnknownStatus(pub String);

/// Status of one history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryStatus {
    Unknown,
    InProgress,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
    Healthy,
    Degraded,
}

impl HistoryStatus {
    pub const ALL: [HistoryStatus; 8] = [
        HistoryStatus::Unknown,
        HistoryStatus::InProgress,
        HistoryStatus::Succeeded,
        HistoryStatus::Failed,
        HistoryStatus::TimedOut,
        HistoryStatus::Aborted,
        HistoryStatus::Healthy,
        HistoryStatus::Degraded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryStatus::Unknown => "Unknown",
            HistoryStatus::InProgress => "InProgress",
            HistoryStatus::Succeeded => "Succeeded",
            HistoryStatus::Failed => "Failed",
            HistoryStatus::TimedOut => "TimedOut",
            HistoryStatus::Aborted => "Aborted",
            HistoryStatus::Healthy => "Healthy",
            HistoryStatus::Degraded => "Degraded",
        }
    }

    /// Only `Unknown` and `InProgress` may still change.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, HistoryStatus::Unknown | HistoryStatus::InProgress)
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        HistoryStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_storage_string() {
        for status in InstallStatus::ALL {
            assert_eq!(status.as_str().parse::<InstallStatus>().unwrap(), status);
        }
        assert!("DEPLOYED".parse::<InstallStatus>().is_err());
    }

    #[test]
    fn test_happy_path_transitions_allowed() {
        use InstallStatus::*;
        assert!(GitSuccess.can_follow(DeployInit));
        assert!(AcdSuccess.can_follow(GitSuccess));
        assert!(DeploySuccess.can_follow(AcdSuccess));
        assert!(Enqueued.can_follow(DeployInit));
        assert!(GitSuccess.can_follow(Enqueued));
    }

    #[test]
    fn test_terminal_success_is_not_overwritten() {
        use InstallStatus::*;
        for status in InstallStatus::ALL {
            assert!(
                !status.can_follow(DeploySuccess),
                "{} must not follow DEPLOY_SUCCESS",
                status
            );
        }
        assert!(!GitError.can_follow(AcdSuccess));
        assert!(!QueError.can_follow(GitSuccess));
    }

    #[test]
    fn test_failed_phases_can_be_retried() {
        use InstallStatus::*;
        assert!(GitSuccess.can_follow(GitError));
        assert!(AcdSuccess.can_follow(AcdError));
        assert!(GitSuccess.can_follow(QueError));
    }

    #[test]
    fn test_resume_points() {
        use InstallStatus::*;
        assert!(DeployInit.needs_git());
        assert!(GitError.needs_git());
        assert!(!GitSuccess.needs_git());
        assert!(GitSuccess.needs_acd());
        assert!(AcdError.needs_acd());
        assert!(!AcdSuccess.needs_acd());
        assert!(!DeploySuccess.needs_acd());
    }

    #[test]
    fn test_settled_statuses() {
        use InstallStatus::*;
        for status in [DeploySuccess, GitError, AcdError, HelmError, TriggerError] {
            assert!(status.is_settled(), "{} should be settled", status);
        }
        for status in [DeployInit, Enqueued, QueError, GitSuccess, AcdSuccess] {
            assert!(!status.is_settled(), "{} should not be settled", status);
        }
        assert!(TriggerError.can_follow(GitSuccess));
    }

    #[test]
    fn test_history_terminality() {
        assert!(!HistoryStatus::Unknown.is_terminal());
        assert!(!HistoryStatus::InProgress.is_terminal());
        for status in &HistoryStatus::ALL[2..] {
            assert!(status.is_terminal());
            assert_eq!(status.as_str().parse::<HistoryStatus>().unwrap(), *status);
        }
    }
}
