use std::time::Duration;

use shared::domain::{CriterionId, TeamId};
use thiserror::Error;

use crate::session::{LoadReport, LoadStage};

/// Why a score edit was ignored. Refusals never change state and are not
/// surfaced to the judge as errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScoreRejection {
    #[error("value is not a finite number")]
    NotANumber,
    #[error("value is outside the criterion range")]
    OutOfRange,
    #[error("team is not assigned to this judge")]
    UnknownTeam,
    #[error("criterion is not part of this event")]
    UnknownCriterion,
    #[error("team scores are already submitted")]
    Locked,
}

/// Terminal conditions of the initial load sequence.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("no access token supplied; re-open the invitation link")]
    MissingToken,
    #[error("access token does not match any judge; re-open the invitation link")]
    InvalidToken,
    #[error("failed to {stage}: {source:#}")]
    Service {
        stage: LoadStage,
        #[source]
        source: anyhow::Error,
    },
    #[error("timed out after {after:?} while trying to {stage}")]
    Timeout { stage: LoadStage, after: Duration },
    #[error("invalid data during {stage}: {message}")]
    InvalidData { stage: LoadStage, message: String },
}

impl LoadError {
    pub fn is_user_correctable(&self) -> bool {
        matches!(self, Self::MissingToken | Self::InvalidToken)
    }
}

/// A failed load together with the diagnostic report collected up to the
/// failing stage.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LoadFailure {
    #[source]
    pub error: LoadError,
    pub report: LoadReport,
}

/// Errors scoped to a single team's submit action. None of them change the
/// state of other teams.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("team {team_id} is not assigned to this judge")]
    UnknownTeam { team_id: TeamId },
    #[error("fill in all criteria before submitting team {team_id} ({} missing)", .missing.len())]
    Incomplete {
        team_id: TeamId,
        missing: Vec<CriterionId>,
    },
    #[error("submission for team {team_id} failed: {} of {total} scores were not saved", .failed.len())]
    Persistence {
        team_id: TeamId,
        total: usize,
        failed: Vec<(CriterionId, String)>,
    },
    #[error("submission for team {team_id} timed out after {after:?}; retry is safe")]
    Timeout { team_id: TeamId, after: Duration },
}
