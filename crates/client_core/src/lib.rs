use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use shared::domain::{Criterion, EventId, Judge, JudgeId, ScoreRecord, Team, TeamId};

pub mod error;
pub mod http;
pub mod score_store;
pub mod session;
pub mod submission;

pub use error::{LoadError, LoadFailure, ScoreRejection, SubmitError};
pub use http::HttpScoringService;
pub use score_store::{ScoreEdit, ScoreStore};
pub use session::{
    assigned_teams, token_from_link, LoadReport, LoadStage, ScoringSession, SessionProgress,
    SessionSettings, SubmitOutcome,
};
pub use submission::SubmissionTracker;

/// Remote data service the scoring session depends on.
///
/// `upsert_score` must be idempotent under (judge, team, criterion, round).
#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn resolve_judge_by_token(&self, token: &str) -> Result<Option<Judge>>;
    async fn assignments_for_judge(&self, judge_id: &JudgeId) -> Result<BTreeSet<TeamId>>;
    async fn teams_for_event(&self, event_id: &EventId) -> Result<Vec<Team>>;
    async fn criteria_for_event(&self, event_id: &EventId) -> Result<Vec<Criterion>>;
    async fn scores_for_judge(&self, judge_id: &JudgeId) -> Result<Vec<ScoreRecord>>;
    async fn upsert_score(&self, record: ScoreRecord) -> Result<()>;
}

pub struct MissingScoringService;

#[async_trait]
impl ScoringService for MissingScoringService {
    async fn resolve_judge_by_token(&self, _token: &str) -> Result<Option<Judge>> {
        Err(anyhow!("scoring service is unavailable"))
    }

    async fn assignments_for_judge(&self, judge_id: &JudgeId) -> Result<BTreeSet<TeamId>> {
        Err(anyhow!(
            "scoring service is unavailable for judge {judge_id}"
        ))
    }

    async fn teams_for_event(&self, event_id: &EventId) -> Result<Vec<Team>> {
        Err(anyhow!(
            "scoring service is unavailable for event {event_id}"
        ))
    }

    async fn criteria_for_event(&self, event_id: &EventId) -> Result<Vec<Criterion>> {
        Err(anyhow!(
            "scoring service is unavailable for event {event_id}"
        ))
    }

    async fn scores_for_judge(&self, judge_id: &JudgeId) -> Result<Vec<ScoreRecord>> {
        Err(anyhow!(
            "scoring service is unavailable for judge {judge_id}"
        ))
    }

    async fn upsert_score(&self, record: ScoreRecord) -> Result<()> {
        Err(anyhow!(
            "scoring service is unavailable; score for team {} not saved",
            record.team_id
        ))
    }
}
