use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{EventId, JudgeId, Round, ScoreRecord, TeamId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveJudgeQuery {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentsResponse {
    pub judge_id: JudgeId,
    pub team_ids: Vec<TeamId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertScoreResponse {
    pub record: ScoreRecord,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressQuery {
    #[serde(default)]
    pub round: Option<u32>,
}

/// How many of a judge's assigned teams carry a score for every criterion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JudgeProgress {
    pub judge_id: JudgeId,
    pub judge_name: String,
    pub assigned_teams: usize,
    pub completed_teams: usize,
}

impl JudgeProgress {
    pub fn is_done(&self) -> bool {
        self.completed_teams >= self.assigned_teams
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventProgress {
    pub event_id: EventId,
    pub round: Round,
    pub judges: Vec<JudgeProgress>,
}
