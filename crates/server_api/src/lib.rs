use std::collections::{HashMap, HashSet};

use shared::{
    domain::{Criterion, EventId, Judge, JudgeId, Round, ScoreRecord, Team},
    error::{ApiError, ErrorCode},
    protocol::{AssignmentsResponse, EventProgress, JudgeProgress, UpsertScoreResponse},
};
use storage::Storage;
use tracing::{info, warn};

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

pub async fn resolve_judge(ctx: &ApiContext, token: &str) -> Result<Judge, ApiError> {
    if token.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "access token is required"));
    }
    ctx.storage
        .judge_by_token(token)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "access token is not recognised"))
}

pub async fn assignments_for_judge(
    ctx: &ApiContext,
    judge_id: &JudgeId,
) -> Result<AssignmentsResponse, ApiError> {
    ensure_judge(ctx, judge_id).await?;
    let team_ids = ctx
        .storage
        .assigned_team_ids(judge_id)
        .await
        .map_err(internal)?;
    Ok(AssignmentsResponse {
        judge_id: judge_id.clone(),
        team_ids,
    })
}

pub async fn teams_for_event(ctx: &ApiContext, event_id: &EventId) -> Result<Vec<Team>, ApiError> {
    ensure_event(ctx, event_id).await?;
    ctx.storage
        .teams_for_event(event_id)
        .await
        .map_err(internal)
}

pub async fn criteria_for_event(
    ctx: &ApiContext,
    event_id: &EventId,
) -> Result<Vec<Criterion>, ApiError> {
    ensure_event(ctx, event_id).await?;
    ctx.storage
        .criteria_for_event(event_id)
        .await
        .map_err(internal)
}

pub async fn scores_for_judge(
    ctx: &ApiContext,
    judge_id: &JudgeId,
) -> Result<Vec<ScoreRecord>, ApiError> {
    ensure_judge(ctx, judge_id).await?;
    ctx.storage
        .scores_for_judge(judge_id)
        .await
        .map_err(internal)
}

/// Validates one score against the judge's assignment and the criterion
/// bound, then writes it at its natural key.
pub async fn upsert_score(
    ctx: &ApiContext,
    record: ScoreRecord,
) -> Result<UpsertScoreResponse, ApiError> {
    ensure_round(record.round)?;
    let judge = ensure_judge(ctx, &record.judge_id).await?;
    let assigned = ctx
        .storage
        .is_assigned(&judge.id, &record.team_id)
        .await
        .map_err(internal)?;
    if !assigned {
        return Err(ApiError::new(
            ErrorCode::Forbidden,
            format!("team {} is not assigned to judge {}", record.team_id, judge.id),
        ));
    }
    let criterion = ctx
        .storage
        .criterion_for_event(&judge.event_id, &record.criterion_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| {
            ApiError::new(
                ErrorCode::NotFound,
                format!("criterion {} not found for event", record.criterion_id),
            )
        })?;
    if !criterion.bounds().contains(record.score) {
        warn!(
            judge_id = %judge.id,
            criterion_id = %criterion.id,
            score = record.score,
            max_score = criterion.max_score,
            "rejecting out-of-range score"
        );
        return Err(ApiError::new(
            ErrorCode::Validation,
            format!(
                "score {} outside [0, {}] for criterion {}",
                record.score, criterion.max_score, criterion.id
            ),
        ));
    }

    let updated_at = ctx.storage.upsert_score(&record).await.map_err(internal)?;
    info!(
        judge_id = %record.judge_id,
        team_id = %record.team_id,
        criterion_id = %record.criterion_id,
        round = record.round.0,
        "score stored"
    );
    Ok(UpsertScoreResponse { record, updated_at })
}

/// Read-only completion view per judge: a team counts once every criterion
/// of the event has a score in `round`. Assignments to teams outside the
/// event are left out, matching what the judge's dashboard shows.
pub async fn event_progress(
    ctx: &ApiContext,
    event_id: &EventId,
    round: Round,
) -> Result<EventProgress, ApiError> {
    ensure_round(round)?;
    ensure_event(ctx, event_id).await?;
    let event_teams: HashSet<_> = ctx
        .storage
        .teams_for_event(event_id)
        .await
        .map_err(internal)?
        .into_iter()
        .map(|team| team.id)
        .collect();
    let criteria_count = ctx
        .storage
        .criteria_for_event(event_id)
        .await
        .map_err(internal)?
        .len();
    let judges = ctx
        .storage
        .judges_for_event(event_id)
        .await
        .map_err(internal)?;

    let mut progress = Vec::with_capacity(judges.len());
    for judge in judges {
        let assigned: HashSet<_> = ctx
            .storage
            .assigned_team_ids(&judge.id)
            .await
            .map_err(internal)?
            .into_iter()
            .filter(|team_id| event_teams.contains(team_id))
            .collect();
        let scores = ctx
            .storage
            .scores_for_judge(&judge.id)
            .await
            .map_err(internal)?;

        let mut scored_per_team: HashMap<_, usize> = HashMap::new();
        for score in scores.iter().filter(|s| s.round == round) {
            if assigned.contains(&score.team_id) {
                *scored_per_team.entry(&score.team_id).or_default() += 1;
            }
        }
        let completed_teams = scored_per_team
            .values()
            .filter(|count| criteria_count > 0 && **count >= criteria_count)
            .count();

        progress.push(JudgeProgress {
            judge_id: judge.id,
            judge_name: judge.name,
            assigned_teams: assigned.len(),
            completed_teams,
        });
    }

    Ok(EventProgress {
        event_id: event_id.clone(),
        round,
        judges: progress,
    })
}

fn ensure_round(round: Round) -> Result<(), ApiError> {
    if round.0 == 0 {
        return Err(ApiError::new(ErrorCode::Validation, "round must be at least 1"));
    }
    Ok(())
}

async fn ensure_judge(ctx: &ApiContext, judge_id: &JudgeId) -> Result<Judge, ApiError> {
    ctx.storage
        .judge(judge_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, format!("judge {judge_id} not found")))
}

async fn ensure_event(ctx: &ApiContext, event_id: &EventId) -> Result<(), ApiError> {
    let exists = ctx
        .storage
        .event_exists(event_id)
        .await
        .map_err(internal)?;
    if !exists {
        return Err(ApiError::new(
            ErrorCode::NotFound,
            format!("event {event_id} not found"),
        ));
    }
    Ok(())
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use shared::domain::{CriterionId, TeamId};

    use super::*;

    async fn setup() -> (ApiContext, Judge) {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let event = EventId::from("ev");
        storage.create_event(&event, "Event").await.expect("event");
        for id in ["t1", "t2"] {
            storage
                .create_team(&Team {
                    id: TeamId::from(id),
                    name: id.to_string(),
                    project_title: String::new(),
                    event_id: event.clone(),
                })
                .await
                .expect("team");
        }
        for (id, max) in [("c1", 10.0), ("c2", 5.0)] {
            storage
                .create_criterion(
                    &event,
                    &Criterion {
                        id: CriterionId::from(id),
                        name: id.to_string(),
                        max_score: max,
                        weight: 1.0,
                    },
                )
                .await
                .expect("criterion");
        }
        let judge = Judge {
            id: JudgeId::from("j1"),
            name: "Judy".to_string(),
            event_id: event,
        };
        storage.create_judge(&judge, "tok").await.expect("judge");
        storage
            .assign_team(&judge.id, &TeamId::from("t1"))
            .await
            .expect("assign");
        (ApiContext { storage }, judge)
    }

    fn record(team: &str, criterion: &str, score: f64) -> ScoreRecord {
        ScoreRecord {
            judge_id: JudgeId::from("j1"),
            team_id: TeamId::from(team),
            criterion_id: CriterionId::from(criterion),
            score,
            round: Round(1),
        }
    }

    #[tokio::test]
    async fn unknown_token_is_not_found_and_blank_is_invalid() {
        let (ctx, judge) = setup().await;
        assert_eq!(resolve_judge(&ctx, "tok").await.expect("judge"), judge);

        let err = resolve_judge(&ctx, "nope").await.expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::NotFound));
        let err = resolve_judge(&ctx, "  ").await.expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn score_above_max_is_rejected() {
        let (ctx, _) = setup().await;
        let err = upsert_score(&ctx, record("t1", "c2", 5.1))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
        let err = upsert_score(&ctx, record("t1", "c1", f64::NAN))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }

    #[tokio::test]
    async fn unassigned_team_is_forbidden() {
        let (ctx, _) = setup().await;
        let err = upsert_score(&ctx, record("t2", "c1", 3.0))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Forbidden));
    }

    #[tokio::test]
    async fn progress_counts_only_fully_scored_teams() {
        let (ctx, judge) = setup().await;
        upsert_score(&ctx, record("t1", "c1", 8.0))
            .await
            .expect("c1");
        let progress = event_progress(&ctx, &judge.event_id, Round(1))
            .await
            .expect("progress");
        assert_eq!(progress.judges[0].completed_teams, 0);
        assert!(!progress.judges[0].is_done());

        upsert_score(&ctx, record("t1", "c2", 5.0))
            .await
            .expect("c2");
        let progress = event_progress(&ctx, &judge.event_id, Round(1))
            .await
            .expect("progress");
        assert_eq!(progress.judges[0].assigned_teams, 1);
        assert_eq!(progress.judges[0].completed_teams, 1);
        assert!(progress.judges[0].is_done());

        let other_round = event_progress(&ctx, &judge.event_id, Round(2))
            .await
            .expect("progress");
        assert_eq!(other_round.judges[0].completed_teams, 0);
    }

    #[tokio::test]
    async fn progress_ignores_assignments_outside_the_event() {
        let (ctx, judge) = setup().await;
        let other = EventId::from("other");
        ctx.storage
            .create_event(&other, "Other")
            .await
            .expect("event");
        ctx.storage
            .create_team(&Team {
                id: TeamId::from("x1"),
                name: "x1".to_string(),
                project_title: String::new(),
                event_id: other,
            })
            .await
            .expect("team");
        ctx.storage
            .assign_team(&judge.id, &TeamId::from("x1"))
            .await
            .expect("assign");

        upsert_score(&ctx, record("t1", "c1", 8.0))
            .await
            .expect("c1");
        upsert_score(&ctx, record("t1", "c2", 4.0))
            .await
            .expect("c2");
        let progress = event_progress(&ctx, &judge.event_id, Round(1))
            .await
            .expect("progress");
        assert_eq!(progress.judges[0].assigned_teams, 1);
        assert!(progress.judges[0].is_done());
    }

    #[tokio::test]
    async fn progress_for_round_zero_is_invalid() {
        let (ctx, judge) = setup().await;
        let err = event_progress(&ctx, &judge.event_id, Round(0))
            .await
            .expect_err("should fail");
        assert!(matches!(err.code, ErrorCode::Validation));
    }
}
