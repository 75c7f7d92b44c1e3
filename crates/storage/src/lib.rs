use anyhow::{Context, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{
    Criterion, CriterionId, EventId, Judge, JudgeId, Round, ScoreRecord, Team, TeamId,
};

const MEMORY_URL: &str = "sqlite::memory:";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

/// Access tokens are never stored in clear; lookups go through this digest.
pub fn token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.trim().as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        // Every pooled connection to an in-memory URL would open its own empty database.
        let max_connections = if database_url.starts_with(MEMORY_URL) {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn create_event(&self, event_id: &EventId, name: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO events (id, name) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
        )
        .bind(event_id.as_str())
        .bind(name)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store event {event_id}"))?;
        Ok(())
    }

    pub async fn event_exists(&self, event_id: &EventId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM events WHERE id = ?")
            .bind(event_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn create_team(&self, team: &Team) -> Result<()> {
        sqlx::query(
            "INSERT INTO teams (id, name, project_title, event_id) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                project_title = excluded.project_title",
        )
        .bind(team.id.as_str())
        .bind(&team.name)
        .bind(&team.project_title)
        .bind(team.event_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store team {}", team.id))?;
        Ok(())
    }

    pub async fn create_criterion(&self, event_id: &EventId, criterion: &Criterion) -> Result<()> {
        sqlx::query(
            "INSERT INTO criteria (id, event_id, name, max_score, weight, position)
             VALUES (?1, ?2, ?3, ?4, ?5,
                (SELECT COALESCE(MAX(position), -1) + 1 FROM criteria WHERE event_id = ?2))
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                max_score = excluded.max_score,
                weight = excluded.weight",
        )
        .bind(criterion.id.as_str())
        .bind(event_id.as_str())
        .bind(&criterion.name)
        .bind(criterion.max_score)
        .bind(criterion.weight)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store criterion {}", criterion.id))?;
        Ok(())
    }

    /// Stores the judge and the digest of `token`; the token itself is not kept.
    pub async fn create_judge(&self, judge: &Judge, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO judges (id, name, event_id, token_digest) VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                token_digest = excluded.token_digest",
        )
        .bind(judge.id.as_str())
        .bind(&judge.name)
        .bind(judge.event_id.as_str())
        .bind(token_digest(token))
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store judge {}", judge.id))?;
        Ok(())
    }

    pub async fn assign_team(&self, judge_id: &JudgeId, team_id: &TeamId) -> Result<()> {
        sqlx::query(
            "INSERT INTO judge_assignments (judge_id, team_id) VALUES (?, ?)
             ON CONFLICT(judge_id, team_id) DO NOTHING",
        )
        .bind(judge_id.as_str())
        .bind(team_id.as_str())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to assign team {team_id} to judge {judge_id}"))?;
        Ok(())
    }

    pub async fn judge_by_token(&self, token: &str) -> Result<Option<Judge>> {
        let row = sqlx::query("SELECT id, name, event_id FROM judges WHERE token_digest = ?")
            .bind(token_digest(token))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| judge_from_row(&r)))
    }

    pub async fn judge(&self, judge_id: &JudgeId) -> Result<Option<Judge>> {
        let row = sqlx::query("SELECT id, name, event_id FROM judges WHERE id = ?")
            .bind(judge_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| judge_from_row(&r)))
    }

    pub async fn judges_for_event(&self, event_id: &EventId) -> Result<Vec<Judge>> {
        let rows = sqlx::query(
            "SELECT id, name, event_id FROM judges WHERE event_id = ? ORDER BY lower(name) ASC",
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(judge_from_row).collect())
    }

    pub async fn assigned_team_ids(&self, judge_id: &JudgeId) -> Result<Vec<TeamId>> {
        let rows = sqlx::query(
            "SELECT team_id FROM judge_assignments WHERE judge_id = ? ORDER BY rowid ASC",
        )
        .bind(judge_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| TeamId(r.get::<String, _>(0)))
            .collect())
    }

    pub async fn is_assigned(&self, judge_id: &JudgeId, team_id: &TeamId) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM judge_assignments WHERE judge_id = ? AND team_id = ?")
            .bind(judge_id.as_str())
            .bind(team_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn teams_for_event(&self, event_id: &EventId) -> Result<Vec<Team>> {
        let rows = sqlx::query(
            "SELECT id, name, project_title, event_id FROM teams
             WHERE event_id = ? ORDER BY rowid ASC",
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Team {
                id: TeamId(r.get::<String, _>(0)),
                name: r.get::<String, _>(1),
                project_title: r.get::<String, _>(2),
                event_id: EventId(r.get::<String, _>(3)),
            })
            .collect())
    }

    pub async fn criteria_for_event(&self, event_id: &EventId) -> Result<Vec<Criterion>> {
        let rows = sqlx::query(
            "SELECT id, name, max_score, weight FROM criteria
             WHERE event_id = ? ORDER BY position ASC, rowid ASC",
        )
        .bind(event_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(criterion_from_row).collect())
    }

    pub async fn criterion_for_event(
        &self,
        event_id: &EventId,
        criterion_id: &CriterionId,
    ) -> Result<Option<Criterion>> {
        let row = sqlx::query(
            "SELECT id, name, max_score, weight FROM criteria WHERE event_id = ? AND id = ?",
        )
        .bind(event_id.as_str())
        .bind(criterion_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(criterion_from_row))
    }

    pub async fn scores_for_judge(&self, judge_id: &JudgeId) -> Result<Vec<ScoreRecord>> {
        let rows = sqlx::query(
            "SELECT judge_id, team_id, criterion_id, round, score FROM scores
             WHERE judge_id = ? ORDER BY round ASC, team_id ASC, criterion_id ASC",
        )
        .bind(judge_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(score_from_row).collect()
    }

    /// Inserts or replaces the score at its natural key. Repeating the same
    /// write leaves a single row.
    pub async fn upsert_score(&self, record: &ScoreRecord) -> Result<DateTime<Utc>> {
        let updated_at = Utc::now();
        sqlx::query(
            "INSERT INTO scores (judge_id, team_id, criterion_id, round, score, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(judge_id, team_id, criterion_id, round) DO UPDATE SET
                score = excluded.score,
                updated_at = excluded.updated_at",
        )
        .bind(record.judge_id.as_str())
        .bind(record.team_id.as_str())
        .bind(record.criterion_id.as_str())
        .bind(i64::from(record.round.0))
        .bind(record.score)
        .bind(updated_at)
        .execute(&self.pool)
        .await
        .with_context(|| {
            format!(
                "failed to upsert score for judge {} team {} criterion {}",
                record.judge_id, record.team_id, record.criterion_id
            )
        })?;
        Ok(updated_at)
    }
}

fn judge_from_row(r: &sqlx::sqlite::SqliteRow) -> Judge {
    Judge {
        id: JudgeId(r.get::<String, _>(0)),
        name: r.get::<String, _>(1),
        event_id: EventId(r.get::<String, _>(2)),
    }
}

fn score_from_row(r: &sqlx::sqlite::SqliteRow) -> Result<ScoreRecord> {
    let judge_id = JudgeId(r.get::<String, _>(0));
    let team_id = TeamId(r.get::<String, _>(1));
    let criterion_id = CriterionId(r.get::<String, _>(2));
    let raw_round = r.get::<i64, _>(3);
    let round = u32::try_from(raw_round).with_context(|| {
        format!("stored round {raw_round} for judge {judge_id} team {team_id} is out of range")
    })?;
    Ok(ScoreRecord {
        judge_id,
        team_id,
        criterion_id,
        round: Round(round),
        score: r.get::<f64, _>(4),
    })
}

fn criterion_from_row(r: &sqlx::sqlite::SqliteRow) -> Criterion {
    Criterion {
        id: CriterionId(r.get::<String, _>(0)),
        name: r.get::<String, _>(1),
        max_score: r.get::<f64, _>(2),
        weight: r.get::<f64, _>(3),
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == MEMORY_URL || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
